//! objio - one filesystem-like view over many object stores
//!
//! A command-line front end for the objio storage facade. Storages are
//! mounted from the config file; paths are URLs or local paths.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use objio_cli::commands::{self, Cli};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // The facade drives its own runtime, so main stays synchronous
    let exit_code = commands::execute(cli);

    std::process::exit(exit_code.as_i32());
}
