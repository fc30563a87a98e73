//! CLI command definitions and execution
//!
//! Commands hold no storage logic of their own: each one loads the mounts
//! from the config file into a [`Storage`] facade and drives it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use objio_core::{ConfigManager, DriverFactory, ObjectInfo, Storage};
use objio_s3::S3Factory;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod cat;
mod completions;
pub mod cp;
mod ls;
mod mounts;
mod pipe;
mod rm;
mod stat;

/// objio - one filesystem-like view over many object stores
///
/// Paths are URLs (`s3://bucket/key`, `mem://key`, an S3 endpoint URL) or
/// local filesystem paths. Storages are mounted from the config file.
#[derive(Parser, Debug)]
#[command(name = "objio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "OBJIO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List objects and directories
    Ls(ls::LsArgs),

    /// Display object contents
    Cat(cat::CatArgs),

    /// Show object metadata
    Stat(stat::StatArgs),

    /// Copy an object, possibly between storages
    Cp(cp::CpArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// Stream stdin to an object
    Pipe(pipe::PipeArgs),

    /// Show and edit configured mounts
    #[command(subcommand)]
    Mounts(mounts::MountsCommands),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub fn execute(cli: Cli) -> ExitCode {
    let formatter = Formatter::new(OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    });
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Completions(args) => completions::execute(args),
        Commands::Mounts(cmd) => match config_manager(config) {
            Ok(manager) => mounts::execute(cmd, &manager, &formatter),
            Err(e) => report(&formatter, &e),
        },
        Commands::Ls(args) => with_storage(config, &formatter, |s| ls::execute(args, s, &formatter)),
        Commands::Cat(args) => with_storage(config, &formatter, |s| cat::execute(args, s, &formatter)),
        Commands::Stat(args) => {
            with_storage(config, &formatter, |s| stat::execute(args, s, &formatter))
        }
        Commands::Cp(args) => with_storage(config, &formatter, |s| cp::execute(args, s, &formatter)),
        Commands::Rm(args) => with_storage(config, &formatter, |s| rm::execute(args, s, &formatter)),
        Commands::Pipe(args) => {
            with_storage(config, &formatter, |s| pipe::execute(args, s, &formatter))
        }
    }
}

/// Storage factories the CLI knows besides the built-in ones
pub(crate) fn factories() -> Vec<Arc<dyn DriverFactory>> {
    vec![Arc::new(S3Factory)]
}

fn config_manager(path: Option<&Path>) -> anyhow::Result<ConfigManager> {
    match path {
        Some(path) => Ok(ConfigManager::with_path(path.to_path_buf())),
        None => ConfigManager::new().context("Failed to locate the config directory"),
    }
}

/// Build the facade with every configured mount established
pub(crate) fn open_storage(manager: &ConfigManager) -> anyhow::Result<Storage> {
    let config = manager
        .load()
        .with_context(|| format!("Failed to load {}", manager.config_path().display()))?;
    let storage =
        Storage::from_config(&config, factories()).context("Failed to mount configured storage")?;
    tracing::debug!(mounts = storage.mounts().len(), "storage ready");
    Ok(storage)
}

fn with_storage(
    config: Option<&Path>,
    formatter: &Formatter,
    run: impl FnOnce(&Storage) -> ExitCode,
) -> ExitCode {
    match config_manager(config).and_then(|manager| open_storage(&manager)) {
        Ok(storage) => run(&storage),
        Err(e) => report(formatter, &e),
    }
}

fn report(formatter: &Formatter, err: &anyhow::Error) -> ExitCode {
    formatter.error(&format!("{err:#}"));
    ExitCode::for_anyhow(err)
}

/// List `path`, descending into directories when `recursive`
///
/// Returned keys are full paths that can be handed back to the facade.
pub(crate) fn walk(
    storage: &Storage,
    path: &str,
    recursive: bool,
) -> objio_core::Result<Vec<ObjectInfo>> {
    let base = storage.resolve(path)?;
    let mut items = Vec::new();
    let mut pending = VecDeque::from([path.to_string()]);

    while let Some(next) = pending.pop_front() {
        for mut item in storage.list(&next)? {
            item.key = base.with_key(item.key.as_str()).url();
            if recursive && item.is_dir {
                pending.push_back(item.key.clone());
            }
            items.push(item);
        }
    }

    items.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_walk_returns_full_paths() {
        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();
        for key in ["mem://docs/a.txt", "mem://docs/sub/b.txt"] {
            let mut file = storage.open(key, "wb").unwrap();
            file.write_all(b"x").unwrap();
            file.close().unwrap();
        }

        let items = walk(&storage, "mem://docs/", false).unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["mem://docs/a.txt", "mem://docs/sub/b.txt"]);
    }

    #[test]
    fn test_walk_descends_into_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("leaf.txt"), b"leaf").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"top").unwrap();
        let storage = Storage::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();

        let shallow = walk(&storage, &root, false).unwrap();
        assert_eq!(shallow.len(), 2);

        let deep = walk(&storage, &root, true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.iter().any(|i| i.key.ends_with("leaf.txt") && i.size == 4));
    }

    #[test]
    fn test_open_storage_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));
        let storage = open_storage(&manager).unwrap();
        assert!(storage.mounts().is_empty());
        assert!(storage.storage_names().contains(&"s3"));
    }

    #[test]
    fn test_open_storage_rejects_unknown_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "schema_version = 1\n\n[[mounts]]\nstorage = \"ftp\"\n",
        )
        .unwrap();
        let err = open_storage(&ConfigManager::with_path(path)).unwrap_err();
        assert_eq!(ExitCode::for_anyhow(&err), ExitCode::UsageError);
    }
}
