//! pipe command - Stream stdin to an object
//!
//! Input is uploaded as it arrives: once a part's worth of data is buffered
//! it goes out as a multipart part, so unbounded streams work.

use std::io::{self, Read};

use clap::Args;
use objio_core::{Error, ObjectFile, OpenOptions, Storage};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Stream stdin to an object
#[derive(Args, Debug)]
pub struct PipeArgs {
    /// Destination path
    pub target: String,

    /// Append to the target instead of replacing it
    #[arg(short, long)]
    pub append: bool,

    /// Multipart part size in bytes
    #[arg(long)]
    pub part_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PipeOutput {
    status: &'static str,
    target: String,
    size_bytes: u64,
    size_human: String,
}

/// Execute the pipe command
pub fn execute(args: PipeArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let mode = if args.append { "ab" } else { "wb" };
    let options = match args.part_size {
        Some(part_size) => OpenOptions::new().part_size(part_size),
        None => OpenOptions::new(),
    };

    let result = storage
        .open_with(&args.target, mode, &options)
        .and_then(|mut file| stream(io::stdin().lock(), &mut file));

    match result {
        Ok(size) => {
            let size_human = humansize::format_size(size, humansize::BINARY);
            if formatter.is_json() {
                formatter.json(&PipeOutput {
                    status: "success",
                    target: args.target,
                    size_bytes: size,
                    size_human,
                });
            } else {
                formatter.success(&format!("Uploaded {size_human} to {}", args.target));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to upload to {}", args.target), &e),
    }
}

/// Copy `input` into `file` and commit it; aborts the upload on error
fn stream(mut input: impl Read, file: &mut ObjectFile) -> objio_core::Result<u64> {
    match io::copy(&mut input, file) {
        Ok(size) => {
            file.close()?;
            Ok(size)
        }
        Err(e) => {
            file.abort();
            Err(Error::from_io(e))
        }
    }
}
