//! cp command - Copy an object, possibly between storages
//!
//! The source is streamed through a read handle into a write handle, so a
//! copy between two S3 endpoints, or between S3 and the local disk, never
//! holds more than one read window plus the in-flight parts in memory.

use std::io;

use clap::Args;
use objio_core::{Error, OpenOptions, Storage};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};

/// Copy an object
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source path
    pub source: String,

    /// Target path; a trailing `/` copies into that directory
    pub target: String,

    /// Multipart part size in bytes
    #[arg(long)]
    pub part_size: Option<usize>,

    /// Parts uploaded in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Fail instead of overwriting an existing target
    #[arg(long)]
    pub no_clobber: bool,
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
    size_bytes: u64,
    size_human: String,
}

/// Execute the cp command
pub fn execute(args: CpArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let target = target_path(&args.source, &args.target);

    match copy_object(storage, &args, &target, formatter) {
        Ok(size) => {
            let size_human = humansize::format_size(size, humansize::BINARY);
            if formatter.is_json() {
                formatter.json(&CpOutput {
                    status: "success",
                    source: args.source,
                    target,
                    size_bytes: size,
                    size_human,
                });
            } else {
                formatter.success(&format!("{} -> {target} ({size_human})", args.source));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to copy {} to {target}", args.source), &e),
    }
}

fn copy_object(
    storage: &Storage,
    args: &CpArgs,
    target: &str,
    formatter: &Formatter,
) -> objio_core::Result<u64> {
    let mut options = OpenOptions::new();
    if let Some(part_size) = args.part_size {
        options = options.part_size(part_size);
    }
    if let Some(concurrency) = args.concurrency {
        options = options.upload_concurrency(concurrency);
    }
    let mode = if args.no_clobber { "xb" } else { "wb" };

    let reader = storage.open(&args.source, "rb")?;
    let progress = ProgressBar::new(formatter.config(), reader.len());
    let mut writer = storage.open_with(target, mode, &options)?;

    let copied = io::copy(&mut progress.wrap_read(reader), &mut writer);
    progress.finish_and_clear();

    match copied {
        Ok(bytes) => {
            writer.close()?;
            Ok(bytes)
        }
        Err(e) => {
            writer.abort();
            Err(Error::from_io(e))
        }
    }
}

/// Append the source file name when the target names a directory
fn target_path(source: &str, target: &str) -> String {
    if !target.ends_with('/') {
        return target.to_string();
    }
    let name = source
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source);
    format!("{target}{name}")
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::output::OutputConfig;

    fn quiet() -> Formatter {
        Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        })
    }

    fn args(source: &str, target: &str) -> CpArgs {
        CpArgs {
            source: source.into(),
            target: target.into(),
            part_size: None,
            concurrency: None,
            no_clobber: false,
        }
    }

    #[test]
    fn test_target_path() {
        assert_eq!(target_path("s3://b/a/file.txt", "mem://dir/"), "mem://dir/file.txt");
        assert_eq!(target_path("./file.txt", "mem://x"), "mem://x");
        assert_eq!(target_path("C:\\data\\file.bin", "s3://b/"), "s3://b/file.bin");
    }

    #[test]
    fn test_copy_local_to_memory_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("source.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&local, &data).unwrap();

        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();

        let code = execute(
            args(&local.to_string_lossy(), "mem://copies/"),
            &storage,
            &quiet(),
        );
        assert_eq!(code, ExitCode::Success);

        let mut copied = Vec::new();
        storage
            .open("mem://copies/source.bin", "rb")
            .unwrap()
            .read_to_end(&mut copied)
            .unwrap();
        assert_eq!(copied, data);

        let back = dir.path().join("back.bin");
        let code = execute(
            args("mem://copies/source.bin", &back.to_string_lossy()),
            &storage,
            &quiet(),
        );
        assert_eq!(code, ExitCode::Success);
        assert_eq!(std::fs::read(back).unwrap(), data);
    }

    #[test]
    fn test_no_clobber_keeps_existing_target() {
        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();
        for (key, body) in [("mem://a", b"new"), ("mem://b", b"old")] {
            let mut file = storage.open(key, "wb").unwrap();
            file.write_all(body).unwrap();
            file.close().unwrap();
        }

        let mut no_clobber = args("mem://a", "mem://b");
        no_clobber.no_clobber = true;
        let code = execute(no_clobber, &storage, &quiet());
        assert_eq!(code, ExitCode::Conflict);

        let mut kept = String::new();
        storage
            .open("mem://b", "r")
            .unwrap()
            .read_to_string(&mut kept)
            .unwrap();
        assert_eq!(kept, "old");
    }

    #[test]
    fn test_missing_source() {
        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();
        let code = execute(args("mem://nope", "mem://dst"), &storage, &quiet());
        assert_eq!(code, ExitCode::NotFound);
    }
}
