//! cat command - Display object contents
//!
//! Streams objects to stdout through the buffered read handle, so large
//! objects are fetched one read window at a time.

use std::io::{self, BufRead, Seek, SeekFrom, Write};

use clap::Args;
use objio_core::{Error, ObjectFile, Storage};

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Display object contents
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Object path(s) to print, in order
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Start reading at this byte offset
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Print only the first N lines of each object
    #[arg(short = 'n', long)]
    pub lines: Option<usize>,
}

/// Execute the cat command
pub fn execute(args: CatArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for path in &args.paths {
        let result = storage
            .open(path, "rb")
            .and_then(|mut file| print_object(&mut file, &args, &mut out));
        if let Err(e) = result {
            return formatter.fail(&format!("Failed to read {path}"), &e);
        }
    }

    if let Err(e) = out.flush() {
        formatter.error(&format!("Failed to write to stdout: {e}"));
        return ExitCode::GeneralError;
    }
    ExitCode::Success
}

fn print_object(file: &mut ObjectFile, args: &CatArgs, out: &mut impl Write) -> objio_core::Result<()> {
    if args.offset > 0 {
        file.seek(SeekFrom::Start(args.offset)).map_err(Error::from_io)?;
    }

    match args.lines {
        None => {
            io::copy(file, out).map_err(Error::from_io)?;
        }
        Some(limit) => {
            let mut line = Vec::new();
            for _ in 0..limit {
                line.clear();
                if file.read_until(b'\n', &mut line).map_err(Error::from_io)? == 0 {
                    break;
                }
                out.write_all(&line)?;
            }
        }
    }

    file.close()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(key: &str, data: &[u8]) -> Storage {
        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();
        let mut file = storage.open(key, "wb").unwrap();
        file.write_all(data).unwrap();
        file.close().unwrap();
        storage
    }

    fn args(offset: u64, lines: Option<usize>) -> CatArgs {
        CatArgs {
            paths: vec!["mem://notes.txt".into()],
            offset,
            lines,
        }
    }

    #[test]
    fn test_print_whole_object() {
        let storage = storage_with("mem://notes.txt", b"one\ntwo\nthree\n");
        let mut file = storage.open("mem://notes.txt", "rb").unwrap();
        let mut out = Vec::new();
        print_object(&mut file, &args(0, None), &mut out).unwrap();
        assert_eq!(out, b"one\ntwo\nthree\n");
        assert!(file.is_closed());
    }

    #[test]
    fn test_print_first_lines_from_offset() {
        let storage = storage_with("mem://notes.txt", b"one\ntwo\nthree\n");
        let mut file = storage.open("mem://notes.txt", "rb").unwrap();
        let mut out = Vec::new();
        print_object(&mut file, &args(4, Some(1)), &mut out).unwrap();
        assert_eq!(out, b"two\n");
    }

    #[test]
    fn test_lines_beyond_end() {
        let storage = storage_with("mem://notes.txt", b"only");
        let mut file = storage.open("mem://notes.txt", "rb").unwrap();
        let mut out = Vec::new();
        print_object(&mut file, &args(0, Some(5)), &mut out).unwrap();
        assert_eq!(out, b"only");
    }
}
