//! rm command - Remove objects

use clap::Args;
use objio_core::{Error, Storage};
use serde::Serialize;

use super::walk;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object path(s) to remove
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove every object under the given prefixes
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore paths that do not exist
    #[arg(short, long)]
    pub force: bool,

    /// Only show what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    dry_run: bool,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
    total: usize,
}

/// Execute the rm command
pub fn execute(args: RmArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut exit_code = ExitCode::Success;

    for path in &args.paths {
        let targets = match targets(storage, path, args.recursive) {
            Ok(targets) => targets,
            Err(Error::NotFound(_)) if args.force => continue,
            Err(e) => {
                exit_code = formatter.fail(&format!("Failed to remove {path}"), &e);
                failed.push(path.clone());
                continue;
            }
        };

        for target in targets {
            if args.dry_run {
                formatter.println(&format!("Would remove: {target}"));
                deleted.push(target);
                continue;
            }
            match storage.remove(&target) {
                Ok(()) => {
                    formatter.success(&format!("Removed: {target}"));
                    deleted.push(target);
                }
                Err(Error::NotFound(_)) if args.force => {}
                Err(e) => {
                    exit_code = formatter.fail(&format!("Failed to remove {target}"), &e);
                    failed.push(target);
                }
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if failed.is_empty() { "success" } else { "partial" },
            dry_run: args.dry_run,
            total: deleted.len(),
            deleted,
            failed,
        });
    } else if deleted.len() > 1 {
        formatter.println(&format!("Total: {} objects", deleted.len()));
    }
    exit_code
}

/// Objects to delete for one path argument
fn targets(storage: &Storage, path: &str, recursive: bool) -> objio_core::Result<Vec<String>> {
    if !recursive {
        if storage.stat(path)?.is_dir {
            return Err(Error::InvalidPath(format!(
                "{path} is a directory, use --recursive"
            )));
        }
        return Ok(vec![path.to_string()]);
    }

    let mut files: Vec<String> = walk(storage, path, true)?
        .into_iter()
        .filter(|item| !item.is_dir)
        .map(|item| item.key)
        .collect();
    if files.is_empty() {
        return Err(Error::NotFound(path.to_string()));
    }
    files.sort();
    Ok(files)
}
