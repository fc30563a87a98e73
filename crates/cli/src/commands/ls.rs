//! ls command - List objects and directories

use clap::Args;
use objio_core::{ObjectInfo, Storage};
use serde::Serialize;

use super::walk;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// List objects and directories
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Path or prefix to list (s3://bucket/prefix, mem://prefix, ./dir)
    pub path: String,

    /// List recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Summarize output (show totals)
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ObjectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_objects: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

impl Summary {
    fn of(items: &[ObjectInfo]) -> Self {
        let files = items.iter().filter(|item| !item.is_dir);
        let total_size_bytes = files.clone().map(|item| item.size).sum();
        Self {
            total_objects: files.count(),
            total_size_bytes,
            total_size_human: humansize::format_size(total_size_bytes, humansize::BINARY),
        }
    }
}

/// Execute the ls command
pub fn execute(args: LsArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let items = match walk(storage, &args.path, args.recursive) {
        Ok(items) => items,
        Err(e) => return formatter.fail(&format!("Failed to list {}", args.path), &e),
    };
    let summary = args.summarize.then(|| Summary::of(&items));

    if formatter.is_json() {
        formatter.json(&LsOutput { items, summary });
        return ExitCode::Success;
    }

    for item in &items {
        formatter.println(&format_line(item));
    }
    if let Some(summary) = summary {
        formatter.println(&format!(
            "\nTotal: {} objects, {}",
            summary.total_objects, summary.total_size_human
        ));
    }
    ExitCode::Success
}

fn format_line(item: &ObjectInfo) -> String {
    let date = item
        .last_modified
        .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| " ".repeat(19));
    let size = if item.is_dir {
        "PRE".to_string()
    } else {
        item.size_human()
    };
    format!("[{date}] {size:>10} {}", item.key)
}
