//! stat command - Show object metadata

use clap::Args;
use objio_core::{ObjectInfo, Storage};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Show object metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object path(s)
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    name: String,
    storage: String,
    is_dir: bool,
    size_bytes: u64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

impl StatOutput {
    fn new(name: &str, storage: &str, info: &ObjectInfo) -> Self {
        Self {
            name: name.to_string(),
            storage: storage.to_string(),
            is_dir: info.is_dir,
            size_bytes: info.size,
            size_human: info.size_human(),
            last_modified: info.last_modified.map(|ts| ts.to_string()),
            etag: info.etag.clone(),
            content_type: info.content_type.clone(),
        }
    }

    fn print(&self, formatter: &Formatter) {
        formatter.println(&format!("Name      : {}", self.name));
        formatter.println(&format!("Storage   : {}", self.storage));
        if let Some(modified) = &self.last_modified {
            formatter.println(&format!("Date      : {modified}"));
        }
        if self.is_dir {
            formatter.println("Type      : directory");
        } else {
            formatter.println(&format!(
                "Size      : {} ({} bytes)",
                self.size_human, self.size_bytes
            ));
            formatter.println("Type      : file");
        }
        if let Some(etag) = &self.etag {
            formatter.println(&format!("ETag      : {etag}"));
        }
        if let Some(content_type) = &self.content_type {
            formatter.println(&format!("Content   : {content_type}"));
        }
    }
}

/// Execute the stat command
pub fn execute(args: StatArgs, storage: &Storage, formatter: &Formatter) -> ExitCode {
    let mut outputs = Vec::with_capacity(args.paths.len());

    for path in &args.paths {
        let result = storage
            .resolve(path)
            .and_then(|object| Ok((object.storage_name().to_string(), storage.stat(path)?)));
        match result {
            Ok((storage_name, info)) => outputs.push(StatOutput::new(path, &storage_name, &info)),
            Err(e) => return formatter.fail(&format!("Failed to stat {path}"), &e),
        }
    }

    if formatter.is_json() {
        match outputs.as_slice() {
            [single] => formatter.json(single),
            many => formatter.json(&many),
        }
    } else {
        for (i, output) in outputs.iter().enumerate() {
            if i > 0 {
                formatter.println("");
            }
            output.print(formatter);
        }
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_output_fields() {
        let mut info = ObjectInfo::file("bucket/key", 1536);
        info.etag = Some("abc".into());
        info.last_modified = Some(jiff::Timestamp::from_second(60).unwrap());
        let output = StatOutput::new("s3://bucket/key", "s3", &info);

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["name"], "s3://bucket/key");
        assert_eq!(json["storage"], "s3");
        assert_eq!(json["size_bytes"], 1536);
        assert_eq!(json["etag"], "abc");
        assert_eq!(json["last_modified"], "1970-01-01T00:01:00Z");
        assert!(json.get("content_type").is_none());
    }

    #[test]
    fn test_stat_missing_object_exit_code() {
        let storage = Storage::new().unwrap();
        storage.mount("memory", &Default::default()).unwrap();
        let formatter = Formatter::new(crate::output::OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let code = execute(
            StatArgs {
                paths: vec!["mem://missing".into()],
            },
            &storage,
            &formatter,
        );
        assert_eq!(code, ExitCode::NotFound);
    }
}
