//! Local filesystem driver
//!
//! Serves paths that no mount claims. Keys are filesystem paths. Writes are
//! single-shot; append is native.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::Path;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::traits::{DriverCapabilities, ObjectInfo, StorageDriver};

/// Read granularity that suits local disks
const LOCAL_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct LocalDriver;

impl LocalDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Map a filesystem error onto the unified taxonomy
fn map_io(err: std::io::Error, key: &str) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(key.to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(key.to_string()),
        std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(key.to_string()),
        _ => Error::Io(err),
    }
}

/// Version tag derived from size and modification time
fn file_etag(metadata: &std::fs::Metadata) -> Option<String> {
    let modified = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{:x}-{:x}", modified.as_nanos(), metadata.len()))
}

fn object_info(key: String, metadata: &std::fs::Metadata) -> ObjectInfo {
    let mut info = if metadata.is_dir() {
        ObjectInfo::dir(key)
    } else {
        ObjectInfo::file(key, metadata.len())
    };
    info.etag = file_etag(metadata);
    info.last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| jiff::Timestamp::try_from(t).ok());
    info
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            multipart: false,
            append: true,
            min_part_size: 0,
            preferred_buffer_size: Some(LOCAL_BUFFER_SIZE),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let metadata = tokio::fs::metadata(key).await.map_err(|e| map_io(e, key))?;
        Ok(object_info(key.to_string(), &metadata))
    }

    async fn get_range(
        &self,
        key: &str,
        range: Range<u64>,
        if_match: Option<String>,
    ) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(key).await.map_err(|e| map_io(e, key))?;

        if let Some(expected) = if_match {
            let metadata = file.metadata().await?;
            if file_etag(&metadata).as_deref() != Some(expected.as_str()) {
                return Err(Error::StaleRead(format!("{key} was modified")));
            }
        }

        file.seek(SeekFrom::Start(range.start)).await?;
        let len = range.end.saturating_sub(range.start);
        let mut data = Vec::with_capacity(len.min(LOCAL_BUFFER_SIZE as u64 * 64) as usize);
        file.take(len).read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        tokio::fs::write(key, data).await.map_err(|e| map_io(e, key))
    }

    async fn append(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(key)
            .await
            .map_err(|e| map_io(e, key))?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tokio::fs::remove_file(key).await.map_err(|e| map_io(e, key))
    }

    /// Entries of the directory `prefix` names, or of its parent filtered
    /// by the remaining name prefix
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let is_dir = tokio::fs::metadata(prefix)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        let (dir, name_prefix) = if is_dir || prefix.ends_with('/') {
            (Path::new(prefix).to_path_buf(), String::new())
        } else {
            let path = Path::new(prefix);
            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (parent.to_path_buf(), name)
        };

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io(e, prefix))?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&name_prefix) {
                continue;
            }
            let metadata = entry.metadata().await?;
            let key = entry.path().to_string_lossy().into_owned();
            items.push(object_info(key, &metadata));
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn stat_dir(&self, key: &str) -> Result<ObjectInfo> {
        match self.stat(key).await {
            Ok(info) if info.is_dir => Ok(info),
            Ok(_) => Err(Error::NotFound(format!("{key} is not a directory"))),
            Err(err) => Err(err),
        }
    }

    async fn make_dir(&self, key: &str, parents: bool) -> Result<()> {
        let result = if parents {
            tokio::fs::create_dir_all(key).await
        } else {
            tokio::fs::create_dir(key).await
        };
        result.map_err(|e| map_io(e, key))
    }

    async fn remove_dir(&self, key: &str) -> Result<()> {
        tokio::fs::remove_dir(key).await.map_err(|e| map_io(e, key))
    }
}
