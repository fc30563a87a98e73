//! StorageDriver trait definition
//!
//! A driver translates the unified object operations into one storage
//! system's native protocol. The core only talks to backends through this
//! trait, and backends declare what they can do through
//! [`DriverCapabilities`] instead of being probed at runtime.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata for an object or directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Backend-relative key
    pub key: String,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    /// ETag or checksum, used for optimistic concurrency on reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Whether this is a directory/prefix
    pub is_dir: bool,
}

impl ObjectInfo {
    /// Create a new ObjectInfo for a file
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: false,
        }
    }

    /// Create a new ObjectInfo for a directory/prefix
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: true,
        }
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// One uploaded part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Backend capability information
///
/// Handles read these flags at open time to pick their transfer strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Supports create/upload-part/complete/abort
    pub multipart: bool,

    /// Supports appending to an existing object
    pub append: bool,

    /// Smallest part the backend accepts (except the last one)
    pub min_part_size: u64,

    /// Buffer size that suits this backend's transfer granularity
    pub preferred_buffer_size: Option<usize>,
}

/// Connection parameters for a storage backend
///
/// Kept ordered so two configurations compare equal regardless of the
/// order their keys were inserted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageParameters(BTreeMap<String, String>);

impl StorageParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Get a parameter that the backend cannot work without
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::MissingParameter(key.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StorageParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Trait for object-storage backends
///
/// Keys are backend-relative: the mount prefix has already been stripped.
/// Implementations must map every native failure onto [`Error`]. Optional
/// capabilities default to `UnsupportedMode` and must be advertised through
/// [`StorageDriver::capabilities`] when overridden.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get backend capabilities
    fn capabilities(&self) -> DriverCapabilities;

    /// Get object metadata
    async fn stat(&self, key: &str) -> Result<ObjectInfo>;

    /// Read the bytes in `range`, clamped to the object end
    ///
    /// When `if_match` is set and the object's etag differs, fails with
    /// [`Error::StaleRead`].
    async fn get_range(
        &self,
        key: &str,
        range: Range<u64>,
        if_match: Option<String>,
    ) -> Result<Vec<u8>>;

    /// Replace the whole object
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart(&self, key: &str) -> Result<String> {
        Err(Error::UnsupportedMode(format!("multipart upload of {key}")))
    }

    /// Upload one part; part numbers start at 1
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<CompletedPart> {
        let _ = (upload_id, part_number, data);
        Err(Error::UnsupportedMode(format!("multipart upload of {key}")))
    }

    /// Commit the parts, in part-number order, as the object content
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let _ = (upload_id, parts);
        Err(Error::UnsupportedMode(format!("multipart upload of {key}")))
    }

    /// Discard an unfinished multipart upload
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let _ = upload_id;
        Err(Error::UnsupportedMode(format!("multipart upload of {key}")))
    }

    /// Append to the object, creating it if missing
    async fn append(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let _ = data;
        Err(Error::UnsupportedMode(format!("append to {key}")))
    }

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// List entries under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Metadata of the directory `key` names
    ///
    /// Object stores have no real directories: the default looks for a
    /// [`dir_marker`] object, then for any object below it.
    async fn stat_dir(&self, key: &str) -> Result<ObjectInfo> {
        let marker = dir_marker(key);
        match self.stat(&marker).await {
            Ok(info) => {
                let mut dir = ObjectInfo::dir(marker);
                dir.last_modified = info.last_modified;
                dir.etag = info.etag;
                return Ok(dir);
            }
            Err(Error::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        if self.list(&marker).await?.is_empty() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok(ObjectInfo::dir(marker))
    }

    /// Create the directory `key`; with `parents`, missing ancestors too
    ///
    /// The default writes an empty marker object. Ancestors of a marker are
    /// implied by its key, so `parents` changes nothing.
    async fn make_dir(&self, key: &str, parents: bool) -> Result<()> {
        let _ = parents;
        self.put(&dir_marker(key), Vec::new()).await
    }

    /// Remove the directory `key`, which the caller checked is empty
    async fn remove_dir(&self, key: &str) -> Result<()> {
        self.delete(&dir_marker(key)).await
    }
}

/// Key of the object standing in for the directory `key` (`key/`)
pub fn dir_marker(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

/// Builds drivers for one storage name
///
/// Registered on the facade so `mount("s3", parameters)` can construct the
/// right driver.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Storage name used in `mount` calls and config files
    fn storage_name(&self) -> &str;

    /// URL prefixes a driver built from `parameters` owns
    ///
    /// Computed without connecting, so an identical remount can be detected
    /// before any client is built.
    fn roots(&self, parameters: &StorageParameters) -> Result<Vec<String>>;

    /// Build a connected driver
    async fn connect(&self, parameters: &StorageParameters) -> Result<Arc<dyn StorageDriver>>;
}
