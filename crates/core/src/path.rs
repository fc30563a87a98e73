//! Path parsing and resolution
//!
//! Turns a user path or URL into an [`ObjectRef`]: the mounted driver that
//! owns it plus the backend-relative key. Paths no mount claims fall back to
//! the local filesystem when they look local.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{MountEntry, MountRegistry};
use crate::traits::StorageDriver;

/// A resolved (driver, key) pair
#[derive(Debug, Clone)]
pub struct ObjectRef {
    mount: Arc<MountEntry>,
    key: String,
}

impl ObjectRef {
    /// Reference `key` inside a mounted entry
    pub fn mounted(mount: Arc<MountEntry>, key: impl Into<String>) -> Self {
        Self {
            mount,
            key: key.into(),
        }
    }

    /// Backend-relative key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mount(&self) -> &Arc<MountEntry> {
        &self.mount
    }

    pub fn mount_id(&self) -> u64 {
        self.mount.id()
    }

    pub fn storage_name(&self) -> &str {
        self.mount.storage_name()
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        self.mount.driver()
    }

    /// Full path: mount prefix followed by the key
    pub fn url(&self) -> String {
        format!("{}{}", self.mount.prefix(), self.key)
    }

    /// Same mount, different key
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            mount: self.mount.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mount.prefix(), self.key)
    }
}

/// Resolve `path` against the registry, falling back to `local`
///
/// The longest mounted prefix wins. Unclaimed paths without a URL scheme
/// (or with `file://`) go to the local driver; anything else fails with
/// [`Error::UnmountedStorage`].
pub fn resolve(registry: &MountRegistry, local: &Arc<MountEntry>, path: &str) -> Result<ObjectRef> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    if let Some((entry, key)) = registry.lookup(path) {
        return Ok(ObjectRef::mounted(entry, key));
    }

    if is_local_path(path) {
        return Ok(ObjectRef::mounted(local.clone(), local_key(path)?));
    }

    Err(Error::UnmountedStorage(path.to_string()))
}

/// Whether a path should be handled by the local filesystem
///
/// Local paths are:
/// - `file://` URLs
/// - anything without a `scheme://` part (absolute, `./`, `../`, bare names,
///   Windows drive and UNC paths)
pub fn is_local_path(path: &str) -> bool {
    if path.starts_with("file://") {
        return true;
    }
    url_scheme(path).is_none()
}

/// Filesystem path for a local path or `file://` URL
pub fn local_key(path: &str) -> Result<String> {
    if !path.starts_with("file://") {
        return Ok(path.to_string());
    }

    let url = url::Url::parse(path)?;
    let file_path = url
        .to_file_path()
        .map_err(|_| Error::InvalidPath(format!("'{path}' is not a local file URL")))?;
    Ok(file_path.to_string_lossy().into_owned())
}

/// Scheme of a `scheme://...` string
///
/// A single letter before `:` is a Windows drive, not a scheme.
fn url_scheme(path: &str) -> Option<&str> {
    let (scheme, _) = path.split_once("://")?;
    let valid = scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
