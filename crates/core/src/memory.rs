//! In-process object storage
//!
//! A complete [`StorageDriver`] backed by a hash map. Useful as an ephemeral
//! `mem://` mount and as a test double: capabilities are configurable, every
//! call is counted, and failures can be injected per operation.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::traits::{
    CompletedPart, DriverCapabilities, DriverFactory, ObjectInfo, StorageDriver,
    StorageParameters,
};

/// Default root for memory mounts
pub const MEMORY_ROOT: &str = "mem://";

/// Driver operations, for counters and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Stat,
    GetRange,
    Put,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    Append,
    Delete,
    List,
}

/// Number of calls per operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub stat: u64,
    pub get_range: u64,
    pub put: u64,
    pub create_multipart: u64,
    pub upload_part: u64,
    pub complete_multipart: u64,
    pub abort_multipart: u64,
    pub append: u64,
    pub delete: u64,
    pub list: u64,
}

impl DriverStats {
    fn record(&mut self, op: Operation) {
        let counter = match op {
            Operation::Stat => &mut self.stat,
            Operation::GetRange => &mut self.get_range,
            Operation::Put => &mut self.put,
            Operation::CreateMultipart => &mut self.create_multipart,
            Operation::UploadPart => &mut self.upload_part,
            Operation::CompleteMultipart => &mut self.complete_multipart,
            Operation::AbortMultipart => &mut self.abort_multipart,
            Operation::Append => &mut self.append,
            Operation::Delete => &mut self.delete,
            Operation::List => &mut self.list,
        };
        *counter += 1;
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified: jiff::Timestamp,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

/// Hash-map backed storage driver
#[derive(Debug)]
pub struct MemoryDriver {
    capabilities: DriverCapabilities,
    objects: Mutex<HashMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    stats: Mutex<DriverStats>,
    failures: Mutex<HashMap<Operation, u32>>,
    sequence: AtomicU64,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Multipart and append capable store
    pub fn new() -> Self {
        Self::with_capabilities(DriverCapabilities {
            multipart: true,
            append: true,
            min_part_size: 0,
            preferred_buffer_size: None,
        })
    }

    pub fn with_capabilities(capabilities: DriverCapabilities) -> Self {
        Self {
            capabilities,
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            stats: Mutex::new(DriverStats::default()),
            failures: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(1),
        }
    }

    /// Store an object directly, bypassing counters
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        let object = self.new_object(data);
        self.objects.lock().insert(key.into(), object);
    }

    /// Object content, bypassing counters
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(key)
    }

    pub fn stats(&self) -> DriverStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = DriverStats::default();
    }

    /// Multipart uploads created but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Make the next `count` calls of `op` fail with `BackendUnavailable`
    pub fn fail_next(&self, op: Operation, count: u32) {
        self.failures.lock().insert(op, count);
    }

    fn new_object(&self, data: Vec<u8>) -> StoredObject {
        StoredObject {
            data,
            etag: format!("m{}", self.next_sequence()),
            last_modified: jiff::Timestamp::now(),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn enter(&self, op: Operation) -> Result<()> {
        self.stats.lock().record(op);

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::BackendUnavailable(format!(
                    "injected failure for {op:?}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities.clone()
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        self.enter(Operation::Stat)?;
        let objects = self.objects.lock();
        let object = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let mut info = ObjectInfo::file(key, object.data.len() as u64);
        info.etag = Some(object.etag.clone());
        info.last_modified = Some(object.last_modified);
        Ok(info)
    }

    async fn get_range(
        &self,
        key: &str,
        range: Range<u64>,
        if_match: Option<String>,
    ) -> Result<Vec<u8>> {
        self.enter(Operation::GetRange)?;
        let objects = self.objects.lock();
        let object = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if let Some(expected) = if_match {
            if expected != object.etag {
                return Err(Error::StaleRead(format!(
                    "{key} changed (etag {expected} -> {})",
                    object.etag
                )));
            }
        }

        let len = object.data.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        Ok(object.data[start..end.max(start)].to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.enter(Operation::Put)?;
        let object = self.new_object(data);
        self.objects.lock().insert(key.to_string(), object);
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        if !self.capabilities.multipart {
            return Err(Error::UnsupportedMode(format!("multipart upload of {key}")));
        }
        self.enter(Operation::CreateMultipart)?;
        let upload_id = format!("upload-{}", self.next_sequence());
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<CompletedPart> {
        self.enter(Operation::UploadPart)?;
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| Error::NotFound(format!("upload {upload_id} for {key}")))?;

        upload.parts.insert(part_number, data);
        Ok(CompletedPart {
            part_number,
            etag: format!("{upload_id}-{part_number}"),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        self.enter(Operation::CompleteMultipart)?;
        let upload = {
            let mut uploads = self.uploads.lock();
            match uploads.get(upload_id) {
                Some(u) if u.key == key => uploads.remove(upload_id),
                _ => None,
            }
        }
        .ok_or_else(|| Error::NotFound(format!("upload {upload_id} for {key}")))?;

        let mut data = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(Error::General(format!(
                    "parts of {upload_id} are not in ascending order"
                )));
            }
            previous = part.part_number;
            let bytes = upload.parts.get(&part.part_number).ok_or_else(|| {
                Error::General(format!("part {} of {upload_id} was never uploaded", part.part_number))
            })?;
            data.extend_from_slice(bytes);
        }

        let object = self.new_object(data);
        self.objects.lock().insert(key.to_string(), object);
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.enter(Operation::AbortMultipart)?;
        let mut uploads = self.uploads.lock();
        match uploads.get(upload_id) {
            Some(u) if u.key == key => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(Error::NotFound(format!("upload {upload_id} for {key}"))),
        }
    }

    async fn append(&self, key: &str, data: Vec<u8>) -> Result<()> {
        if !self.capabilities.append {
            return Err(Error::UnsupportedMode(format!("append to {key}")));
        }
        self.enter(Operation::Append)?;
        let mut objects = self.objects.lock();
        let mut content = objects.remove(key).map(|o| o.data).unwrap_or_default();
        content.extend_from_slice(&data);
        objects.insert(key.to_string(), self.new_object(content));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.enter(Operation::Delete)?;
        self.objects
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.enter(Operation::List)?;
        let objects = self.objects.lock();
        let mut items: Vec<ObjectInfo> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| {
                let mut info = ObjectInfo::file(key.clone(), object.data.len() as u64);
                info.etag = Some(object.etag.clone());
                info.last_modified = Some(object.last_modified);
                info
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

/// Factory for `memory` mounts
///
/// Parameters: `root` (default `mem://`), `multipart` and `append`
/// (`true`/`false`, default `true`), `min_part_size` in bytes.
#[derive(Debug, Default)]
pub struct MemoryFactory;

#[async_trait]
impl DriverFactory for MemoryFactory {
    fn storage_name(&self) -> &str {
        "memory"
    }

    fn roots(&self, parameters: &StorageParameters) -> Result<Vec<String>> {
        Ok(vec![parameters.get("root").unwrap_or(MEMORY_ROOT).to_string()])
    }

    async fn connect(&self, parameters: &StorageParameters) -> Result<Arc<dyn StorageDriver>> {
        let flag = |name: &str| -> Result<bool> {
            match parameters.get(name) {
                None => Ok(true),
                Some(value) => value.parse().map_err(|_| {
                    Error::Config(format!("memory parameter '{name}' must be true or false"))
                }),
            }
        };
        let min_part_size = match parameters.get("min_part_size") {
            None => 0,
            Some(value) => value.parse().map_err(|_| {
                Error::Config("memory parameter 'min_part_size' must be a byte count".into())
            })?,
        };

        Ok(Arc::new(MemoryDriver::with_capabilities(DriverCapabilities {
            multipart: flag("multipart")?,
            append: flag("append")?,
            min_part_size,
            preferred_buffer_size: None,
        })))
    }
}
