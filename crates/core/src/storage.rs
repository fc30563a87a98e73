//! Unified storage facade
//!
//! [`Storage`] owns the mount registry, the metadata cache and the runtime
//! the drivers run on. Everything a caller does goes through it: mounting
//! backends, opening handles, and the os-like helpers.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::cache::MetadataCache;
use crate::config::{Config, RetryConfig, TransferConfig};
use crate::error::{Error, Result};
use crate::handle::{HandleContext, ObjectFile, OpenMode, OpenOptions};
use crate::local::LocalDriver;
use crate::memory::MemoryFactory;
use crate::path::{self, ObjectRef};
use crate::registry::{MountEntry, MountOptions, MountRegistry, Registration};
use crate::runtime::Executor;
use crate::traits::{DriverFactory, ObjectInfo, StorageDriver, StorageParameters, dir_marker};

/// Builder for [`Storage`]
pub struct StorageBuilder {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
    transfer: TransferConfig,
    retry: RetryConfig,
    runtime: Option<Handle>,
    worker_threads: Option<usize>,
}

impl Default for StorageBuilder {
    fn default() -> Self {
        let mut builder = Self {
            factories: HashMap::new(),
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            runtime: None,
            worker_threads: None,
        };
        builder.add_factory(Arc::new(MemoryFactory));
        builder
    }
}

impl StorageBuilder {
    /// Register a driver factory; a later factory with the same storage
    /// name replaces the earlier one
    pub fn factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.add_factory(factory);
        self
    }

    fn add_factory(&mut self, factory: Arc<dyn DriverFactory>) {
        self.factories
            .insert(factory.storage_name().to_string(), factory);
    }

    pub fn transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run drivers on a runtime owned by the caller instead of a private one
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Worker threads of the private runtime
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn build(self) -> Result<Storage> {
        let executor = match self.runtime {
            Some(handle) => Executor::from_handle(handle),
            None => Executor::owned(self.worker_threads)?,
        };
        let cache = Arc::new(MetadataCache::new(self.transfer.cache_ttl()));

        Ok(Storage {
            registry: MountRegistry::new(),
            factories: self.factories,
            local: MountEntry::detached("", "local", Arc::new(LocalDriver::new())),
            context: Arc::new(HandleContext {
                cache,
                executor,
                transfer: self.transfer,
                retry: self.retry,
            }),
        })
    }
}

/// Filesystem-like access to every mounted backend
///
/// All methods block the calling thread and must not be called from inside
/// an async task.
pub struct Storage {
    registry: MountRegistry,
    factories: HashMap<String, Arc<dyn DriverFactory>>,
    local: Arc<MountEntry>,
    context: Arc<HandleContext>,
}

impl Storage {
    pub fn builder() -> StorageBuilder {
        StorageBuilder::default()
    }

    /// Facade with default settings and only the built-in storages
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Facade configured from a config file, with its mounts established
    pub fn from_config(config: &Config, factories: Vec<Arc<dyn DriverFactory>>) -> Result<Self> {
        let builder = factories.into_iter().fold(
            Self::builder()
                .transfer(config.transfer.clone())
                .retry(config.retry.clone()),
            StorageBuilder::factory,
        );
        let storage = builder.build()?;

        for mount in &config.mounts {
            storage.mount(&mount.storage, &mount.parameters)?;
        }
        Ok(storage)
    }

    /// Storage names that `mount` accepts
    pub fn storage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn transfer(&self) -> &TransferConfig {
        &self.context.transfer
    }

    /// Mount a storage under every root its factory reports
    ///
    /// Returns the roots. Remounting an identical configuration is a no-op.
    pub fn mount(&self, storage_name: &str, parameters: &StorageParameters) -> Result<Vec<String>> {
        self.mount_with(storage_name, parameters, MountOptions::default())
    }

    pub fn mount_with(
        &self,
        storage_name: &str,
        parameters: &StorageParameters,
        options: MountOptions,
    ) -> Result<Vec<String>> {
        let factory = self.factory(storage_name)?;
        let roots = factory.roots(parameters)?;
        if self.registry.is_mounted_with(&roots, storage_name, parameters) {
            tracing::debug!(storage = storage_name, "already mounted with this configuration");
            return Ok(roots);
        }

        let driver = self.context.executor.block_on(factory.connect(parameters))?;
        self.install(storage_name, &roots, parameters, driver, options)?;
        Ok(roots)
    }

    /// Prefixes a mount of `storage_name` with `parameters` would claim
    pub fn roots(&self, storage_name: &str, parameters: &StorageParameters) -> Result<Vec<String>> {
        self.factory(storage_name)?.roots(parameters)
    }

    fn factory(&self, storage_name: &str) -> Result<&Arc<dyn DriverFactory>> {
        self.factories
            .get(storage_name)
            .ok_or_else(|| Error::UnknownStorage(storage_name.to_string()))
    }

    /// Mount an already-built driver under `prefixes`
    pub fn mount_driver(
        &self,
        storage_name: &str,
        prefixes: &[&str],
        parameters: &StorageParameters,
        driver: Arc<dyn StorageDriver>,
        options: MountOptions,
    ) -> Result<Vec<String>> {
        let roots: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        self.install(storage_name, &roots, parameters, driver, options)?;
        Ok(roots)
    }

    fn install(
        &self,
        storage_name: &str,
        roots: &[String],
        parameters: &StorageParameters,
        driver: Arc<dyn StorageDriver>,
        options: MountOptions,
    ) -> Result<()> {
        match self
            .registry
            .register(roots, storage_name, parameters, driver, options)?
        {
            Registration::Reused => {}
            Registration::Installed { replaced } => {
                for id in replaced {
                    self.context.cache.invalidate_mount(id);
                }
                tracing::info!(storage = storage_name, roots = ?roots, "mounted storage");
            }
        }
        Ok(())
    }

    /// Remove the mount at exactly `prefix`
    pub fn unmount(&self, prefix: &str) -> Result<()> {
        let entry = self.registry.unregister(prefix)?;
        self.context.cache.invalidate_mount(entry.id());
        tracing::info!(prefix, storage = entry.storage_name(), "unmounted storage");
        Ok(())
    }

    /// Current mounts, in mount order
    pub fn mounts(&self) -> Vec<Arc<MountEntry>> {
        self.registry.snapshot().as_ref().clone()
    }

    pub fn resolve(&self, path: &str) -> Result<ObjectRef> {
        path::resolve(&self.registry, &self.local, path)
    }

    /// Backend-relative key of `path`
    pub fn relpath(&self, path: &str) -> Result<String> {
        Ok(self.resolve(path)?.key().to_string())
    }

    /// Open a handle; see [`OpenMode`] for the accepted modes
    pub fn open(&self, path: &str, mode: &str) -> Result<ObjectFile> {
        self.open_with(path, mode, &OpenOptions::default())
    }

    pub fn open_with(&self, path: &str, mode: &str, options: &OpenOptions) -> Result<ObjectFile> {
        let mode = OpenMode::parse(mode)?;
        let object = self.resolve(path)?;
        ObjectFile::open(object, mode, options, self.context.clone())
    }

    /// Object metadata, served from the cache when fresh
    pub fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let object = self.resolve(path)?;
        self.context
            .executor
            .block_on(self.context.cache.stat(&object))
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_file(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(info) => Ok(!info.is_dir),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn size(&self, path: &str) -> Result<u64> {
        Ok(self.stat(path)?.size)
    }

    /// Whether `path` names a directory, a marker or a non-empty prefix
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        let object = self.resolve(path)?;
        match self.stat_dir(&object) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Last modification time
    pub fn mtime(&self, path: &str) -> Result<jiff::Timestamp> {
        self.stat(path)?.last_modified.ok_or_else(|| {
            Error::UnsupportedMode(format!("'{path}' reports no modification time"))
        })
    }

    /// Whether both paths resolve to the same object of the same mount
    pub fn samefile(&self, a: &str, b: &str) -> Result<bool> {
        let (a, b) = (self.resolve(a)?, self.resolve(b)?);
        Ok(a.mount_id() == b.mount_id()
            && a.key().trim_end_matches('/') == b.key().trim_end_matches('/'))
    }

    /// Create one directory; fails if `path` exists
    pub fn mkdir(&self, path: &str) -> Result<()> {
        let object = self.resolve(path)?;
        if self.occupied(&object)? {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.make_dir(&object, false)
    }

    /// Create a directory and its missing ancestors
    pub fn makedirs(&self, path: &str, exist_ok: bool) -> Result<()> {
        let object = self.resolve(path)?;
        if self.occupied(&object)? {
            if exist_ok && self.stat_dir(&object).is_ok() {
                return Ok(());
            }
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.make_dir(&object, true)
    }

    /// Remove an empty directory
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let object = self.resolve(path)?;
        let dir = self.stat_dir(&object)?;
        let entries = self
            .context
            .executor
            .block_on(object.driver().list(&dir_marker(object.key())))?;
        // The marker lists itself on object stores.
        if entries.iter().any(|entry| entry.key != dir.key) {
            return Err(Error::DirectoryNotEmpty(path.to_string()));
        }

        let result = self
            .context
            .executor
            .block_on(object.driver().remove_dir(object.key()));
        self.context.cache.invalidate(&object);
        self.context
            .cache
            .invalidate(&object.with_key(dir_marker(object.key())));
        result
    }

    /// Entries under `path`
    pub fn list(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        let object = self.resolve(path)?;
        self.context
            .executor
            .block_on(object.driver().list(object.key()))
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        let object = self.resolve(path)?;
        let result = self
            .context
            .executor
            .block_on(object.driver().delete(object.key()));
        self.context.cache.invalidate(&object);
        result
    }

    /// Stream `src` into `dst`, possibly across mounts; returns bytes copied
    pub fn copy(&self, src: &str, dst: &str) -> Result<u64> {
        let mut reader = self.open(src, "rb")?;
        let mut writer = self.open(dst, "wb")?;

        match io::copy(&mut reader, &mut writer) {
            Ok(bytes) => {
                writer.close()?;
                tracing::debug!(src, dst, bytes, "copied");
                Ok(bytes)
            }
            Err(err) => {
                writer.abort();
                Err(Error::from_io(err))
            }
        }
    }
}

impl Storage {
    fn stat_dir(&self, object: &ObjectRef) -> Result<ObjectInfo> {
        self.context
            .executor
            .block_on(object.driver().stat_dir(object.key()))
    }

    /// Whether a file or a directory already sits at `object`
    fn occupied(&self, object: &ObjectRef) -> Result<bool> {
        if !object.key().is_empty() && !object.key().ends_with('/') {
            match self.context.executor.block_on(self.context.cache.stat(object)) {
                Ok(_) => return Ok(true),
                Err(Error::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        match self.stat_dir(object) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn make_dir(&self, object: &ObjectRef, parents: bool) -> Result<()> {
        let result = self
            .context
            .executor
            .block_on(object.driver().make_dir(object.key(), parents));
        self.context
            .cache
            .invalidate(&object.with_key(dir_marker(object.key())));
        tracing::debug!(object = %object, parents, "created directory");
        result
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("mounts", &self.registry.snapshot().len())
            .field("storages", &self.storage_names())
            .finish_non_exhaustive()
    }
}
