//! Mount registry
//!
//! Maps URL prefixes to driver instances. Writers serialize on a lock and
//! publish a fresh table; readers clone the current `Arc` and resolve
//! against that snapshot without holding any lock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::traits::{StorageDriver, StorageParameters};

/// A driver registered under one URL prefix
pub struct MountEntry {
    id: u64,
    prefix: String,
    storage_name: String,
    parameters: StorageParameters,
    driver: Arc<dyn StorageDriver>,
}

impl MountEntry {
    /// Entry living outside the registry (the local fallback); id 0 is
    /// never handed out by a registry
    pub(crate) fn detached(
        prefix: impl Into<String>,
        storage_name: impl Into<String>,
        driver: Arc<dyn StorageDriver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: 0,
            prefix: prefix.into(),
            storage_name: storage_name.into(),
            parameters: StorageParameters::new(),
            driver,
        })
    }

    /// Unique per registration; a replaced prefix gets a new id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn parameters(&self) -> &StorageParameters {
        &self.parameters
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    /// Same storage and same parameters as another registration
    fn same_configuration(&self, storage_name: &str, parameters: &StorageParameters) -> bool {
        self.storage_name == storage_name && &self.parameters == parameters
    }
}

impl fmt::Debug for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountEntry")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .field("storage_name", &self.storage_name)
            .finish_non_exhaustive()
    }
}

/// Options for mount calls
#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    /// Replace a differing configuration instead of failing
    pub replace: bool,
}

impl MountOptions {
    pub fn replace() -> Self {
        Self { replace: true }
    }
}

/// What a registration did to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Every prefix was already mounted with the same configuration
    Reused,
    /// At least one prefix was added or replaced
    Installed {
        /// Mount ids whose entries were displaced
        replaced: Vec<u64>,
    },
}

type MountTable = Arc<Vec<Arc<MountEntry>>>;

/// Process-wide table of mounted storages, owned by the facade
pub struct MountRegistry {
    table: RwLock<MountTable>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(Vec::new())),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Current table, in mount order
    pub fn snapshot(&self) -> MountTable {
        self.table.read().clone()
    }

    /// Whether every prefix is already mounted with this exact configuration
    pub fn is_mounted_with(
        &self,
        prefixes: &[String],
        storage_name: &str,
        parameters: &StorageParameters,
    ) -> bool {
        let table = self.snapshot();
        !prefixes.is_empty()
            && prefixes.iter().all(|prefix| {
                table.iter().any(|entry| {
                    entry.prefix == *prefix && entry.same_configuration(storage_name, parameters)
                })
            })
    }

    /// Register `driver` under every prefix in `prefixes`, all or nothing
    ///
    /// A prefix owned by a differing configuration fails the whole call with
    /// [`Error::ConfigurationConflict`] unless `options.replace` is set. A
    /// replaced configuration loses all of its prefixes, including those the
    /// new one does not claim.
    pub fn register(
        &self,
        prefixes: &[String],
        storage_name: &str,
        parameters: &StorageParameters,
        driver: Arc<dyn StorageDriver>,
        options: MountOptions,
    ) -> Result<Registration> {
        if prefixes.is_empty() {
            return Err(Error::Config(format!(
                "storage '{storage_name}' reported no URL prefix to mount"
            )));
        }
        if let Some(empty) = prefixes.iter().find(|p| p.is_empty()) {
            return Err(Error::InvalidPath(format!(
                "empty mount prefix '{empty}' for storage '{storage_name}'"
            )));
        }

        let _guard = self.write_lock.lock();
        let current = self.snapshot();

        let mut to_install = Vec::new();
        let mut replaced = Vec::new();
        for prefix in prefixes {
            match current.iter().find(|entry| entry.prefix == *prefix) {
                Some(existing) if existing.same_configuration(storage_name, parameters) => {}
                Some(existing) if options.replace => {
                    replaced.push(existing.id);
                    to_install.push(prefix.clone());
                }
                Some(existing) => {
                    return Err(Error::ConfigurationConflict(format!(
                        "prefix '{prefix}' is already mounted by '{}' with a different configuration",
                        existing.storage_name
                    )));
                }
                None => to_install.push(prefix.clone()),
            }
        }

        // Prefixes mounted together with a displaced entry go with it.
        let displaced: Vec<Arc<MountEntry>> = current
            .iter()
            .filter(|entry| replaced.contains(&entry.id))
            .cloned()
            .collect();
        for entry in current.iter() {
            let sibling = displaced
                .iter()
                .any(|d| d.same_configuration(&entry.storage_name, &entry.parameters));
            if sibling && !replaced.contains(&entry.id) && !prefixes.contains(&entry.prefix) {
                tracing::debug!(prefix = %entry.prefix, id = entry.id, "unmounted with replaced configuration");
                replaced.push(entry.id);
            }
        }

        if to_install.is_empty() {
            tracing::debug!(storage = storage_name, "mount reused existing configuration");
            return Ok(Registration::Reused);
        }

        let mut table: Vec<Arc<MountEntry>> = current
            .iter()
            .filter(|entry| !replaced.contains(&entry.id))
            .cloned()
            .collect();
        for prefix in to_install {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(storage = storage_name, prefix = %prefix, id, "mounted");
            table.push(Arc::new(MountEntry {
                id,
                prefix,
                storage_name: storage_name.to_string(),
                parameters: parameters.clone(),
                driver: driver.clone(),
            }));
        }
        *self.table.write() = Arc::new(table);

        Ok(Registration::Installed { replaced })
    }

    /// Remove the entry mounted at exactly `prefix`
    pub fn unregister(&self, prefix: &str) -> Result<Arc<MountEntry>> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();

        let Some(position) = current.iter().position(|entry| entry.prefix == prefix) else {
            return Err(Error::UnmountedStorage(prefix.to_string()));
        };

        let mut table = current.as_ref().clone();
        let removed = table.remove(position);
        *self.table.write() = Arc::new(table);

        tracing::debug!(prefix, id = removed.id, "unmounted");
        Ok(removed)
    }

    /// Remove every entry, returning them
    pub fn clear(&self) -> Vec<Arc<MountEntry>> {
        let _guard = self.write_lock.lock();
        let previous = std::mem::take(&mut *self.table.write());
        previous.as_ref().clone()
    }

    /// Longest-prefix match for `path`
    ///
    /// On equal lengths the most recently mounted entry wins. Returns the
    /// entry and the backend-relative key.
    pub fn lookup(&self, path: &str) -> Option<(Arc<MountEntry>, String)> {
        let table = self.snapshot();
        let mut best: Option<&Arc<MountEntry>> = None;
        for entry in table.iter() {
            if !path.starts_with(entry.prefix.as_str()) {
                continue;
            }
            match best {
                Some(current) if current.prefix.len() > entry.prefix.len() => {}
                _ => best = Some(entry),
            }
        }
        best.map(|entry| (entry.clone(), path[entry.prefix.len()..].to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;

    fn driver() -> Arc<dyn StorageDriver> {
        Arc::new(MemoryDriver::new())
    }

    fn prefixes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = MountRegistry::new();
        let params = StorageParameters::new();
        registry
            .register(&prefixes(&["s3://"]), "s3", &params, driver(), MountOptions::default())
            .unwrap();
        registry
            .register(
                &prefixes(&["s3://bucket/"]),
                "memory",
                &params,
                driver(),
                MountOptions::default(),
            )
            .unwrap();

        let (entry, key) = registry.lookup("s3://bucket/a/b.txt").unwrap();
        assert_eq!(entry.prefix(), "s3://bucket/");
        assert_eq!(key, "a/b.txt");

        let (entry, key) = registry.lookup("s3://other/c").unwrap();
        assert_eq!(entry.prefix(), "s3://");
        assert_eq!(key, "other/c");

        assert!(registry.lookup("gs://bucket/a").is_none());
    }

    #[test]
    fn test_identical_remount_is_reused() {
        let registry = MountRegistry::new();
        let params = StorageParameters::new().with("endpoint", "http://a");
        let roots = prefixes(&["s3://", "http://a/"]);

        let first = registry
            .register(&roots, "s3", &params, driver(), MountOptions::default())
            .unwrap();
        assert_eq!(first, Registration::Installed { replaced: vec![] });
        assert!(registry.is_mounted_with(&roots, "s3", &params));

        let second = registry
            .register(&roots, "s3", &params, driver(), MountOptions::default())
            .unwrap();
        assert_eq!(second, Registration::Reused);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_differing_remount_conflicts() {
        let registry = MountRegistry::new();
        let roots = prefixes(&["s3://"]);
        let a = StorageParameters::new().with("endpoint", "http://a");
        let b = StorageParameters::new().with("endpoint", "http://b");

        registry
            .register(&roots, "s3", &a, driver(), MountOptions::default())
            .unwrap();
        let err = registry
            .register(&roots, "s3", &b, driver(), MountOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict(_)));

        let (entry, _) = registry.lookup("s3://x").unwrap();
        assert_eq!(entry.parameters(), &a);
    }

    #[test]
    fn test_replace_swaps_entry() {
        let registry = MountRegistry::new();
        let roots = prefixes(&["s3://"]);
        let a = StorageParameters::new().with("endpoint", "http://a");
        let b = StorageParameters::new().with("endpoint", "http://b");

        registry
            .register(&roots, "s3", &a, driver(), MountOptions::default())
            .unwrap();
        let old_id = registry.lookup("s3://x").unwrap().0.id();

        let result = registry
            .register(&roots, "s3", &b, driver(), MountOptions::replace())
            .unwrap();
        assert_eq!(
            result,
            Registration::Installed {
                replaced: vec![old_id]
            }
        );

        let (entry, _) = registry.lookup("s3://x").unwrap();
        assert_eq!(entry.parameters(), &b);
        assert_ne!(entry.id(), old_id);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_replace_drops_every_prefix_of_the_old_configuration() {
        let registry = MountRegistry::new();
        let a = StorageParameters::new().with("endpoint", "http://host");
        let b = StorageParameters::new().with("region", "eu-west-1");
        registry
            .register(
                &prefixes(&["s3://", "http://host/"]),
                "s3",
                &a,
                driver(),
                MountOptions::default(),
            )
            .unwrap();
        let ids: Vec<u64> = registry.snapshot().iter().map(|e| e.id()).collect();

        let result = registry
            .register(&prefixes(&["s3://"]), "s3", &b, driver(), MountOptions::replace())
            .unwrap();
        assert_eq!(result, Registration::Installed { replaced: ids });

        assert!(registry.lookup("http://host/bucket/key").is_none());
        let (entry, _) = registry.lookup("s3://bucket/key").unwrap();
        assert_eq!(entry.parameters(), &b);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_conflict_installs_nothing() {
        let registry = MountRegistry::new();
        let a = StorageParameters::new().with("k", "a");
        let b = StorageParameters::new().with("k", "b");
        registry
            .register(&prefixes(&["x://"]), "s3", &a, driver(), MountOptions::default())
            .unwrap();

        let err = registry.register(
            &prefixes(&["y://", "x://"]),
            "s3",
            &b,
            driver(),
            MountOptions::default(),
        );
        assert!(err.is_err());
        assert!(registry.lookup("y://key").is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = MountRegistry::new();
        registry
            .register(
                &prefixes(&["mem://"]),
                "memory",
                &StorageParameters::new(),
                driver(),
                MountOptions::default(),
            )
            .unwrap();

        registry.unregister("mem://").unwrap();
        assert!(registry.lookup("mem://a").is_none());
        assert!(matches!(
            registry.unregister("mem://"),
            Err(Error::UnmountedStorage(_))
        ));
    }

    #[test]
    fn test_snapshot_survives_unregister() {
        let registry = MountRegistry::new();
        registry
            .register(
                &prefixes(&["mem://"]),
                "memory",
                &StorageParameters::new(),
                driver(),
                MountOptions::default(),
            )
            .unwrap();

        let snapshot = registry.snapshot();
        registry.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let registry = MountRegistry::new();
        let err = registry.register(
            &prefixes(&[""]),
            "memory",
            &StorageParameters::new(),
            driver(),
            MountOptions::default(),
        );
        assert!(matches!(err, Err(Error::InvalidPath(_))));
    }
}
