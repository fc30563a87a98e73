//! Object metadata cache
//!
//! Short-lived cache of stat results keyed by (mount id, key). Entries expire
//! after the TTL and are dropped whenever the object is written or deleted
//! through this process.
//!
//! Every invalidation advances a generation counter. A stat result is only
//! stored if no invalidation of its key, its mount or the whole cache
//! happened after the caller read [`MetadataCache::generation`], so a stat
//! that overlaps a write cannot put the old metadata back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::Result;
use crate::path::ObjectRef;
use crate::traits::ObjectInfo;

#[derive(Debug, Clone)]
struct CachedInfo {
    info: ObjectInfo,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    cached: Option<CachedInfo>,
    /// Generation of the last invalidation of this key, 0 if never
    invalidated: u64,
}

/// Cache of object metadata shared by every handle of a facade
#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    generation: AtomicU64,
    /// Generation of the last `clear`
    cleared: AtomicU64,
    entries: DashMap<(u64, String), Slot>,
    /// Generation of the last `invalidate_mount`, per mount id
    mounts: DashMap<u64, u64>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: AtomicU64::new(0),
            cleared: AtomicU64::new(0),
            entries: DashMap::new(),
            mounts: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current generation; read it before asking a driver for metadata
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cached metadata if present and younger than the TTL
    pub fn get(&self, object: &ObjectRef) -> Option<ObjectInfo> {
        let key = cache_key(object);
        let cached = self.entries.get(&key)?.cached.clone()?;
        if cached.cached_at.elapsed() < self.ttl {
            return Some(cached.info);
        }
        // Only evict the entry we saw; a concurrent refresh may have replaced it.
        let seen = |slot: &Slot| {
            slot.cached
                .as_ref()
                .is_some_and(|current| current.cached_at == cached.cached_at)
        };
        self.entries
            .remove_if(&key, |_, slot| slot.invalidated == 0 && seen(slot));
        if let Some(mut slot) = self.entries.get_mut(&key) {
            if seen(&*slot) {
                slot.cached = None;
            }
        }
        None
    }

    /// Store metadata fetched after `since` was read from [`Self::generation`]
    ///
    /// Dropped when the key, its mount or the cache was invalidated since.
    pub fn insert(&self, object: &ObjectRef, info: ObjectInfo, since: u64) {
        if self.ttl.is_zero() {
            return;
        }
        let cached = CachedInfo {
            info,
            cached_at: Instant::now(),
        };
        // The checks run under the shard lock so a concurrent invalidation
        // either rejects this insert or removes its entry afterwards.
        match self.entries.entry(cache_key(object)) {
            Entry::Occupied(mut entry) => {
                if entry.get().invalidated <= since && !self.fenced(object, since) {
                    entry.get_mut().cached = Some(cached);
                }
            }
            Entry::Vacant(entry) => {
                if !self.fenced(object, since) {
                    entry.insert(Slot {
                        cached: Some(cached),
                        invalidated: 0,
                    });
                }
            }
        }
    }

    fn fenced(&self, object: &ObjectRef, since: u64) -> bool {
        self.cleared.load(Ordering::SeqCst) > since
            || self
                .mounts
                .get(&object.mount_id())
                .is_some_and(|generation| *generation > since)
    }

    /// Stat through the cache, asking the driver on a miss
    pub async fn stat(&self, object: &ObjectRef) -> Result<ObjectInfo> {
        if let Some(info) = self.get(object) {
            tracing::trace!(object = %object, "metadata cache hit");
            return Ok(info);
        }

        tracing::debug!(object = %object, "metadata cache miss");
        let since = self.generation();
        let info = object.driver().stat(object.key()).await?;
        self.insert(object, info.clone(), since);
        Ok(info)
    }

    /// Drop the entry of one object
    ///
    /// The key keeps a tombstone with the invalidation generation until the
    /// mount or the cache is invalidated as a whole.
    pub fn invalidate(&self, object: &ObjectRef) {
        let generation = self.advance();
        let mut slot = self.entries.entry(cache_key(object)).or_default();
        slot.cached = None;
        slot.invalidated = generation;
    }

    /// Drop every entry of one mount registration
    pub fn invalidate_mount(&self, mount_id: u64) {
        let generation = self.advance();
        self.mounts.insert(mount_id, generation);
        self.entries.retain(|(id, _), _| *id != mount_id);
    }

    pub fn clear(&self) {
        let generation = self.advance();
        self.cleared.store(generation, Ordering::SeqCst);
        self.entries.clear();
        self.mounts.clear();
    }

    /// Number of live cached entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.cached.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn cache_key(object: &ObjectRef) -> (u64, String) {
    (object.mount_id(), object.key().to_string())
}
