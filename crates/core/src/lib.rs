//! objio-core: unified object-storage I/O
//!
//! This crate provides the storage abstraction behind objio, including:
//! - Mount registry and path resolution
//! - The StorageDriver trait every backend implements
//! - Object metadata cache
//! - Buffered file handles with ranged reads and multipart writes
//! - The Storage facade tying them together
//!
//! The public API is blocking; drivers are async and run on a tokio runtime
//! owned by the facade. The crate does not depend on any backend SDK: the
//! local filesystem and an in-memory store ship here, other backends plug in
//! through [`DriverFactory`].

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod local;
pub mod memory;
pub mod path;
pub mod registry;
pub mod retry;
mod runtime;
pub mod storage;
pub mod traits;

pub use cache::MetadataCache;
pub use config::{Config, ConfigManager, MountConfig, RetryConfig, TransferConfig};
pub use error::{Error, Result};
pub use handle::{FlushBehavior, ObjectFile, OpenMode, OpenOptions};
pub use local::LocalDriver;
pub use memory::{DriverStats, MemoryDriver, MemoryFactory};
pub use path::{ObjectRef, is_local_path};
pub use registry::{MountEntry, MountOptions, MountRegistry, Registration};
pub use storage::{Storage, StorageBuilder};
pub use traits::{
    CompletedPart, DriverCapabilities, DriverFactory, ObjectInfo, StorageDriver, StorageParameters,
    dir_marker,
};
