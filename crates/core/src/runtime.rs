//! Blocking bridge onto the async drivers
//!
//! The public API is synchronous. Every call enters the tokio runtime through
//! [`Executor::block_on`]; background part uploads are spawned onto the same
//! runtime.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Runtime handle, optionally owning the runtime it points to
#[derive(Clone)]
pub(crate) struct Executor {
    handle: Handle,
    runtime: Option<Arc<Runtime>>,
}

impl Executor {
    /// Build and own a multi-thread runtime
    pub(crate) fn owned(worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("objio-io");
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Use a runtime owned by the caller
    pub(crate) fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// Drive `future` to completion on the calling thread
    ///
    /// Fails instead of panicking when called from inside an async task.
    pub(crate) fn block_on<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if Handle::try_current().is_ok() {
            return Err(Error::General(
                "blocking storage call made from inside an async runtime".into(),
            ));
        }
        self.handle.block_on(future)
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("owned", &self.runtime.is_some())
            .finish()
    }
}
