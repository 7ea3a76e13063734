//! Shared worker pool driving every session's I/O.
//!
//! A fixed number of tokio worker threads run one reactor. Any worker may
//! complete any session, so nothing scheduled here may rely on thread
//! affinity.

use log::info;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

use crate::error::{Error, Result};

pub struct WorkerPool {
    runtime: Option<Runtime>,
    threads: usize,
}

impl WorkerPool {
    /// Spin up `threads` workers.
    pub fn start(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::invalid_configuration("Invalid number of threads"));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("kv-gateway-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::invalid_configuration(format!("Failed to start worker pool: {}", e)))?;
        info!("Started worker pool with {} threads", threads);
        Ok(Self {
            runtime: Some(runtime),
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Handle for spawning sessions, or `None` after [`stop`](Self::stop).
    pub fn handle(&self) -> Option<&Handle> {
        self.runtime.as_ref().map(Runtime::handle)
    }

    /// Stop accepting work.
    ///
    /// Pending sessions are dropped and their results resolve to
    /// `Error::SessionAborted`. Idempotent. From plain threads this joins
    /// every worker. Inside an async context (including a watch callback on
    /// one of the pool's own workers) it only signals shutdown and returns.
    pub fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
                info!("Stopped worker pool without joining workers");
            } else {
                // Dropping the runtime blocks until all workers have exited
                drop(runtime);
                info!("Stopped worker pool");
            }
        }
    }
}

/// Run blocking `f` from whatever thread the caller is on.
///
/// On a worker of a multi-thread runtime the worker's other tasks are handed
/// off first, so sessions the caller waits on keep making progress.
pub(crate) fn block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
