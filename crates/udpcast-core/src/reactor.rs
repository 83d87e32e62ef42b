//! The shared event loop.
//!
//! A [`Reactor`] owns the tokio runtime that drives every channel's socket
//! I/O. Channels hold a cloneable [`ReactorHandle`] instead of the reactor
//! itself, so the runtime is only ever dropped by its owner.
//!
//! With one worker thread (the default) the reactor is a current-thread
//! runtime: nothing is dispatched until some thread calls [`Reactor::run`],
//! and every callback runs on that thread. With more workers it is a
//! multi-thread runtime whose named workers dispatch continuously, and `run`
//! simply parks the caller until [`Reactor::stop`].

use crate::error::ChannelError;
use crate::registry::{ChannelRegistry, ReactorStats};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, EnterGuard, Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Default name for reactor worker threads.
pub const DEFAULT_THREAD_NAME: &str = "udpcast-reactor";

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of worker threads. Values below one are treated as one.
    pub worker_threads: usize,
    /// Name given to worker threads.
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ReactorConfig {
    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

struct Shared {
    registry: ChannelRegistry,
    stopped: watch::Sender<bool>,
}

/// The event loop dispatching socket completions for all its channels.
pub struct Reactor {
    runtime: Runtime,
    handle: ReactorHandle,
    worker_threads: usize,
}

impl Reactor {
    /// Create a single-threaded reactor.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Reactor`] if the runtime cannot be built.
    pub fn new() -> Result<Self, ChannelError> {
        Self::with_config(ReactorConfig::default())
    }

    /// Create a reactor with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Reactor`] if the runtime cannot be built.
    pub fn with_config(config: ReactorConfig) -> Result<Self, ChannelError> {
        let worker_threads = config.worker_threads.max(1);

        let mut builder = if worker_threads == 1 {
            Builder::new_current_thread()
        } else {
            let mut builder = Builder::new_multi_thread();
            builder.worker_threads(worker_threads);
            builder
        };
        let runtime = builder
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(ChannelError::Reactor)?;

        let (stopped, _) = watch::channel(false);
        let handle = ReactorHandle {
            runtime: runtime.handle().clone(),
            shared: Arc::new(Shared {
                registry: ChannelRegistry::new(),
                stopped,
            }),
        };

        info!(workers = worker_threads, name = %config.thread_name, "Reactor created");

        Ok(Self {
            runtime,
            handle,
            worker_threads,
        })
    }

    /// Get a handle for opening channels and spawning work.
    #[must_use]
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Get the number of worker threads.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Block the calling thread, dispatching completions until [`stop`](Self::stop).
    ///
    /// Returns immediately if the reactor is already stopped. Must not be
    /// called from inside a reactor callback.
    pub fn run(&self) {
        let mut stopped = self.handle.shared.stopped.subscribe();
        info!("Reactor running");
        self.runtime.block_on(async move {
            // An error means the sender is gone, which only happens with the reactor.
            let _ = stopped.wait_for(|stopped| *stopped).await;
        });
        info!("Reactor stopped");
    }

    /// Ask [`run`](Self::run) to return. Callable from any thread.
    ///
    /// In-flight operations are not aborted; they resume on the next `run`
    /// (single worker) or keep running on the workers (multiple workers).
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Clear a previous [`stop`](Self::stop) so that `run` blocks again.
    pub fn restart(&self) {
        self.handle.shared.stopped.send_replace(false);
    }

    /// Check if a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }
}

/// Cloneable handle to a [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    runtime: Handle,
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Spawn a task on the reactor.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Ask the reactor's `run` to return. Callable from any thread, including callbacks.
    pub fn stop(&self) {
        if !self.shared.stopped.send_replace(true) {
            info!("Reactor stop requested");
        }
    }

    /// Check if a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.borrow()
    }

    /// Get the registry of open channels.
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.shared.registry
    }

    /// Aggregate statistics for all open channels.
    #[must_use]
    pub fn stats(&self) -> ReactorStats {
        self.shared.registry.stats()
    }

    /// Enter the runtime context, for registering sockets with its I/O driver.
    pub(crate) fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("channels", &self.shared.registry.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reactor_config_default() {
        let config = ReactorConfig::default();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        let reactor =
            Reactor::with_config(ReactorConfig::default().with_worker_threads(0)).unwrap();
        assert_eq!(reactor.worker_threads(), 1);
    }

    #[test]
    fn test_run_returns_after_stop() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let runner = Arc::clone(&reactor);
        let thread = thread::spawn(move || runner.run());

        thread::sleep(Duration::from_millis(20));
        assert!(!reactor.is_stopped());
        reactor.stop();
        thread.join().unwrap();
        assert!(reactor.is_stopped());
    }

    #[test]
    fn test_run_after_stop_returns_immediately() {
        let reactor = Reactor::new().unwrap();
        reactor.stop();
        reactor.run();

        reactor.restart();
        assert!(!reactor.is_stopped());
    }

    #[test]
    fn test_single_worker_dispatches_only_while_running() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let handle = reactor.handle();
        let (tx, rx) = mpsc::channel();

        let caller = thread::current().id();
        handle.spawn(async move {
            let _ = tx.send(thread::current().id());
        });

        // Nothing drives a current-thread runtime until run is called.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let runner = Arc::clone(&reactor);
        let thread = thread::spawn(move || runner.run());
        let dispatched_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(dispatched_on, caller);

        handle.stop();
        thread.join().unwrap();
    }

    #[test]
    fn test_stop_from_task() {
        let reactor =
            Reactor::with_config(ReactorConfig::default().with_worker_threads(2)).unwrap();
        let handle = reactor.handle();

        let stopper = handle.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stopper.stop();
        });

        reactor.run();
        assert!(handle.is_stopped());
    }
}
