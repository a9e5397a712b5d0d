//! Owned pool of named background threads with bounded joins.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use flowstate_core::{Error, Result};
use tracing::{debug, error, warn};

/// Handle to one spawned job; yields the job's return value.
pub struct WorkerHandle<T> {
    name: String,
    result: Receiver<T>,
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait at most `timeout` for the job to finish.
    ///
    /// On timeout the job is abandoned; it keeps running detached and its
    /// result is discarded.
    pub fn join_timeout(self, timeout: Duration) -> Result<T> {
        match self.result.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(Error::StopTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Internal(format!("worker {} exited without a result", self.name)))
            }
        }
    }

    /// Result if the job already finished.
    pub fn try_join(&self) -> Option<T> {
        self.result.try_recv().ok()
    }
}

/// Spawns and tracks worker threads. Outstanding threads are joined on shutdown.
pub struct WorkerPool {
    prefix: String,
    spawned: u64,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            spawned: 0,
            threads: Vec::new(),
        }
    }

    /// Spawn `job` on a new named thread.
    pub fn spawn<T, F>(&mut self, role: &str, job: F) -> Result<WorkerHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.reap();
        self.spawned += 1;
        let name = format!("{}-{role}-{}", self.prefix, self.spawned);
        let (tx, rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let value = job();
                // Receiver may be gone after a timed-out join
                let _ = tx.send(value);
            })
            .map_err(|e| Error::Internal(format!("failed to spawn {name}: {e}")))?;
        debug!("Spawned worker {name}");
        self.threads.push((name.clone(), handle));
        Ok(WorkerHandle { name, result: rx })
    }

    /// Threads spawned and not yet joined.
    pub fn active(&mut self) -> usize {
        self.reap();
        self.threads.len()
    }

    /// Join every finished thread.
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.threads.len() {
            if self.threads[i].1.is_finished() {
                let (name, handle) = self.threads.swap_remove(i);
                if handle.join().is_err() {
                    error!("Worker {name} panicked");
                }
            } else {
                i += 1;
            }
        }
    }

    /// Join all threads, waiting at most `timeout` in total.
    ///
    /// Returns the number of threads left running detached.
    pub fn shutdown(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        while !self.threads.is_empty() && Instant::now() < deadline {
            self.reap();
            if !self.threads.is_empty() {
                thread::sleep(Duration::from_millis(2));
            }
        }
        self.reap();
        let detached = self.threads.len();
        for (name, _) in self.threads.drain(..) {
            warn!("Worker {name} did not stop within {timeout:?}; detaching");
        }
        detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_join_returns_value() {
        let mut pool = WorkerPool::new("test");
        let handle = pool.spawn("sum", || (1..=10).sum::<u32>()).unwrap();
        assert!(handle.name().starts_with("test-sum-"));
        assert_eq!(handle.join_timeout(Duration::from_secs(5)).unwrap(), 55);
        assert_eq!(pool.shutdown(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_join_timeout_is_bounded() {
        let mut pool = WorkerPool::new("test");
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let handle = pool
            .spawn("stuck", move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        let start = Instant::now();
        let err = handle.join_timeout(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, Error::StopTimeout { timeout_ms: 30 }));
        assert!(start.elapsed() < Duration::from_secs(1));

        release.store(true, Ordering::Relaxed);
        assert_eq!(pool.shutdown(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_shutdown_detaches_stuck_thread() {
        let mut pool = WorkerPool::new("test");
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let _handle = pool
            .spawn("stuck", move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        assert_eq!(pool.shutdown(Duration::from_millis(20)), 1);
        release.store(true, Ordering::Relaxed);
    }
}
