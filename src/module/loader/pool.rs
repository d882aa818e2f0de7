//! Scan pool
//!
//! Runs bundle scans on tokio's blocking pool so no bundle's I/O holds up another,
//! optionally capped by a semaphore. Releasing the pool cancels its token; scans that
//! have not started yet are skipped and running scans observe the token between units.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Worker pool for discovery jobs
#[derive(Debug)]
pub struct ScanPool {
    token: CancellationToken,
    limit: Option<Arc<Semaphore>>,
    released: AtomicBool,
}

impl ScanPool {
    /// Create a pool; `max_concurrent == 0` means unbounded
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            token: CancellationToken::new(),
            limit: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
            released: AtomicBool::new(false),
        }
    }

    /// Token observed by running jobs
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Cancel outstanding work and refuse new jobs
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.cancel();
        if let Some(limit) = &self.limit {
            limit.close();
        }
        debug!("Scan pool released");
    }

    /// Run every job and wait for all of them
    ///
    /// Results come back in job order. A job that was skipped (pool released) or that
    /// panicked yields `None`.
    pub async fn run_all<T, F>(&self, jobs: Vec<F>) -> Vec<Option<T>>
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let tasks = jobs.into_iter().map(|job| {
            let token = self.token.clone();
            let limit = self.limit.clone();
            async move {
                let _permit = match limit {
                    Some(limit) => match limit.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return None,
                    },
                    None => None,
                };
                if token.is_cancelled() {
                    return None;
                }

                match tokio::task::spawn_blocking(move || job(token)).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        error!("Scan task failed: {}", e);
                        None
                    }
                }
            }
        });

        join_all(tasks).await
    }
}
