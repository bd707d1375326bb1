//! Bounded pool of tasks running VM creation and destruction jobs.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CloudError, CloudResult};
use crate::provider::BoxFuture;

pub type Job = BoxFuture<'static, ()>;

/// A fixed number of tasks consuming jobs from one queue.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..size.max(1))
            .map(|i| {
                let rx = rx.clone();
                let pool = name.to_string();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(pool = %pool, worker = i, "pool worker exited");
                })
            })
            .collect();
        Self {
            name: name.to_string(),
            tx: std::sync::Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job; fails once the pool is shut down.
    pub fn submit(&self, job: Job) -> CloudResult<()> {
        let guard = self.tx.lock().map_err(|_| CloudError::Terminated)?;
        let tx = guard.as_ref().ok_or(CloudError::Terminated)?;
        tx.send(job).map_err(|_| CloudError::Terminated)
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}
