use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use super::executor::{ConversionExecutor, ConversionTask};

pub type TaskReceiver = Arc<Mutex<mpsc::UnboundedReceiver<ConversionTask>>>;

#[derive(Debug, thiserror::Error)]
#[error("conversion queue is closed")]
pub struct QueueClosed;

/// Sending half of the conversion queue
///
/// The HTTP side only ever dispatches; workers decide when tasks run.
#[derive(Clone)]
pub struct ConversionQueue {
    tx: mpsc::UnboundedSender<ConversionTask>,
}

impl ConversionQueue {
    pub fn new() -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Arc::new(Mutex::new(rx)))
    }

    pub fn dispatch(&self, task: ConversionTask) -> Result<(), QueueClosed> {
        self.tx.send(task).map_err(|_| QueueClosed)
    }
}

/// Background worker for running conversions
pub struct JobWorker {
    executor: Arc<ConversionExecutor>,
    queue: TaskReceiver,
}

impl JobWorker {
    /// Create a new JobWorker instance
    pub fn new(executor: Arc<ConversionExecutor>, queue: TaskReceiver) -> Self {
        Self { executor, queue }
    }

    /// Run worker with semaphore-based bounded concurrency
    ///
    /// # Architecture
    /// - Takes the next task from the shared queue
    /// - Acquires a semaphore permit before spawning the conversion
    /// - Keeps spawned conversions in a `JoinSet` so none is detached
    /// - On shutdown, stops taking tasks and waits for in-flight conversions
    ///
    /// # Arguments
    /// - `worker_id` - Identifier for this worker instance
    /// - `semaphore` - Caps conversions running across all workers
    /// - `shutdown_rx` - Flips to `true` when the service is stopping
    pub async fn run(
        &self,
        worker_id: u32,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Worker {} started with semaphore-based concurrency", worker_id);
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let task = tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    Self::log_completion(worker_id, joined);
                    continue;
                }
                task = Self::next_task(&self.queue) => match task {
                    Some(task) => task,
                    None => {
                        info!("Worker {} found the queue closed", worker_id);
                        break;
                    }
                },
            };
            debug!("Worker {} picked up job {}", worker_id, task.job_id);

            // Wait for a free slot, but do not let shutdown strand the task
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = shutdown_rx.changed() => {
                    self.executor.abandon(&task, "conversion cancelled by shutdown");
                    break;
                }
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker {} failed to acquire semaphore: {:?}", worker_id, e);
                    self.executor.abandon(&task, "conversion could not be scheduled");
                    continue;
                }
            };

            let executor = self.executor.clone();
            in_flight.spawn(async move {
                executor.convert(&task).await;
                // Permit is released when the conversion finishes
                drop(permit);
            });
        }

        let remaining = in_flight.len();
        if remaining > 0 {
            info!("Worker {} waiting for {} in-flight conversions", worker_id, remaining);
        }
        while let Some(joined) = in_flight.join_next().await {
            Self::log_completion(worker_id, joined);
        }
        info!("Worker {} stopped", worker_id);
    }

    async fn next_task(queue: &TaskReceiver) -> Option<ConversionTask> {
        queue.lock().await.recv().await
    }

    fn log_completion(worker_id: u32, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            // convert() contains panics itself, so this is a cancelled task
            error!("Worker {} conversion task ended abnormally: {:?}", worker_id, e);
        }
    }
}
