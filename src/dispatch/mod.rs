use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sender::Sender;

mod queue;
mod retry;

pub use queue::DispatchQueue;
pub use retry::{MAX_RETRIES_EXCEEDED, RetryPolicy};

/// How long an idle worker waits on the queue before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Backoff after an unexpected worker error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Bound on joining each worker during shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded-concurrency priority dispatcher: a fixed pool of workers draining
/// the shared [`DispatchQueue`].
pub struct Dispatcher {
    queue: Arc<DispatchQueue>,
    sender: Sender,
    retry: RetryPolicy,
    worker_count: usize,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<DispatchQueue>,
        sender: Sender,
        retry: RetryPolicy,
        worker_count: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            sender,
            retry,
            worker_count,
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, priority: i64, message_id: crate::models::MessageId) {
        self.queue.push(priority, message_id);
    }

    /// Spawn the worker pool. Calling this on a running dispatcher is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().expect("worker list poisoned");
        if !workers.is_empty() {
            return;
        }

        for worker in 0..self.worker_count {
            let queue = self.queue.clone();
            let sender = self.sender.clone();
            let retry = self.retry.clone();
            let shutdown = self.shutdown.clone();

            workers.push(tokio::spawn(async move {
                run_worker(worker, queue, sender, retry, shutdown).await;
            }));
        }

        info!("started {} queue workers", self.worker_count);
    }

    /// Cooperative shutdown: workers observe the token between dequeue
    /// attempts, so in-flight sends run to completion.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().expect("worker list poisoned"));
        for (worker, handle) in workers.into_iter().enumerate() {
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!(worker, "worker did not stop in time");
            }
        }

        info!("all queue workers stopped");
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<DispatchQueue>,
    sender: Sender,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) {
    info!(worker, "worker started");

    while !shutdown.is_cancelled() {
        let Some((priority, message_id)) = queue.pop_timeout(POLL_INTERVAL).await else {
            continue;
        };

        debug!(
            worker,
            message_id = message_id.to_string(),
            priority,
            "processing message"
        );

        match sender.send(message_id).await {
            Ok(outcome) if outcome.is_failure() => {
                if let Err(err) = retry.handle_failure(message_id).await {
                    error!(
                        worker,
                        message_id = message_id.to_string(),
                        "retry handling failed: {err:?}"
                    );
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    worker,
                    message_id = message_id.to_string(),
                    "failed to process message: {err:?}"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    info!(worker, "worker stopped");
}
