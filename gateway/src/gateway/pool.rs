//! Bounded worker pool for blocking detections.
//!
//! A fixed number of worker tasks pull items from a shared FIFO and run the
//! detector on tokio's blocking threads, so at most `worker_count` detections
//! run at once. Slots are reserved synchronously at enqueue time: an item
//! either gets a worker, waits in the queue, or is rejected with
//! [`GatewayError::QueueSaturated`] right away.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use ppe_common::DetectionResult;

use crate::decode::DecodedImage;
use crate::detector::{DetectionEngine, DetectionError};
use crate::error::GatewayError;
use crate::limiter::ResourceLimiter;

type Completion = oneshot::Sender<Result<DetectionResult, GatewayError>>;

/// One detection request travelling through the pool.
pub struct WorkItem {
    pub image: DecodedImage,
    pub confidence: f32,
    /// When this item was accepted.
    pub enqueued_at: Instant,
    respond_to: Completion,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub running: usize,
    pub queued: usize,
    pub max_queue_depth: usize,
}

/// Reserved slots. `running + queued` equals the number of accepted items
/// whose result has not been produced yet.
#[derive(Debug, Default)]
struct Occupancy {
    running: usize,
    queued: usize,
}

impl Occupancy {
    fn release(&mut self) {
        // FIFO: a finished item hands its worker to the oldest queued one.
        if self.queued > 0 {
            self.queued -= 1;
        } else {
            self.running = self.running.saturating_sub(1);
        }
    }
}

fn lock(occupancy: &Mutex<Occupancy>) -> MutexGuard<'_, Occupancy> {
    occupancy.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool shared by every connection.
pub struct WorkerPool {
    limiter: Arc<ResourceLimiter>,
    engine: Arc<DetectionEngine>,
    occupancy: Arc<Mutex<Occupancy>>,
    sender: mpsc::UnboundedSender<WorkItem>,
}

impl WorkerPool {
    /// Create the pool and spawn its workers. Must be called within a tokio runtime.
    pub fn new(limiter: Arc<ResourceLimiter>, engine: Arc<DetectionEngine>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let occupancy = Arc::new(Mutex::new(Occupancy::default()));

        let worker_count = limiter.config().worker_count;
        for worker_id in 0..worker_count {
            tokio::spawn(worker_loop(
                worker_id,
                receiver.clone(),
                engine.clone(),
                occupancy.clone(),
            ));
        }
        tracing::info!(
            workers = worker_count,
            max_queue_depth = limiter.config().max_queue_depth,
            "Detection worker pool started"
        );

        Self {
            limiter,
            engine,
            occupancy,
            sender,
        }
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    /// Accept an item or reject it immediately.
    ///
    /// Returns a receiver that resolves when a worker has finished the item.
    pub fn enqueue(
        &self,
        image: DecodedImage,
        confidence: f32,
    ) -> Result<oneshot::Receiver<Result<DetectionResult, GatewayError>>, GatewayError> {
        self.reserve()?;

        let (tx, rx) = oneshot::channel();
        let item = WorkItem {
            image,
            confidence,
            enqueued_at: Instant::now(),
            respond_to: tx,
        };

        if self.sender.send(item).is_err() {
            lock(&self.occupancy).release();
            return Err(GatewayError::DetectionFailure(
                "worker pool is shut down".to_string(),
            ));
        }

        Ok(rx)
    }

    /// Enqueue an item and wait up to `timeout` for its result.
    ///
    /// A timeout only stops the wait: the detection keeps its slot until the
    /// detector returns, and its result is then discarded.
    pub async fn submit(
        &self,
        image: DecodedImage,
        confidence: f32,
        timeout: Duration,
    ) -> Result<DetectionResult, GatewayError> {
        let rx = self.enqueue(image, confidence)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::DetectionFailure(
                "worker dropped the request".to_string(),
            )),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Detection timed out");
                Err(GatewayError::DetectionTimeout(timeout))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let occupancy = lock(&self.occupancy);
        PoolStats {
            workers: self.limiter.config().worker_count,
            running: occupancy.running,
            queued: occupancy.queued,
            max_queue_depth: self.limiter.config().max_queue_depth,
        }
    }

    fn reserve(&self) -> Result<(), GatewayError> {
        let mut occupancy = lock(&self.occupancy);

        if occupancy.running < self.limiter.config().worker_count {
            occupancy.running += 1;
            Ok(())
        } else if self.limiter.can_enqueue(occupancy.queued) {
            occupancy.queued += 1;
            Ok(())
        } else {
            tracing::warn!(
                running = occupancy.running,
                queued = occupancy.queued,
                "Detection queue saturated"
            );
            Err(GatewayError::QueueSaturated)
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    engine: Arc<DetectionEngine>,
    occupancy: Arc<Mutex<Occupancy>>,
) {
    loop {
        let item = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(item) = item else {
            break;
        };

        let WorkItem {
            image,
            confidence,
            enqueued_at,
            respond_to,
        } = item;
        let waited_ms = enqueued_at.elapsed().as_millis() as u64;

        let engine = engine.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.run(&image, confidence)).await;

        let result = match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::warn!(worker_id, error = %e, "Detection failed");
                Err(GatewayError::from(e))
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "cancelled".to_string()
                };
                tracing::error!(worker_id, reason = %reason, "Detector panicked");
                Err(GatewayError::from(DetectionError::Panicked(reason)))
            }
        };

        lock(&occupancy).release();

        tracing::debug!(
            worker_id,
            waited_ms,
            total_ms = enqueued_at.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Work item finished"
        );

        if respond_to.send(result).is_err() {
            tracing::debug!(worker_id, "Requester gone, result discarded");
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
