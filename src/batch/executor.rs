//! Bounded-concurrency batch executor
//!
//! Fans a caller-supplied async handler out over a list of items:
//! - Every item is spawned immediately; a shared semaphore caps how many
//!   handler bodies run at once
//! - Each unit holds an owned permit for its whole lifetime, so the slot is
//!   returned on success, error, timeout and panic alike
//! - Units live in a `JoinSet`; dropping the batch future aborts them
//! - Failures are contained per item and reported in the [`BatchOutcome`]
//! - Optional per-item timeout
//! - Progress callback as items settle

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::types::{
    BatchConfig, BatchOutcome, FailureKind, ProgressCallback, Settlement, DEFAULT_MAX_CONCURRENT,
    ERROR_KEY,
};
use crate::{IntelligenceError, Result};

/// Runs async handlers over batches of items with a fixed concurrency cap.
///
/// The admission gate is created once and shared by every `run_batch` call
/// made through the same executor, so concurrent batches on one instance
/// compete for the same slots.
pub struct BatchExecutor {
    /// Admission gate
    gate: Arc<Semaphore>,
    /// Capacity the gate was created with
    max_concurrent: usize,
    /// Timeout for individual handler invocations
    item_timeout: Option<Duration>,
    /// Progress callback
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("max_concurrent", &self.max_concurrent)
            .field("available_slots", &self.gate.available_permits())
            .field("item_timeout", &self.item_timeout)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl BatchExecutor {
    /// Create an executor admitting at most `max_concurrent` handlers at once.
    ///
    /// Fails with [`IntelligenceError::Configuration`] when `max_concurrent`
    /// is zero.
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(IntelligenceError::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if max_concurrent > Semaphore::MAX_PERMITS {
            return Err(IntelligenceError::Configuration(format!(
                "max_concurrent must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            gate: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            item_timeout: None,
            progress_callback: None,
        })
    }

    /// Create an executor from a validated [`BatchConfig`]
    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        let executor = Self::new(config.max_concurrent)?;
        match config.item_timeout() {
            Some(timeout) => executor.with_item_timeout(timeout),
            None => Ok(executor),
        }
    }

    /// Set timeout for individual handler invocations.
    ///
    /// A zero timeout would fail every item and is rejected with
    /// [`IntelligenceError::Configuration`].
    pub fn with_item_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(IntelligenceError::Configuration(
                "item timeout must be greater than zero".to_string(),
            ));
        }
        self.item_timeout = Some(timeout);
        Ok(self)
    }

    /// Set progress callback, invoked with `(settled, total)` as items settle
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Configured admission-gate capacity
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots not currently held by any running unit
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Configured per-item timeout
    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout
    }

    /// Run `handler` once for every item and aggregate the outcome.
    ///
    /// All items are scheduled at once in input order; the admission gate
    /// throttles how many handler bodies actually run. A handler error, a
    /// timeout or a panic marks only that item as failed. The call itself
    /// never fails.
    #[instrument(skip(self, items, handler), fields(item_count = items.len()))]
    pub async fn run_batch<T, F, Fut, E>(&self, items: Vec<T>, handler: F) -> BatchOutcome
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let batch_start = Instant::now();
        let total = items.len();
        let mut outcome = BatchOutcome::new(total);

        if items.is_empty() {
            info!("No items to execute in batch");
            return outcome;
        }

        info!(
            total_items = total,
            max_concurrent = self.max_concurrent,
            timeout = ?self.item_timeout,
            "Starting batch execution"
        );

        let handler = Arc::new(handler);
        // Dropping the set aborts every unit, so an abandoned batch releases
        // its slots instead of running on in the background
        let mut units = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let gate = Arc::clone(&self.gate);
            let handler = Arc::clone(&handler);
            let timeout = self.item_timeout;

            units.spawn(async move {
                // Held until this block exits, including abort
                let _permit = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Settlement::Failed(
                                FailureKind::Handler,
                                "admission gate closed".to_string(),
                            ),
                        )
                    }
                };
                debug!(index, "Acquired execution slot");

                let start = Instant::now();
                let call = AssertUnwindSafe(async move { (*handler)(item).await }).catch_unwind();
                let settled = match timeout {
                    Some(limit) => tokio::time::timeout(limit, call).await.ok(),
                    None => Some(call.await),
                };

                let settlement = match settled {
                    Some(Ok(Ok(value))) => Settlement::classify(value),
                    Some(Ok(Err(e))) => Settlement::Failed(FailureKind::Handler, e.to_string()),
                    Some(Err(payload)) => {
                        let message = panic_message(payload);
                        error!(index, panic = %message, "Handler panicked");
                        Settlement::Failed(
                            FailureKind::Panicked,
                            format!("handler panicked: {message}"),
                        )
                    }
                    None => Settlement::Failed(
                        FailureKind::TimedOut,
                        format!(
                            "timed out after {}ms",
                            timeout.map(|t| t.as_millis()).unwrap_or_default()
                        ),
                    ),
                };

                debug!(
                    index,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Item settled"
                );
                (index, settlement)
            });
        }

        let mut recorded = vec![false; total];
        let mut settled_count = 0;
        while let Some(joined) = units.join_next().await {
            let (index, settlement) = match joined {
                Ok(unit) => unit,
                Err(e) => {
                    // Panics are caught inside the unit; only cancellation lands here
                    error!(error = %e, "Task join error");
                    continue;
                }
            };
            recorded[index] = true;

            match &settlement {
                Settlement::Failed(kind, message) => {
                    warn!(index, kind = ?kind, error = %message, "Item failed")
                }
                Settlement::Rejected(value) => {
                    debug!(index, error = ?value.get(ERROR_KEY), "Item rejected")
                }
                Settlement::Succeeded(_) => {}
            }
            outcome.record(index, settlement);

            settled_count += 1;
            if let Some(ref callback) = self.progress_callback {
                callback(settled_count, total);
            }
        }

        for index in recorded
            .iter()
            .enumerate()
            .filter_map(|(index, done)| (!done).then_some(index))
        {
            outcome.record(
                index,
                Settlement::Failed(FailureKind::Handler, "task cancelled".to_string()),
            );
        }

        outcome.duration_ms = batch_start.elapsed().as_millis() as u64;
        let success_rate = outcome.success_rate() * 100.0;

        info!(
            total_items = outcome.total,
            successful = outcome.successful,
            failed = outcome.failed,
            rejected = outcome.rejected,
            success_rate = format!("{:.2}%", success_rate),
            batch_duration_ms = outcome.duration_ms,
            "Batch execution completed"
        );

        if success_rate < 80.0 && total > 5 {
            warn!(
                success_rate = format!("{:.2}%", success_rate),
                failed = outcome.failed,
                rejected = outcome.rejected,
                "High failure rate detected in batch execution"
            );
        }

        outcome
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            item_timeout: None,
            progress_callback: None,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
