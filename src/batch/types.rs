//! Batch configuration, settlement classification and outcome types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{IntelligenceError, Result};

/// Default admission-gate capacity
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

const MAX_CONCURRENT_ENV: &str = "EMAIL_INTEL_MAX_CONCURRENT";
const ITEM_TIMEOUT_ENV: &str = "EMAIL_INTEL_ITEM_TIMEOUT_MS";

/// Key a handler sets in its returned object to report a semantic failure
pub const ERROR_KEY: &str = "error";

/// Progress callback type, called with `(settled, total)`
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Batch execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of handler invocations running at once
    pub max_concurrent: usize,
    /// Optional per-item timeout in milliseconds
    pub item_timeout_ms: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            item_timeout_ms: None,
        }
    }
}

impl BatchConfig {
    /// Load configuration from `EMAIL_INTEL_MAX_CONCURRENT` and
    /// `EMAIL_INTEL_ITEM_TIMEOUT_MS`, falling back to defaults when unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BatchConfig::from_env`] but reads variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_CONCURRENT_ENV) {
            config.max_concurrent = raw.trim().parse().map_err(|_| {
                IntelligenceError::Configuration(format!(
                    "{MAX_CONCURRENT_ENV} must be a positive integer, got {raw:?}"
                ))
            })?;
        }

        if let Some(raw) = lookup(ITEM_TIMEOUT_ENV) {
            let ms = raw.trim().parse().map_err(|_| {
                IntelligenceError::Configuration(format!(
                    "{ITEM_TIMEOUT_ENV} must be an integer number of milliseconds, got {raw:?}"
                ))
            })?;
            config.item_timeout_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working admission gate
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(IntelligenceError::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.item_timeout_ms == Some(0) {
            return Err(IntelligenceError::Configuration(
                "item_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-item timeout as a [`Duration`]
    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_ms.map(Duration::from_millis)
    }
}

/// Why an item ended up in the `failed` bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error
    Handler,
    /// The handler did not settle within the configured item timeout
    TimedOut,
    /// The handler panicked
    Panicked,
}

/// A value paired with the position of the input item that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedResult {
    /// Position of the item in the input batch
    pub index: usize,
    /// Value the handler returned
    pub value: Value,
}

/// A raised failure for one input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Position of the item in the input batch
    pub index: usize,
    /// What went wrong
    pub kind: FailureKind,
    /// Display string of the failure, also pushed to `errors`
    pub message: String,
}

/// How a single settled item is classified
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Object without an `"error"` key
    Succeeded(Value),
    /// Object carrying an `"error"` key, or a non-object value
    Rejected(Value),
    /// Raised, timed out or panicked
    Failed(FailureKind, String),
}

impl Settlement {
    /// Classify a value a handler returned without raising
    pub fn classify(value: Value) -> Self {
        match &value {
            Value::Object(map) if !map.contains_key(ERROR_KEY) => Settlement::Succeeded(value),
            _ => Settlement::Rejected(value),
        }
    }
}

/// Aggregate outcome of one batch run
///
/// `results`, `errors`, `failures` and `rejections` follow settlement order,
/// not input order. Every entry carries its input index where positional
/// correspondence matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Number of input items
    pub total: usize,
    /// Items that settled with an object lacking an `"error"` key
    pub successful: usize,
    /// Items whose handler raised, panicked or timed out
    pub failed: usize,
    /// Items that settled with a semantic failure
    pub rejected: usize,
    /// Successful values with their input index
    pub results: Vec<IndexedResult>,
    /// Display strings of every raised failure
    pub errors: Vec<String>,
    /// Structured form of `errors`
    pub failures: Vec<ItemFailure>,
    /// Semantically failed values with their input index
    pub rejections: Vec<IndexedResult>,
    /// Wall-clock time of the whole batch
    pub duration_ms: u64,
}

impl BatchOutcome {
    /// Empty outcome for a batch of `total` items
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Record one settled item
    pub fn record(&mut self, index: usize, settlement: Settlement) {
        match settlement {
            Settlement::Succeeded(value) => {
                self.successful += 1;
                self.results.push(IndexedResult { index, value });
            }
            Settlement::Rejected(value) => {
                self.rejected += 1;
                self.rejections.push(IndexedResult { index, value });
            }
            Settlement::Failed(kind, message) => {
                self.failed += 1;
                self.errors.push(message.clone());
                self.failures.push(ItemFailure { index, kind, message });
            }
        }
    }

    /// Items counted in `total` but neither successful nor failed
    pub fn unaccounted(&self) -> usize {
        self.total.saturating_sub(self.successful + self.failed)
    }

    /// True when every item succeeded
    pub fn is_complete_success(&self) -> bool {
        self.successful == self.total
    }

    /// Fraction of items that succeeded, `0.0` for an empty batch
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    /// Successful values sorted back into input order
    pub fn results_in_input_order(&self) -> Vec<&Value> {
        let mut ordered: Vec<&IndexedResult> = self.results.iter().collect();
        ordered.sort_by_key(|r| r.index);
        ordered.into_iter().map(|r| &r.value).collect()
    }

    /// Successful values in settlement order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.results.iter().map(|r| &r.value)
    }
}
