//! # EmailIntelligence batch dispatch
//!
//! Bounded-concurrency batch execution for EmailIntelligence analyzers.
//!
//! ## Overview
//!
//! [`batch::BatchExecutor`] runs an async handler over a list of items, never
//! admitting more than a fixed number of handler bodies at once, and returns a
//! [`batch::BatchOutcome`] that separates successes, raised failures and
//! semantic rejections. One failing item never aborts the rest of the batch.
//!
//! [`analysis::AiController`] is the single-item entry point implemented by
//! analyzers such as [`analysis::ConflictAnalyzer`] and
//! [`analysis::FictionalityAnalyzer`]; [`analysis::batch_analyze`] fans it out
//! through an executor.
//!
//! ## Quick Start
//!
//! ```rust
//! use email_intelligence::batch::BatchExecutor;
//! use serde_json::json;
//!
//! # async fn example() -> email_intelligence::Result<()> {
//! let executor = BatchExecutor::new(2)?;
//!
//! let outcome = executor
//!     .run_batch(vec![1, 2, 3], |n: u32| async move {
//!         if n == 2 {
//!             Err(format!("item {n} failed"))
//!         } else {
//!             Ok(json!({ "value": n * 10 }))
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(outcome.total, 3);
//! assert_eq!(outcome.successful, 2);
//! assert_eq!(outcome.failed, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: Admission-gated batch executor and outcome types
//! - [`analysis`]: AI controller trait, completion clients and analyzers
//! - [`telemetry`]: Tracing subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for EmailIntelligence operations
pub type Result<T> = std::result::Result<T, IntelligenceError>;

/// Main error type for EmailIntelligence operations
#[derive(Error, Debug)]
pub enum IntelligenceError {
    /// Invalid executor or client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Analysis context is missing required fields
    #[error("Invalid analysis context: {0}")]
    InvalidContext(String),

    /// Completion provider returned an error response
    #[error("Client error: {0}")]
    Client(String),

    /// Completion provider is throttling requests
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider response could not be normalised
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Admission-gated batch execution
pub mod batch;

/// AI controllers and their collaborators
pub mod analysis;

/// Tracing setup
pub mod telemetry;
