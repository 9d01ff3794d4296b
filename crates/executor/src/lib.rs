//! Resilient operation executor for logsync
//!
//! Every component that talks to the external store goes through a
//! [`ResilientExecutor`]:
//!
//! - bounded attempts with fixed or exponential (optionally jittered) delay
//! - errors classified as transient or fatal through [`Classify`]
//! - optional result predicate for polling long-running tasks
//! - observation through [`RetryObserver`], [`TracingObserver`] by default

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod executor;
pub mod observer;
pub mod policy;

pub use classify::{Classify, ErrorClass};
pub use error::{ExecutorError, LastOutcome};
pub use executor::ResilientExecutor;
pub use observer::{NoopObserver, RetryObserver, TracingObserver};
pub use policy::{Backoff, RetryPolicy, RetryPolicyError, DEFAULT_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
