//! dv_extract: Paced, resumable extraction for DataVault
//!
//! An [`ExtractionEngine`] pulls items from one [`SourceProvider`] in index
//! order, stores each as an encrypted record and reports status and progress
//! to listeners. A failed item is logged and counted; only an unreachable
//! source ends the job early.
//!
//! # Module layout
//! - `engine`    : the job state machine and fetch loop
//! - `source`    : provider trait, source descriptors, data kinds
//! - `mock`      : built-in datasets with simulated latency and failures
//! - `registry`  : one engine per data kind
//! - `state`     : status, progress and events
//! - `error`     : source and engine errors

pub mod engine;
pub mod error;
mod listeners;
pub mod mock;
pub mod registry;
pub mod source;
pub mod state;

pub use engine::{EngineConfig, ExtractionEngine};
pub use error::{ExtractError, SourceError};
pub use listeners::Subscription;
pub use mock::MockSource;
pub use registry::JobRegistry;
pub use source::{DataKind, SourceDescriptor, SourceProvider};
pub use state::{ExtractionState, ExtractionStatus, JobEvent, JobOutcome, Progress, StatusChange};
