#![allow(clippy::result_large_err)]
//! # Sweeper Core
//!
//! Recurring batch jobs over a content store.
//!
//! ## Architecture
//!
//! - **Batch Engine**: cursor pagination, rate gating, retry classification and
//!   partial-failure accounting
//! - **Scheduler**: one interval loop per job with cooperative cancellation
//! - **Jobs**: embedding backfill, moderation, translation, stale content, cleanup
//! - **Services**: Voyage/Ollama embeddings and Groq moderation/translation
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod services;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SweeperError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SweeperError};
    pub use crate::jobs::{
        BatchRunner, CursorFetcher, IntervalSchedule, ItemContext, ItemOutcome, ItemProcessor,
        JobScheduler, RateGate, RetryClass, RetryClassifier, RetryPolicy, RunResult,
        RunnerConfig, ScheduledJob, SchedulerHandle, WorkItem,
    };
    pub use crate::services::{
        ContentModerator, Embedder, ExternalCallError, ModerationTrigger, Translator,
    };
}
