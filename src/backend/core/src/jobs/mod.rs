//! Recurring batch jobs for Sweeper Core.
//!
//! This module provides the batch engine and the jobs built on it:
//!
//! - **RateGate**: minimum spacing between external calls
//! - **Retry**: classification of external failures and backoff decisions
//! - **Cursor**: offset/limit pagination over a store predicate
//! - **BatchRunner**: drives a cursor, processes items in order, tallies results
//! - **Scheduler**: interval loop with cooperative cancellation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           Recurring Batch Engine                             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │  Scheduler  │───▶│ BatchRunner │───▶│  RateGate   │───▶│  External   │  │
//! │  │ (Interval)  │    │  (Cursor)   │    │  + Retry    │    │  Service    │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │         │                  │                                                │
//! │         ▼                  ▼                                                │
//! │  ┌─────────────────────────────────────────────────────────────────────┐  │
//! │  │                          Specializations                             │  │
//! │  │  • Embedding Backfill   • Moderation    • Translation                │  │
//! │  │  • Stale Content        • Cleanup                                    │  │
//! │  └─────────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sweeper_core::jobs::{CleanupJob, IntervalSchedule, JobScheduler};
//!
//! let mut scheduler = JobScheduler::new();
//! scheduler.schedule_interval(
//!     Arc::new(CleanupJob::new(store.clone())),
//!     IntervalSchedule::new(Duration::from_secs(3600)).with_immediate(),
//! );
//!
//! let handle = scheduler.start();
//! shutdown_signal().await;
//! handle.shutdown();
//! handle.join().await;
//! ```

pub mod cursor;
pub mod rate_gate;
pub mod retry;
pub mod runner;
pub mod scheduler;

pub use cursor::{Cursor, CursorFetcher, WorkItem};
pub use rate_gate::RateGate;
pub use retry::{
    call_with_retry, Attempted, BackoffStrategy, RetryClass, RetryClassifier, RetryDecision,
    RetryPolicy, RetryState,
};
pub use runner::{
    BatchRunner, ItemContext, ItemOutcome, ItemProcessor, RunCounts, RunResult, RunnerConfig,
};
pub use scheduler::{
    execute, run_scheduled, run_with_schedule, IntervalSchedule, JobScheduler, ScheduleStats,
    ScheduledJob, SchedulerHandle,
};

// Specializations
pub mod cleanup;
pub mod embedding;
pub mod moderation;
pub mod stale;
pub mod translation;

pub use cleanup::{ClaimTokenStore, CleanupJob};
pub use embedding::{ContentType, EmbeddingBackfillJob, EmbeddingCandidate, EmbeddingStore};
pub use moderation::{ModerationCandidate, ModerationJob, ModerationStore, SpawnModerationTrigger};
pub use stale::{StaleContentJob, StaleContentResult, StaleContentStore, StaleThresholds};
pub use translation::{TranslationCandidate, TranslationJob, TranslationStore};
