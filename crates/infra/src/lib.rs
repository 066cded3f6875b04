//! Infrastructure layer: storage, background execution, provider callbacks.
//!
//! - `jobs`: generation job queue (in-memory + Postgres)
//! - `ledger`: per-user credit ledger (in-memory + Postgres)
//! - `results`: song / nudge records filled in on success
//! - `intake`: request-side enqueue with credit compensation
//! - `worker`: claim loop and per-kind workflows
//! - `callback`: inbound provider notifications

pub mod callback;
pub mod db;
pub mod intake;
pub mod jobs;
pub mod ledger;
pub mod pipeline;
pub mod results;
pub mod worker;

mod integration_tests;

pub use callback::{CallbackError, CallbackOutcome, CallbackReceiver};
pub use intake::{Accepted, GenerationError, Intake, IntakeConfig, NudgeRequest, SongRequest, VideoRequest};
pub use pipeline::{Providers, StatusBus, Stores, in_memory_status_bus};
pub use worker::{ProcessOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats, WorkerStatsSnapshot};
