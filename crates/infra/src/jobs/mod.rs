//! Generation job queue.
//!
//! ## Design
//!
//! - Jobs are claimed FIFO by creation time, one claimer per job
//! - Terminal transitions are compare-and-swap, so the worker's polling path
//!   and the callback receiver can race on the same job safely
//! - Jobs are never deleted here; retention is an external concern
//!
//! ## Components
//!
//! - `Job`, `JobKind`, `JobPayload`: the stored row and its typed payloads
//! - `JobStore`: persistence trait, with in-memory and Postgres implementations

pub mod postgres;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    Job, JobKind, JobPayload, JobStatus, NewJob, NudgePayload, SongPayload, VideoPackagingPayload,
};
