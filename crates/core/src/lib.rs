//! `songforge-core`: shared building blocks for the generation pipeline.
//!
//! This crate contains **pure** primitives (no IO, no storage, no HTTP).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, ResultId, UserId};
