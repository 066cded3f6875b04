//! Generation provider adapters.
//!
//! - `adapter`: `ProviderAdapter` / `PackagingAdapter` traits
//! - `retry`, `poller`: bounded polling with an injectable sleeper
//! - `suno`, `voice`: HTTP adapters
//! - `placeholder`, `scripted`: in-process adapters for dev mode and tests
//! - `parse`: lenient extraction shared with the callback receiver

pub mod adapter;
pub mod error;
pub mod http;
pub mod parse;
pub mod placeholder;
pub mod poller;
pub mod prompt;
pub mod retry;
pub mod scripted;
pub mod suno;
pub mod types;
pub mod voice;

pub use adapter::{PackagingAdapter, ProviderAdapter};
pub use error::ProviderError;
pub use placeholder::PlaceholderProvider;
pub use poller::{PollOutcome, Poller};
pub use prompt::{NudgeMood, nudge_spec, song_spec};
pub use retry::{BackoffStrategy, PollPolicy, RecordingSleeper, Sleeper, TokioSleeper};
pub use scripted::ScriptedProvider;
pub use suno::{SunoConfig, SunoProvider};
pub use types::{Artifact, CompletionMode, GenerationSpec, PollStatus, Submission};
pub use voice::{VoiceConfig, VoiceProvider};
