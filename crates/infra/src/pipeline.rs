//! Shared handles passed to the intake, worker and callback receiver.

use std::sync::Arc;

use songforge_credits::CreditTier;
use songforge_events::{EventBus, InMemoryEventBus, StatusEvent};
use songforge_providers::{PackagingAdapter, PlaceholderProvider, ProviderAdapter};

use crate::jobs::{InMemoryJobStore, JobStore};
use crate::ledger::{CreditLedger, InMemoryCreditLedger};
use crate::results::{InMemoryResultSink, ResultSink};

/// Status bus keyed by provider correlation id.
pub type StatusBus = Arc<dyn EventBus<StatusEvent>>;

pub fn in_memory_status_bus() -> StatusBus {
    Arc::new(InMemoryEventBus::<StatusEvent>::new())
}

/// Storage collaborators.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub results: Arc<dyn ResultSink>,
}

impl Stores {
    pub fn new(jobs: Arc<dyn JobStore>, ledger: Arc<dyn CreditLedger>, results: Arc<dyn ResultSink>) -> Self {
        Self { jobs, ledger, results }
    }

    /// Process-local stores; new accounts get `default_tier`.
    pub fn in_memory(default_tier: CreditTier) -> Self {
        Self {
            jobs: InMemoryJobStore::arc(),
            ledger: Arc::new(InMemoryCreditLedger::new(default_tier)),
            results: InMemoryResultSink::arc(),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Provider adapters by workflow.
#[derive(Clone)]
pub struct Providers {
    /// Songs.
    pub music: Arc<dyn ProviderAdapter>,
    /// Daily nudges.
    pub voice: Arc<dyn ProviderAdapter>,
    /// Optional audio to video step. `None` disables packaging.
    pub packaging: Option<Arc<dyn PackagingAdapter>>,
}

impl Providers {
    pub fn new(music: Arc<dyn ProviderAdapter>, voice: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            music,
            voice,
            packaging: None,
        }
    }

    pub fn with_packaging(mut self, packaging: Arc<dyn PackagingAdapter>) -> Self {
        self.packaging = Some(packaging);
        self
    }

    /// Every workflow completes immediately with sample media.
    pub fn placeholder() -> Self {
        let provider = Arc::new(PlaceholderProvider::default());
        Self::new(provider.clone(), provider)
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("music", &self.music.name())
            .field("voice", &self.voice.name())
            .field("packaging", &self.packaging.is_some())
            .finish()
    }
}
