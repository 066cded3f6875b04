//! Infrastructure wiring: stores, providers, intake and callback receiver.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use songforge_infra::{
    CallbackReceiver, Intake, IntakeConfig, Providers, StatusBus, Stores, db, in_memory_status_bus,
};
use songforge_providers::{
    PackagingAdapter, PlaceholderProvider, ProviderAdapter, SunoConfig, SunoProvider, VoiceConfig, VoiceProvider,
};

use crate::config::AppConfig;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppServices {
    pub stores: Stores,
    pub providers: Providers,
    pub bus: StatusBus,
    pub intake: Intake,
    pub callbacks: CallbackReceiver,
    pub admin_token: Option<String>,
    pub persistent: bool,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("providers", &self.providers)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(stores: Stores, providers: Providers, bus: StatusBus, intake_config: IntakeConfig) -> Self {
        let intake = Intake::new(stores.clone(), providers.clone(), bus.clone(), intake_config);
        let callbacks = CallbackReceiver::new(stores.clone(), bus.clone());
        Self {
            stores,
            providers,
            bus,
            intake,
            callbacks,
            admin_token: None,
            persistent: false,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }
}

/// Select in-memory or Postgres stores and the configured provider adapters.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = if config.use_persistent_stores {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required when USE_PERSISTENT_STORES=true")?;
        let pool = db::connect(url, config.database_max_connections).await?;
        info!("using postgres stores");
        db::postgres_stores(pool, config.default_tier).await?
    } else {
        info!("using in-memory stores");
        Stores::in_memory(config.default_tier)
    };

    let providers = build_providers(config)?;
    info!(?providers, "providers configured");

    let mut services = AppServices::new(stores, providers, in_memory_status_bus(), config.intake_config())
        .with_admin_token(config.admin_token.clone());
    services.persistent = config.use_persistent_stores;
    Ok(services)
}

/// Real adapters where keys are configured; the placeholder everywhere else.
pub fn build_providers(config: &AppConfig) -> anyhow::Result<Providers> {
    let placeholder = Arc::new(PlaceholderProvider::default());

    let music: Arc<dyn ProviderAdapter>;
    let packaging: Arc<dyn PackagingAdapter>;
    match &config.suno_api_key {
        Some(key) => {
            let mut suno = SunoConfig::new(key.clone());
            if let Some(base) = &config.suno_base_url {
                suno = suno.with_base_url(base.clone());
            }
            let suno = Arc::new(SunoProvider::new(suno).context("music provider setup")?);
            music = suno.clone();
            packaging = suno;
        }
        None => {
            warn!("SUNO_API_KEY not set; songs use the placeholder provider");
            music = placeholder.clone();
            packaging = placeholder.clone();
        }
    }

    let voice: Arc<dyn ProviderAdapter> = match &config.voice_api_key {
        Some(key) => {
            let mut voice = VoiceConfig::new(key.clone());
            if let Some(base) = &config.voice_base_url {
                voice = voice.with_base_url(base.clone());
            }
            Arc::new(VoiceProvider::new(voice).context("voice provider setup")?)
        }
        None => {
            warn!("VOICE_API_KEY not set; nudges use the placeholder provider");
            placeholder
        }
    };

    Ok(Providers::new(music, voice).with_packaging(packaging))
}
