//! Process configuration read from the environment.
//!
//! Every value has a local-development default. Unparseable numbers and flags
//! fall back to the default with a warning rather than aborting startup.

use std::str::FromStr;
use std::time::Duration;

use songforge_credits::CreditTier;
use songforge_infra::{IntakeConfig, WorkerConfig};
use songforge_providers::PollPolicy;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const CALLBACK_PATH: &str = "/callbacks/provider";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Postgres stores when `true`, in-memory otherwise.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub suno_api_key: Option<String>,
    pub suno_base_url: Option<String>,
    pub voice_api_key: Option<String>,
    pub voice_base_url: Option<String>,
    /// Public URL of the callback receiver.
    pub callback_url: Option<String>,
    pub worker_idle_interval: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub packaging_poll_max_attempts: u32,
    /// Tier given to accounts on first use.
    pub default_tier: CreditTier,
    /// Shared secret for `POST /credits/grant`. Grants are disabled when unset.
    pub admin_token: Option<String>,
    pub submit_on_enqueue: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 10,
            suno_api_key: None,
            suno_base_url: None,
            voice_api_key: None,
            voice_base_url: None,
            callback_url: None,
            worker_idle_interval: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(3000),
            poll_max_attempts: 60,
            packaging_poll_max_attempts: 20,
            default_tier: CreditTier::FreeWeekly { allowance: 1 },
            admin_token: None,
            submit_on_enqueue: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let allowance = parse_or(get("FREE_WEEKLY_ALLOWANCE"), "FREE_WEEKLY_ALLOWANCE", 1u32);
        let default_tier = match get("DEFAULT_TIER") {
            Some(name) => CreditTier::parse(&name, allowance).unwrap_or_else(|err| {
                warn!(value = %name, error = %err, "invalid DEFAULT_TIER; using free tier");
                CreditTier::FreeWeekly { allowance }
            }),
            None => CreditTier::FreeWeekly { allowance },
        };

        let callback_url = get("PROVIDER_CALLBACK_URL").or_else(|| {
            get("SITE_DOMAIN").map(|domain| {
                format!("https://{}{CALLBACK_PATH}", domain.trim_end_matches('/'))
            })
        });

        Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_persistent_stores: parse_flag(get("USE_PERSISTENT_STORES"), "USE_PERSISTENT_STORES", false),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            suno_api_key: get("SUNO_API_KEY"),
            suno_base_url: get("SUNO_BASE_URL"),
            voice_api_key: get("VOICE_API_KEY"),
            voice_base_url: get("VOICE_BASE_URL"),
            callback_url,
            worker_idle_interval: millis_or(get("WORKER_IDLE_INTERVAL_MS"), "WORKER_IDLE_INTERVAL_MS", 3000),
            poll_interval: millis_or(get("PROVIDER_POLL_INTERVAL_MS"), "PROVIDER_POLL_INTERVAL_MS", 3000),
            poll_max_attempts: parse_or(
                get("PROVIDER_POLL_MAX_ATTEMPTS"),
                "PROVIDER_POLL_MAX_ATTEMPTS",
                defaults.poll_max_attempts,
            ),
            packaging_poll_max_attempts: parse_or(
                get("PACKAGING_POLL_MAX_ATTEMPTS"),
                "PACKAGING_POLL_MAX_ATTEMPTS",
                defaults.packaging_poll_max_attempts,
            ),
            default_tier,
            admin_token: get("ADMIN_TOKEN"),
            submit_on_enqueue: parse_flag(get("SUBMIT_ON_ENQUEUE"), "SUBMIT_ON_ENQUEUE", defaults.submit_on_enqueue),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let poll = PollPolicy::fixed(self.poll_max_attempts, self.poll_interval);
        WorkerConfig::default()
            .with_idle_interval(self.worker_idle_interval)
            .with_packaging_poll(poll.clone().with_max_attempts(self.packaging_poll_max_attempts))
            .with_poll(poll)
            .with_callback_url(self.callback_url.clone())
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            submit_on_enqueue: self.submit_on_enqueue,
            callback_url: self.callback_url.clone(),
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, value = %value, default = %default, "invalid number; using default");
            default
        }),
    }
}

fn millis_or(raw: Option<String>, key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(parse_or(raw, key, default_ms))
}

fn parse_flag(raw: Option<String>, key: &str, default: bool) -> bool {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            warn!(key, value = %other, default, "invalid flag; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config(&[]), AppConfig::default());
    }

    #[test]
    fn reads_numbers_and_flags() {
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/songforge"),
            ("WORKER_IDLE_INTERVAL_MS", "250"),
            ("PROVIDER_POLL_MAX_ATTEMPTS", "5"),
            ("SUBMIT_ON_ENQUEUE", "off"),
        ]);
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/songforge"));
        assert_eq!(cfg.worker_idle_interval, Duration::from_millis(250));
        assert_eq!(cfg.poll_max_attempts, 5);
        assert!(!cfg.submit_on_enqueue);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = config(&[("PROVIDER_POLL_MAX_ATTEMPTS", "lots"), ("PROVIDER_POLL_INTERVAL_MS", "-5")]);
        assert_eq!(cfg.poll_max_attempts, 60);
        assert_eq!(cfg.poll_interval, Duration::from_millis(3000));
    }

    #[test]
    fn callback_url_derives_from_site_domain() {
        let cfg = config(&[("SITE_DOMAIN", "songs.example.com/")]);
        assert_eq!(cfg.callback_url.as_deref(), Some("https://songs.example.com/callbacks/provider"));

        let explicit = config(&[
            ("SITE_DOMAIN", "songs.example.com"),
            ("PROVIDER_CALLBACK_URL", "https://hooks.example.com/cb"),
        ]);
        assert_eq!(explicit.callback_url.as_deref(), Some("https://hooks.example.com/cb"));
    }

    #[test]
    fn default_tier_and_allowance() {
        let cfg = config(&[("FREE_WEEKLY_ALLOWANCE", "3")]);
        assert_eq!(cfg.default_tier, CreditTier::FreeWeekly { allowance: 3 });

        let cfg = config(&[("DEFAULT_TIER", "unlimited")]);
        assert_eq!(cfg.default_tier, CreditTier::Unlimited);

        let cfg = config(&[("DEFAULT_TIER", "platinum")]);
        assert_eq!(cfg.default_tier, CreditTier::FreeWeekly { allowance: 1 });
    }

    #[test]
    fn worker_config_carries_poll_budgets() {
        let cfg = config(&[
            ("PROVIDER_POLL_INTERVAL_MS", "10"),
            ("PROVIDER_POLL_MAX_ATTEMPTS", "7"),
            ("PACKAGING_POLL_MAX_ATTEMPTS", "2"),
            ("PROVIDER_CALLBACK_URL", "https://x/cb"),
        ]);
        let worker = cfg.worker_config();
        assert_eq!(worker.poll, PollPolicy::fixed(7, Duration::from_millis(10)));
        assert_eq!(worker.packaging_poll.max_attempts, 2);
        assert_eq!(worker.callback_url.as_deref(), Some("https://x/cb"));
    }
}
