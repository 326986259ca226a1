//! Configuration management.
//!
//! Every tunable of the engine lives here as an explicit struct passed into the
//! jobs at construction time. Values come from `SWEEPER__*` environment
//! variables, optionally layered over a config file.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SweeperError};
use crate::jobs::embedding::ContentType;
use crate::jobs::retry::RetryPolicy;
use crate::jobs::runner::RunnerConfig;
use crate::jobs::stale::StaleThresholds;
use crate::telemetry::logging::LoggingConfig;
use crate::telemetry::metrics::MetricsConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// External service credentials and endpoints
    #[serde(default)]
    pub services: ServicesConfig,

    /// Per-job schedules and limits
    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Secret,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

/// A credential that never shows up in logs.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("[REDACTED]")
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// External Services
// ═══════════════════════════════════════════════════════════════════════════════

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Voyage,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub embedding_provider: EmbeddingProvider,

    #[serde(default)]
    pub voyage_api_key: Secret,

    #[serde(default = "default_voyage_base_url")]
    pub voyage_base_url: String,

    #[serde(default = "default_voyage_model")]
    pub voyage_model: String,

    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    #[serde(default)]
    pub groq_api_key: Secret,

    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,

    #[serde(default = "default_moderation_model")]
    pub moderation_model: String,

    #[serde(default = "default_translation_model")]
    pub translation_model: String,

    /// Timeout for embedding requests
    #[serde(default = "default_embedding_timeout", with = "humantime_serde")]
    pub embedding_timeout: Duration,

    #[serde(default = "default_moderation_timeout", with = "humantime_serde")]
    pub moderation_timeout: Duration,

    #[serde(default = "default_translation_timeout", with = "humantime_serde")]
    pub translation_timeout: Duration,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::default(),
            voyage_api_key: Secret::default(),
            voyage_base_url: default_voyage_base_url(),
            voyage_model: default_voyage_model(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
            groq_api_key: Secret::default(),
            groq_base_url: default_groq_base_url(),
            moderation_model: default_moderation_model(),
            translation_model: default_translation_model(),
            embedding_timeout: default_embedding_timeout(),
            moderation_timeout: default_moderation_timeout(),
            translation_timeout: default_translation_timeout(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub embedding: EmbeddingJobConfig,

    #[serde(default)]
    pub moderation: ModerationJobConfig,

    #[serde(default)]
    pub translation: TranslationJobConfig,

    #[serde(default)]
    pub stale: StaleJobConfig,

    #[serde(default)]
    pub cleanup: CleanupJobConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_embedding_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: u32,

    /// Calls per second, 0 disables pacing
    #[serde(default = "default_embedding_rate_limit")]
    pub rate_limit: f64,

    #[serde(default)]
    pub dry_run: bool,

    /// Comma separated list, or "all"
    #[serde(default = "default_content_types")]
    pub content_types: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_rate_limit_base_delay", with = "humantime_serde")]
    pub rate_limit_base_delay: Duration,
}

impl Default for EmbeddingJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_embedding_interval(),
            batch_size: default_embedding_batch_size(),
            rate_limit: default_embedding_rate_limit(),
            dry_run: false,
            content_types: default_content_types(),
            max_attempts: default_max_attempts(),
            rate_limit_base_delay: default_rate_limit_base_delay(),
        }
    }
}

impl EmbeddingJobConfig {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size,
            rate_limit: self.rate_limit,
            dry_run: self.dry_run,
            max_batches: None,
            retry: RetryPolicy::default()
                .with_max_attempts(self.max_attempts)
                .with_rate_limit_base_delay(self.rate_limit_base_delay),
        }
    }

    pub fn content_types(&self) -> Result<Vec<ContentType>> {
        ContentType::parse_list(&self.content_types)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_moderation_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_moderation_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_moderation_rate_limit")]
    pub rate_limit: f64,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Escalation step when the moderation API gives no usable Retry-After
    #[serde(default = "default_moderation_base_delay", with = "humantime_serde")]
    pub rate_limit_base_delay: Duration,

    /// Retry-After hints below this are replaced by the escalation step
    #[serde(default = "default_retry_after_floor", with = "humantime_serde")]
    pub retry_after_floor: Duration,
}

impl Default for ModerationJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_moderation_interval(),
            batch_size: default_moderation_batch_size(),
            rate_limit: default_moderation_rate_limit(),
            dry_run: false,
            max_attempts: default_max_attempts(),
            rate_limit_base_delay: default_moderation_base_delay(),
            retry_after_floor: default_retry_after_floor(),
        }
    }
}

impl ModerationJobConfig {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size,
            rate_limit: self.rate_limit,
            dry_run: self.dry_run,
            max_batches: None,
            retry: RetryPolicy::moderation()
                .with_max_attempts(self.max_attempts)
                .with_rate_limit_base_delay(self.rate_limit_base_delay)
                .with_retry_after_floor(self.retry_after_floor),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_translation_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_translation_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_translation_rate_limit")]
    pub rate_limit: f64,

    /// Batches per run; the daily budget is one small batch per tick
    #[serde(default = "default_translation_max_batches")]
    pub max_batches: u32,

    #[serde(default)]
    pub dry_run: bool,
}

impl Default for TranslationJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_translation_interval(),
            batch_size: default_translation_batch_size(),
            rate_limit: default_translation_rate_limit(),
            max_batches: default_translation_max_batches(),
            dry_run: false,
        }
    }
}

impl TranslationJobConfig {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            batch_size: self.batch_size,
            rate_limit: self.rate_limit,
            dry_run: self.dry_run,
            max_batches: (self.max_batches > 0).then_some(self.max_batches),
            retry: RetryPolicy::translation(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaleJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_stale_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_warn_after", with = "humantime_serde")]
    pub warn_after: Duration,

    #[serde(default = "default_abandon_after", with = "humantime_serde")]
    pub abandon_after: Duration,

    #[serde(default = "default_dormant_after", with = "humantime_serde")]
    pub dormant_after: Duration,

    /// Count what each step would touch, write nothing
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for StaleJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_stale_interval(),
            warn_after: default_warn_after(),
            abandon_after: default_abandon_after(),
            dormant_after: default_dormant_after(),
            dry_run: false,
        }
    }
}

impl StaleJobConfig {
    pub fn thresholds(&self) -> Result<StaleThresholds> {
        if self.warn_after >= self.abandon_after {
            return Err(SweeperError::config(format!(
                "stale warn_after ({:?}) must be shorter than abandon_after ({:?})",
                self.warn_after, self.abandon_after
            )));
        }
        Ok(StaleThresholds {
            warn_after: self.warn_after,
            abandon_after: self.abandon_after,
            dormant_after: self.dormant_after,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CleanupJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_cleanup_interval(),
            dry_run: false,
        }
    }
}

// Default value functions
fn default_environment() -> String { "production".to_string() }
fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(30) }
fn default_voyage_base_url() -> String { "https://api.voyageai.com/v1".to_string() }
fn default_voyage_model() -> String { "voyage-code-3".to_string() }
fn default_ollama_base_url() -> String { "http://localhost:11434/v1".to_string() }
fn default_ollama_model() -> String { "nomic-embed-text".to_string() }
fn default_groq_base_url() -> String { "https://api.groq.com/openai/v1".to_string() }
fn default_moderation_model() -> String { "openai/gpt-oss-safeguard-20b".to_string() }
fn default_translation_model() -> String { "llama-3.3-70b-versatile".to_string() }
fn default_embedding_timeout() -> Duration { Duration::from_secs(30) }
fn default_moderation_timeout() -> Duration { Duration::from_secs(10) }
fn default_translation_timeout() -> Duration { Duration::from_secs(15) }
fn default_max_attempts() -> u32 { 3 }
fn default_rate_limit_base_delay() -> Duration { Duration::from_secs(5) }
fn default_moderation_base_delay() -> Duration { Duration::from_secs(30) }
fn default_retry_after_floor() -> Duration { Duration::from_secs(1) }
fn default_content_types() -> String { "all".to_string() }
// embedding backfill: every 6h, 100 per batch, 50 calls/s
fn default_embedding_interval() -> Duration { Duration::from_secs(6 * 3600) }
fn default_embedding_batch_size() -> u32 { 100 }
fn default_embedding_rate_limit() -> f64 { 50.0 }
// moderation: hourly, 10 per batch, 1 call/s
fn default_moderation_interval() -> Duration { Duration::from_secs(3600) }
fn default_moderation_batch_size() -> u32 { 10 }
fn default_moderation_rate_limit() -> f64 { 1.0 }
// translation: every 12h, one batch of 5, 10s apart
fn default_translation_interval() -> Duration { Duration::from_secs(12 * 3600) }
fn default_translation_batch_size() -> u32 { 5 }
fn default_translation_rate_limit() -> f64 { 0.1 }
fn default_translation_max_batches() -> u32 { 1 }
// stale content: daily; warn at 23d, abandon at 30d, dormant at 60d
fn default_stale_interval() -> Duration { Duration::from_secs(24 * 3600) }
fn default_warn_after() -> Duration { Duration::from_secs(23 * 86400) }
fn default_abandon_after() -> Duration { Duration::from_secs(30 * 86400) }
fn default_dormant_after() -> Duration { Duration::from_secs(60 * 86400) }
fn default_cleanup_interval() -> Duration { Duration::from_secs(3600) }

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SWEEPER").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SWEEPER").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_job_defaults() {
        let jobs = JobsConfig::default();
        assert_eq!(jobs.translation.batch_size, 5);
        assert_eq!(jobs.translation.interval, Duration::from_secs(43200));
        assert_eq!(jobs.embedding.batch_size, 100);
        assert_eq!(jobs.moderation.rate_limit_base_delay, Duration::from_secs(30));
        assert_eq!(jobs.stale.abandon_after, Duration::from_secs(30 * 86400));
        assert_eq!(jobs.cleanup.interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_translation_runner_caps_batches() {
        let runner = TranslationJobConfig::default().runner_config();
        assert_eq!(runner.max_batches, Some(1));
        assert!(!runner.retry.retry_rate_limited);
    }

    #[test]
    fn test_stale_thresholds_validated() {
        let mut cfg = StaleJobConfig::default();
        assert!(cfg.thresholds().is_ok());
        cfg.warn_after = cfg.abandon_after;
        assert!(cfg.thresholds().is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("gsk_live_abcdef");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.expose(), "gsk_live_abcdef");
    }

    #[test]
    fn test_from_file_with_humantime_durations() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
environment = "development"

[database]
url = "postgres://localhost/sweeper"

[jobs.translation]
interval = "6h"
batch_size = 3

[jobs.stale]
warn_after = "20days"
dry_run = true
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cfg = Config::from_file(&path).unwrap();
        assert!(cfg.is_development());
        assert_eq!(cfg.database.url.expose(), "postgres://localhost/sweeper");
        assert_eq!(cfg.jobs.translation.interval, Duration::from_secs(6 * 3600));
        assert_eq!(cfg.jobs.translation.batch_size, 3);
        assert_eq!(cfg.jobs.stale.warn_after, Duration::from_secs(20 * 86400));
        assert!(cfg.jobs.stale.dry_run);
        assert!(!cfg.jobs.cleanup.dry_run);
        assert_eq!(cfg.jobs.moderation.batch_size, 10);
    }
}
