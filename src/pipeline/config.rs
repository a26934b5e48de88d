//! Pipeline configuration.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Default blocklist of structural/non-personal email local-parts.
///
/// An email whose local-part (case-insensitive) matches one of these is
/// treated as a role account, not a contact, at any domain.
pub const DEFAULT_EMAIL_BLOCKLIST: &[&str] = &[
    "test",
    "noreply",
    "no-reply",
    "donotreply",
    "do-not-reply",
    "admin",
    "webmaster",
    "postmaster",
    "mailer-daemon",
    "abuse",
    "example",
];

/// Configuration for the pipeline executor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Search settings
    /// Overall timeout for the parallel search group.
    pub group_timeout: Duration,
    /// Per-unit timeout used when capacity detection fails.
    pub fallback_unit_timeout: Duration,

    // Enrichment settings
    /// Timeout for a single enrichment call.
    pub enrichment_timeout: Duration,

    // Filtering settings
    /// Blocked email local-parts.
    pub email_blocklist: Vec<String>,

    // Scoring weights
    /// Weight of keyword overlap between lead text and the original query.
    pub keyword_weight: f64,
    /// Weight of the location-match boost.
    pub location_weight: f64,
    /// Weight of the normalized external rating.
    pub rating_weight: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            group_timeout: Duration::from_secs(120),
            fallback_unit_timeout: Duration::from_secs(30),
            enrichment_timeout: Duration::from_secs(30),
            email_blocklist: DEFAULT_EMAIL_BLOCKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keyword_weight: 0.5,
            location_weight: 0.2,
            rating_weight: 0.3,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_GROUP_TIMEOUT_SECS`: parallel search group timeout (default: 120)
    /// - `PIPELINE_FALLBACK_UNIT_TIMEOUT_SECS`: per-unit timeout fallback (default: 30)
    /// - `PIPELINE_ENRICHMENT_TIMEOUT_SECS`: per-item enrichment timeout (default: 30)
    /// - `PIPELINE_EMAIL_BLOCKLIST`: comma-separated blocked local-parts
    /// - `PIPELINE_KEYWORD_WEIGHT`: keyword overlap weight (default: 0.5)
    /// - `PIPELINE_LOCATION_WEIGHT`: location boost weight (default: 0.2)
    /// - `PIPELINE_RATING_WEIGHT`: rating weight (default: 0.3)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPELINE_GROUP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_GROUP_TIMEOUT_SECS")?;
            config.group_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_FALLBACK_UNIT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_FALLBACK_UNIT_TIMEOUT_SECS")?;
            config.fallback_unit_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_ENRICHMENT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_ENRICHMENT_TIMEOUT_SECS")?;
            config.enrichment_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_EMAIL_BLOCKLIST") {
            config.email_blocklist = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = std::env::var("PIPELINE_KEYWORD_WEIGHT") {
            config.keyword_weight = parse_env_value(&val, "PIPELINE_KEYWORD_WEIGHT")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_LOCATION_WEIGHT") {
            config.location_weight = parse_env_value(&val, "PIPELINE_LOCATION_WEIGHT")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_RATING_WEIGHT") {
            config.rating_weight = parse_env_value(&val, "PIPELINE_RATING_WEIGHT")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the group timeout.
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Sets the fallback per-unit timeout.
    pub fn with_fallback_unit_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_unit_timeout = timeout;
        self
    }

    /// Sets the enrichment timeout.
    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = timeout;
        self
    }

    /// Sets the email blocklist.
    pub fn with_email_blocklist(mut self, blocklist: Vec<String>) -> Self {
        self.email_blocklist = blocklist;
        self
    }

    /// Sets the scoring weights.
    pub fn with_weights(mut self, keyword: f64, location: f64, rating: f64) -> Self {
        self.keyword_weight = keyword;
        self.location_weight = location;
        self.rating_weight = rating;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if a timeout is zero or a
    /// weight falls outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "group_timeout must be positive".to_string(),
            ));
        }

        if self.fallback_unit_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "fallback_unit_timeout must be positive".to_string(),
            ));
        }

        for (name, weight) in [
            ("keyword_weight", self.keyword_weight),
            ("location_weight", self.location_weight),
            ("rating_weight", self.rating_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be within [0.0, 1.0], got {}",
                    name, weight
                )));
            }
        }

        Ok(())
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}
