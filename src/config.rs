//! Configuration types for the inpainting client

use crate::compression::DEFAULT_CEILING_MB;
use crate::connection::normalize_endpoint;
use crate::error::InpaintError;
use crate::orchestrator::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Built-in endpoint: the local reverse proxy that forwards to the backend
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api";

/// Environment variable overriding the built-in endpoint
pub const ENV_API_URL: &str = "INPAINT_API_URL";
/// Environment variable carrying the preconfigured preferred remote
pub const ENV_PREFERRED_URL: &str = "INPAINT_PREFERRED_URL";

/// Quality/speed trade-off requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    /// Fewest diffusion steps
    Fast,
    Balanced,
    /// Best results, slowest
    High,
}

impl Default for QualityPreset {
    fn default() -> Self {
        Self::High
    }
}

impl QualityPreset {
    /// Value sent in the `quality` query parameter
    #[must_use]
    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_query_value())
    }
}

impl std::str::FromStr for QualityPreset {
    type Err = InpaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "high" => Ok(Self::High),
            other => Err(InpaintError::invalid_config(format!(
                "Unknown quality preset '{}' (expected fast, balanced or high)",
                other
            ))),
        }
    }
}

/// Configuration for a client session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stable built-in endpoint, the last resort of endpoint resolution
    pub default_endpoint: String,

    /// Preconfigured preferred remote, tried before the default
    pub preferred_endpoint: Option<String>,

    /// Quality preset for inpaint and batch requests
    pub quality: QualityPreset,

    /// Upload size ceiling in megabytes
    pub compression_ceiling_mb: f64,

    /// Poll loop timing and failure budget
    pub retry: RetryPolicy,

    /// Timeout for the health probe
    pub probe_timeout: Duration,

    /// Timeout for single-image AI operations
    pub request_timeout: Duration,

    /// Timeout for batch requests
    pub batch_timeout: Duration,

    /// Optional cap on the mask width; height follows the aspect ratio
    pub max_working_width: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_endpoint: DEFAULT_ENDPOINT.to_string(),
            preferred_endpoint: None,
            quality: QualityPreset::default(),
            compression_ceiling_mb: DEFAULT_CEILING_MB,
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            batch_timeout: Duration::from_secs(600),
            max_working_width: None,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inpaint_client::{ClientConfig, QualityPreset};
    ///
    /// let config = ClientConfig::builder()
    ///     .preferred_endpoint("https://abc123.ngrok-free.app/")
    ///     .quality(QualityPreset::Fast)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(
    ///     config.preferred_endpoint.as_deref(),
    ///     Some("https://abc123.ngrok-free.app")
    /// );
    /// ```
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overlaid with `INPAINT_API_URL` and `INPAINT_PREFERRED_URL`
    pub fn from_env() -> crate::Result<Self> {
        let mut builder = Self::builder();
        if let Some(url) = env_endpoint(ENV_API_URL) {
            builder = builder.default_endpoint(url);
        }
        if let Some(url) = env_endpoint(ENV_PREFERRED_URL) {
            builder = builder.preferred_endpoint(url);
        }
        builder.build()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Empty default endpoint
    /// - Non-positive compression ceiling
    /// - Zero timeouts or a zero working width
    /// - Retry policy with a zero failure budget
    pub fn validate(&self) -> crate::Result<()> {
        if self.default_endpoint.trim().is_empty() {
            return Err(InpaintError::invalid_config("Default endpoint must not be empty"));
        }

        if !(self.compression_ceiling_mb.is_finite() && self.compression_ceiling_mb > 0.0) {
            return Err(InpaintError::config_value_error(
                "compression ceiling (MB)",
                self.compression_ceiling_mb,
                "> 0",
                Some(DEFAULT_CEILING_MB),
            ));
        }

        for (name, value) in [
            ("probe timeout", self.probe_timeout),
            ("request timeout", self.request_timeout),
            ("batch timeout", self.batch_timeout),
        ] {
            if value.is_zero() {
                return Err(InpaintError::invalid_config(format!("{} must be non-zero", name)));
            }
        }

        if self.max_working_width == Some(0) {
            return Err(InpaintError::config_value_error(
                "max working width",
                0,
                ">= 1",
                Some(800),
            ));
        }

        self.retry.validate()
    }
}

fn env_endpoint(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| normalize_endpoint(&v))
        .filter(|v| !v.is_empty())
}

/// Builder for `ClientConfig`
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the built-in endpoint
    #[must_use]
    pub fn default_endpoint<S: AsRef<str>>(mut self, url: S) -> Self {
        self.config.default_endpoint = normalize_endpoint(url.as_ref());
        self
    }

    /// Set the preferred remote endpoint
    #[must_use]
    pub fn preferred_endpoint<S: AsRef<str>>(mut self, url: S) -> Self {
        let url = normalize_endpoint(url.as_ref());
        self.config.preferred_endpoint = (!url.is_empty()).then_some(url);
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: QualityPreset) -> Self {
        self.config.quality = quality;
        self
    }

    #[must_use]
    pub fn compression_ceiling_mb(mut self, ceiling: f64) -> Self {
        self.config.compression_ceiling_mb = ceiling;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_timeout = timeout;
        self
    }

    /// Cap the mask width (e.g. 800 for the classic editor canvas)
    #[must_use]
    pub fn max_working_width(mut self, width: u32) -> Self {
        self.config.max_working_width = Some(width);
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns the first failure from [`ClientConfig::validate`]
    pub fn build(self) -> crate::Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.default_endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.quality, QualityPreset::High);
        assert!((config.compression_ceiling_mb - 3.5).abs() < f64::EPSILON);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.batch_timeout, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_strips_trailing_slashes() {
        let config = ClientConfig::builder()
            .default_endpoint("http://localhost:8000//")
            .preferred_endpoint("https://remote.example/")
            .build()
            .unwrap();
        assert_eq!(config.default_endpoint, "http://localhost:8000");
        assert_eq!(
            config.preferred_endpoint.as_deref(),
            Some("https://remote.example")
        );
    }

    #[test]
    fn test_blank_preferred_is_none() {
        let config = ClientConfig::builder()
            .preferred_endpoint("   ")
            .build()
            .unwrap();
        assert!(config.preferred_endpoint.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ClientConfig::builder()
            .compression_ceiling_mb(0.0)
            .build()
            .is_err());
        assert!(ClientConfig::builder()
            .probe_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(ClientConfig::builder().max_working_width(0).build().is_err());
        assert!(ClientConfig::builder().default_endpoint("/").build().is_err());
    }

    #[test]
    fn test_quality_preset_parsing() {
        assert_eq!("fast".parse::<QualityPreset>().unwrap(), QualityPreset::Fast);
        assert_eq!("BALANCED".parse::<QualityPreset>().unwrap(), QualityPreset::Balanced);
        assert!("ultra".parse::<QualityPreset>().is_err());
        assert_eq!(QualityPreset::High.to_string(), "high");
        assert_eq!(serde_json::to_string(&QualityPreset::Fast).unwrap(), "\"fast\"");
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = ClientConfig::builder().max_working_width(800).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
