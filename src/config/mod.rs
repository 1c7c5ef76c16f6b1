use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::ai::AiClientConfig;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Redis connection string for the link queue
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// API key for the OpenAI-compatible completion endpoint
    #[garde(length(min = 1))]
    pub ai_api_key: String,

    #[serde(default = "default_ai_base_url")]
    #[garde(url)]
    pub ai_base_url: String,

    #[serde(default = "default_ai_model")]
    #[garde(length(min = 1))]
    pub ai_model: String,

    #[serde(default = "default_ai_timeout_secs")]
    #[garde(range(min = 1))]
    pub ai_timeout_secs: u64,

    /// Pages scored below this are rejected as not job postings
    #[serde(default)]
    #[garde(range(min = 0.0, max = 100.0))]
    pub ai_min_score: Option<f64>,

    #[serde(default = "default_prompt_max_chars")]
    #[garde(range(min = 1000))]
    pub prompt_max_chars: usize,

    /// Endpoint results are POSTed to
    #[garde(url)]
    pub deposit_url: String,

    /// Endpoint queried for existing links
    #[garde(url)]
    pub lookup_url: String,

    /// HS256 secret shared with the deposit and lookup services
    #[garde(length(min = 16))]
    pub service_token_secret: String,

    #[serde(default = "default_token_issuer")]
    #[garde(length(min = 1))]
    pub service_token_issuer: String,

    #[serde(default = "default_token_audience")]
    #[garde(length(min = 1))]
    pub service_token_audience: String,

    #[serde(default = "default_retry_max_attempts")]
    #[garde(range(min = 1, max = 10))]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    #[garde(skip)]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    #[garde(custom(at_least(self.retry_base_delay_ms)))]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_rate_limit_delay_ms")]
    #[garde(skip)]
    pub retry_rate_limit_delay_ms: u64,

    #[serde(default = "default_retry_jitter")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub retry_jitter: f64,

    #[serde(default = "default_scrape_timeout_secs")]
    #[garde(range(min = 1))]
    pub scrape_timeout_secs: u64,

    #[serde(default = "default_extract_timeout_secs")]
    #[garde(range(min = 1))]
    pub extract_timeout_secs: u64,

    /// Pipeline runs per link before it is deposited as failed
    #[serde(default = "default_link_max_attempts")]
    #[garde(range(min = 1))]
    pub link_max_attempts: u32,

    #[serde(default)]
    #[garde(skip)]
    pub chrome_executable: Option<PathBuf>,

    /// Prometheus listener address (e.g., "0.0.0.0:9000"). Disabled when unset.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    60
}

fn default_prompt_max_chars() -> usize {
    30_000
}

fn default_token_issuer() -> String {
    "job-link-pipeline".to_string()
}

fn default_token_audience() -> String {
    "job-link-deposit".to_string()
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_rate_limit_delay_ms() -> u64 {
    60_000
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_scrape_timeout_secs() -> u64 {
    45
}

fn default_extract_timeout_secs() -> u64 {
    90
}

fn default_link_max_attempts() -> u32 {
    3
}

fn at_least(min: u64) -> impl FnOnce(&u64, &()) -> garde::Result {
    move |value, _| {
        if *value < min {
            return Err(garde::Error::new(format!("must be at least {min}")));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit `(NAME, value)` pairs.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let config: AppConfig = envy::from_iter(vars)?;
        config
            .validate()
            .map_err(|report| ConfigError::Invalid(report.to_string()))?;
        Ok(config)
    }

    pub fn ai_client(&self) -> AiClientConfig {
        AiClientConfig {
            api_key: self.ai_api_key.clone(),
            base_url: self.ai_base_url.clone(),
            model: self.ai_model.clone(),
            timeout: Duration::from_secs(self.ai_timeout_secs),
        }
    }

    fn base_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
            rate_limit_delay: Duration::from_millis(self.retry_rate_limit_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn scrape_retry_policy(&self) -> RetryPolicy {
        self.base_retry_policy()
            .with_attempt_timeout(Duration::from_secs(self.scrape_timeout_secs))
    }

    pub fn extract_retry_policy(&self) -> RetryPolicy {
        self.base_retry_policy()
            .with_attempt_timeout(Duration::from_secs(self.extract_timeout_secs))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
