// ABOUTME: Run settings loaded from an optional TOML file, plus API credentials
// ABOUTME: Missing settings keep their defaults; missing credentials are fatal

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::registry::API_BASE_URL;
use crate::remote::ClientConfig;
use crate::sync::{BackoffPolicy, OrchestratorConfig};

/// Tunables for one run. Every key is optional in the TOML file.
///
/// ```toml
/// page_size = 5000
/// max_concurrent = 3
/// chunk_size = 5000
///
/// [request]
/// max_attempts = 5
/// retry_delay_secs = 10
/// timeout_secs = 60
///
/// [backoff]
/// initial_delay_secs = 10
/// max_delay_secs = 30
/// max_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api_base_url: String,
    pub page_size: usize,
    pub max_concurrent: usize,
    pub chunk_size: usize,
    pub request: RequestSettings,
    pub backoff: BackoffSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestSettings {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: API_BASE_URL.to_string(),
            page_size: 5000,
            max_concurrent: 3,
            chunk_size: 5000,
            request: RequestSettings::default(),
            backoff: BackoffSettings::default(),
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_secs: 10,
            timeout_secs: 60,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 10,
            max_delay_secs: 30,
            max_attempts: 5,
        }
    }
}

impl Settings {
    /// Read settings from a TOML file and validate them.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be greater than zero");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.max_concurrent == 0 {
            bail!("max_concurrent must be at least 1");
        }
        if self.request.max_attempts == 0 {
            bail!("request.max_attempts must be at least 1");
        }
        if self.backoff.max_attempts == 0 {
            bail!("backoff.max_attempts must be at least 1");
        }
        if self.backoff.max_delay_secs < self.backoff.initial_delay_secs {
            bail!(
                "backoff.max_delay_secs ({}) is smaller than backoff.initial_delay_secs ({})",
                self.backoff.max_delay_secs,
                self.backoff.initial_delay_secs
            );
        }
        url::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url '{}'", self.api_base_url))?;
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            page_size: self.page_size,
            max_attempts: self.request.max_attempts,
            retry_delay: Duration::from_secs(self.request.retry_delay_secs),
            timeout: Duration::from_secs(self.request.timeout_secs),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_secs(self.backoff.initial_delay_secs),
            max_delay: Duration::from_secs(self.backoff.max_delay_secs),
            max_attempts: self.backoff.max_attempts,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent: self.max_concurrent,
            chunk_size: self.chunk_size,
            backoff: self.backoff_policy(),
        }
    }
}

/// The three shared secrets every request is signed with.
#[derive(Clone)]
pub struct Credentials {
    pub company_id: String,
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// Assemble credentials, naming the first variable that is unset or empty.
    pub fn from_parts(
        company_id: Option<String>,
        api_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            company_id: require(company_id, "MARKETSHARP_COMPANY_ID")?,
            api_key: require(api_key, "MARKETSHARP_API_KEY")?,
            secret_key: require(secret_key, "MARKETSHARP_SECRET_KEY")?,
        })
    }
}

fn require(value: Option<String>, var: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => bail!(
            "Missing MarketSharp credential: set {} (or pass it on the command line)",
            var
        ),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("company_id", &self.company_id)
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .finish()
    }
}
