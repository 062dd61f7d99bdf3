use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for the HTTP assessment provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Build a config for `base_url` with no credentials and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL does not parse or is not http(s).
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let parsed =
            Url::parse(base_url.trim()).map_err(|_| ConfigError::InvalidBaseUrl(base_url.into()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(base_url.into()));
        }
        Ok(Self {
            base_url: parsed,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the provider config from the environment.
    ///
    /// - `ASSESS_API_BASE_URL`: provider root; unset or blank means no provider
    /// - `ASSESS_API_KEY`: optional bearer token
    /// - `ASSESS_TIMEOUT_SECS`: request timeout, default 15
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but invalid.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(base_url) = env::var("ASSESS_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        else {
            return Ok(None);
        };

        let mut config = Self::new(&base_url)?;
        if let Ok(key) = env::var("ASSESS_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(raw) = env::var("ASSESS_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            if secs == 0 {
                return Err(ConfigError::InvalidTimeout(raw));
            }
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(Some(config))
    }
}
