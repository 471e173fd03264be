use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::constants::{
    DEFAULT_LANGUAGE, DEFAULT_OUTPUT_DIR, DEFAULT_WEBHOOK_LOG_DIR, DEFAULT_WEBHOOK_PORT,
    ENV_ACCESS_TOKEN, ENV_ACCOUNT_ID, ENV_API_VERSION, ENV_GRAPH_BASE_URL,
    ENV_LANDING_BASE_URL, ENV_LANDING_HOME_LANGUAGE, ENV_OUTPUT_DIR, ENV_WEBHOOK_LOG_DIR,
    ENV_WEBHOOK_PORT, ENV_WEBHOOK_VERIFY_TOKEN, ENV_WHATSAPP_PHONE_ID, FACEBOOK_API_VERSION,
    FACEBOOK_BASE_URL,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Where configuration values come from. `from_env` reads the process
/// environment (after `.env`), tests pass a closure over a fixed map.
trait Source {
    fn get(&self, name: &str) -> Option<String>;

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl<F: Fn(&str) -> Option<String>> Source for F {
    fn get(&self, name: &str) -> Option<String> {
        self(name)
    }
}

fn process_env() -> impl Source {
    dotenv().ok();
    |name: &str| env::var(name).ok()
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Credentials and endpoint for the Marketing Graph API.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub account_id: String,
    pub access_token: String,
    pub api_version: String,
    pub base_url: String,
}

impl GraphConfig {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let account_id = account_id.into();
        Self {
            account_id: account_id
                .strip_prefix("act_")
                .unwrap_or(&account_id)
                .to_string(),
            access_token: access_token.into(),
            api_version: FACEBOOK_API_VERSION.to_string(),
            base_url: FACEBOOK_BASE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&process_env())
    }

    fn from_source(source: &impl Source) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            source.required(ENV_ACCOUNT_ID)?,
            source.required(ENV_ACCESS_TOKEN)?,
        );
        if let Some(version) = source.optional(ENV_API_VERSION) {
            config.api_version = version;
        }
        if let Some(base_url) = source.optional(ENV_GRAPH_BASE_URL) {
            parse_url(ENV_GRAPH_BASE_URL, &base_url)?;
            config.base_url = base_url;
        }
        Ok(config)
    }
}

/// Credentials for the WhatsApp Cloud API. Shares the Graph access token.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub phone_number_id: String,
    pub access_token: String,
    pub api_version: String,
    pub base_url: String,
}

impl WhatsAppConfig {
    pub fn new(phone_number_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
            api_version: FACEBOOK_API_VERSION.to_string(),
            base_url: FACEBOOK_BASE_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&process_env())
    }

    fn from_source(source: &impl Source) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            source.required(ENV_WHATSAPP_PHONE_ID)?,
            source.required(ENV_ACCESS_TOKEN)?,
        );
        if let Some(version) = source.optional(ENV_API_VERSION) {
            config.api_version = version;
        }
        if let Some(base_url) = source.optional(ENV_GRAPH_BASE_URL) {
            parse_url(ENV_GRAPH_BASE_URL, &base_url)?;
            config.base_url = base_url;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub verify_token: String,
    pub port: u16,
    pub log_dir: PathBuf,
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&process_env())
    }

    fn from_source(source: &impl Source) -> Result<Self, ConfigError> {
        let port = match source.optional(ENV_WEBHOOK_PORT) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: ENV_WEBHOOK_PORT.to_string(),
                reason: format!("`{raw}` is not a port number"),
            })?,
            None => DEFAULT_WEBHOOK_PORT,
        };

        Ok(Self {
            verify_token: source.required(ENV_WEBHOOK_VERIFY_TOKEN)?,
            port,
            log_dir: source
                .optional(ENV_WEBHOOK_LOG_DIR)
                .unwrap_or_else(|| DEFAULT_WEBHOOK_LOG_DIR.to_string())
                .into(),
        })
    }
}

/// Landing page the text pusher points new creatives at.
///
/// Ads in `home_language` link to the site root; every other language links
/// to `{base_url}/{language}/`.
#[derive(Debug, Clone)]
pub struct LandingConfig {
    pub base_url: Url,
    pub home_language: String,
}

impl LandingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&process_env())
    }

    fn from_source(source: &impl Source) -> Result<Self, ConfigError> {
        let raw = source.required(ENV_LANDING_BASE_URL)?;
        Ok(Self {
            base_url: parse_url(ENV_LANDING_BASE_URL, &raw)?,
            home_language: source
                .optional(ENV_LANDING_HOME_LANGUAGE)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl OutputConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_env() -> Self {
        Self::from_source(&process_env())
    }

    fn from_source(source: &impl Source) -> Self {
        Self::new(
            source
                .optional(ENV_OUTPUT_DIR)
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Source {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn graph_config_strips_act_prefix() {
        let config = GraphConfig::from_source(&source(&[
            (ENV_ACCOUNT_ID, "act_123456"),
            (ENV_ACCESS_TOKEN, "token"),
        ]))
        .unwrap();

        assert_eq!(config.account_id, "123456");
        assert_eq!(config.api_version, FACEBOOK_API_VERSION);
        assert_eq!(config.base_url, FACEBOOK_BASE_URL);
    }

    #[test]
    fn graph_config_requires_token() {
        let err = GraphConfig::from_source(&source(&[(ENV_ACCOUNT_ID, "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == ENV_ACCESS_TOKEN));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = WhatsAppConfig::from_source(&source(&[
            (ENV_WHATSAPP_PHONE_ID, "   "),
            (ENV_ACCESS_TOKEN, "token"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    fn graph_config_rejects_bad_base_url() {
        let err = GraphConfig::from_source(&source(&[
            (ENV_ACCOUNT_ID, "1"),
            (ENV_ACCESS_TOKEN, "t"),
            (ENV_GRAPH_BASE_URL, "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn webhook_config_defaults_port_and_log_dir() {
        let config =
            WebhookConfig::from_source(&source(&[(ENV_WEBHOOK_VERIFY_TOKEN, "secret")])).unwrap();
        assert_eq!(config.port, DEFAULT_WEBHOOK_PORT);
        assert_eq!(config.log_dir, PathBuf::from(DEFAULT_WEBHOOK_LOG_DIR));
    }

    #[test]
    fn webhook_config_rejects_bad_port() {
        let err = WebhookConfig::from_source(&source(&[
            (ENV_WEBHOOK_VERIFY_TOKEN, "secret"),
            (ENV_WEBHOOK_PORT, "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn landing_config_parses_url() {
        let config = LandingConfig::from_source(&source(&[
            (ENV_LANDING_BASE_URL, "https://www.example.cz"),
            (ENV_LANDING_HOME_LANGUAGE, "cs"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.host_str(), Some("www.example.cz"));
        assert_eq!(config.home_language, "cs");
    }

    #[test]
    fn output_dir_defaults() {
        let config = OutputConfig::from_source(&source(&[]));
        assert_eq!(config.dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
    }
}
