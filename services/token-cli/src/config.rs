//! Configuration types and loading
//!
//! The file path comes from `--config`, then CONFIG_PATH, then
//! `mangadex-token.toml`. The client secret comes from MANGADEX_CLIENT_SECRET or
//! `oauth.client_secret_file`, the token encryption key from
//! MANGADEX_TOKEN_KEY or `store.key_file`. Neither is ever read from the TOML
//! directly.

use std::path::{Path, PathBuf};

use common::{Secret, resolve_secret};
use mangadex_auth::{AesGcmCipher, OAuthCredentials};
use mangadex_oauth::{PersistPolicy, RefreshMode};
use serde::Deserialize;

pub const CLIENT_SECRET_ENV: &str = "MANGADEX_CLIENT_SECRET";
pub const TOKEN_KEY_ENV: &str = "MANGADEX_TOKEN_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Identity provider and client behaviour
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default = "default_caller_key")]
    pub default_caller_key: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: u64,
    #[serde(default)]
    pub refresh_mode: RefreshModeSetting,
    #[serde(default)]
    pub persist_policy: PersistPolicySetting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshModeSetting {
    #[default]
    Independent,
    SingleFlight,
}

impl From<RefreshModeSetting> for RefreshMode {
    fn from(setting: RefreshModeSetting) -> Self {
        match setting {
            RefreshModeSetting::Independent => RefreshMode::Independent,
            RefreshModeSetting::SingleFlight => RefreshMode::SingleFlight,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicySetting {
    #[default]
    BestEffort,
    Strict,
}

impl From<PersistPolicySetting> for PersistPolicy {
    fn from(setting: PersistPolicySetting) -> Self {
        match setting {
            PersistPolicySetting::BestEffort => PersistPolicy::BestEffort,
            PersistPolicySetting::Strict => PersistPolicy::Strict,
        }
    }
}

/// Token store back end, chosen once at startup
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Collection file (`file`) or database file (`sqlite`)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Document name space inside the back end
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub encrypted: bool,
    /// Path to a file holding the base64 32-byte key (alternative to MANGADEX_TOKEN_KEY)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(skip)]
    pub key: Option<Secret<String>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            collection: default_collection(),
            encrypted: false,
            key_file: None,
            key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

fn default_caller_key() -> String {
    "default".into()
}

fn default_token_endpoint() -> String {
    mangadex_auth::TOKEN_ENDPOINT.into()
}

fn default_api_host() -> String {
    mangadex_auth::API_HOST.into()
}

fn default_timeout() -> u64 {
    mangadex_auth::DEFAULT_TIMEOUT_SECS
}

fn default_refresh_skew() -> u64 {
    60
}

fn default_collection() -> String {
    "tokens".into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.oauth.client_secret =
            resolve_secret(CLIENT_SECRET_ENV, config.oauth.client_secret_file.as_deref())?;

        if config.store.encrypted {
            let key = resolve_secret(TOKEN_KEY_ENV, config.store.key_file.as_deref())?
                .ok_or_else(|| {
                    common::Error::Config(format!(
                        "store.encrypted requires {TOKEN_KEY_ENV} or store.key_file"
                    ))
                })?;
            AesGcmCipher::from_base64(key.expose())
                .map_err(|e| common::Error::Config(format!("invalid token key: {e}")))?;
            config.store.key = Some(key);
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let oauth = &self.oauth;
        if oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("oauth.client_id must not be empty".into()));
        }
        if oauth.default_caller_key.is_empty() {
            return Err(common::Error::Config(
                "oauth.default_caller_key must not be empty".into(),
            ));
        }
        if !oauth.token_endpoint.starts_with("http://")
            && !oauth.token_endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token_endpoint must start with http:// or https://, got: {}",
                oauth.token_endpoint
            )));
        }
        if oauth.api_host.is_empty() || oauth.api_host.contains('/') {
            return Err(common::Error::Config(format!(
                "api_host must be a bare host name, got: {}",
                oauth.api_host
            )));
        }
        if oauth.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        let store = &self.store;
        match store.backend {
            StoreBackend::Memory if store.encrypted => {
                return Err(common::Error::Config(
                    "store.encrypted applies to the file and sqlite back ends only".into(),
                ));
            }
            StoreBackend::File | StoreBackend::Sqlite if store.path.is_none() => {
                return Err(common::Error::Config(format!(
                    "store.path is required for the {:?} back end",
                    store.backend
                )));
            }
            _ => {}
        }
        if store.collection.is_empty() {
            return Err(common::Error::Config(
                "store.collection must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Fallback client registration for callers without their own.
    pub fn default_credentials(&self) -> OAuthCredentials {
        OAuthCredentials::new(
            self.oauth.default_caller_key.clone(),
            self.oauth.client_id.clone(),
            self.oauth
                .client_secret
                .as_ref()
                .map(|s| s.expose().clone())
                .unwrap_or_default(),
        )
    }
}
