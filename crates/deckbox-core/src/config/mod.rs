//! Engine and remote configuration.
//!
//! `EngineConfig` tunes the local store and the sync engine; `RemoteConfig`
//! points the HTTP remote store at a server. Both can be built from the
//! process environment so the CLI and embedders share one set of variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::OwnerId;
use crate::queue::DEFAULT_STUCK_AFTER;
use crate::store::StoreQuota;
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_DB_PATH: &str = "DECKBOX_DB_PATH";
pub const ENV_SYNC_INTERVAL_SECS: &str = "DECKBOX_SYNC_INTERVAL_SECS";
pub const ENV_STUCK_AFTER: &str = "DECKBOX_STUCK_AFTER";
pub const ENV_REMOTE_TIMEOUT_SECS: &str = "DECKBOX_REMOTE_TIMEOUT_SECS";
pub const ENV_MAX_RECORDS: &str = "DECKBOX_MAX_RECORDS";
pub const ENV_REMOTE_URL: &str = "DECKBOX_REMOTE_URL";
pub const ENV_AUTH_TOKEN: &str = "DECKBOX_AUTH_TOKEN";
pub const ENV_OWNER_ID: &str = "DECKBOX_OWNER_ID";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;

/// Local engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database file; `None` uses the platform default location
    pub database_path: Option<PathBuf>,
    pub sync: SyncOptions,
    pub quota: StoreQuota,
}

/// Sync engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Seconds between timer-triggered passes while online; 0 disables the timer
    pub interval_secs: u64,
    /// Failed attempts after which an entry is flagged stuck; 0 never flags
    pub stuck_after_attempts: u32,
    /// Upper bound on a single remote call
    pub remote_timeout_secs: u64,
    /// Skip the download phase of timer-triggered passes on slow links
    pub defer_download_on_slow_link: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            stuck_after_attempts: DEFAULT_STUCK_AFTER,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            defer_download_on_slow_link: true,
        }
    }
}

impl SyncOptions {
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_secs))
        }
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

impl EngineConfig {
    /// Defaults overlaid with `DECKBOX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup` (usually the environment).
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| normalize_text_option(lookup(key));

        if let Some(path) = read(ENV_DB_PATH) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = read(ENV_SYNC_INTERVAL_SECS) {
            self.sync.interval_secs = parse_number(ENV_SYNC_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = read(ENV_STUCK_AFTER) {
            self.sync.stuck_after_attempts = parse_number(ENV_STUCK_AFTER, &raw)?;
        }
        if let Some(raw) = read(ENV_REMOTE_TIMEOUT_SECS) {
            let secs: u64 = parse_number(ENV_REMOTE_TIMEOUT_SECS, &raw)?;
            if secs == 0 {
                return Err(Error::InvalidInput(format!(
                    "{ENV_REMOTE_TIMEOUT_SECS} must be greater than zero"
                )));
            }
            self.sync.remote_timeout_secs = secs;
        }
        if let Some(raw) = read(ENV_MAX_RECORDS) {
            self.quota.max_records = Some(parse_number(ENV_MAX_RECORDS, &raw)?);
        }

        Ok(self)
    }
}

/// Connection settings for the HTTP remote store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub auth_token: String,
    pub owner_id: OwnerId,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

impl RemoteConfig {
    /// Validate and normalize remote settings.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Result<Self> {
        let base_url = normalize_required_http_url(base_url.into(), "base_url")?;
        let auth_token = normalize_required_value(auth_token.into(), "auth_token")?;
        let owner_id = normalize_required_value(owner_id.into(), "owner_id")?;
        Ok(Self {
            base_url,
            auth_token,
            owner_id: OwnerId::new(owner_id),
        })
    }

    /// Read `DECKBOX_REMOTE_URL`, `DECKBOX_AUTH_TOKEN` and `DECKBOX_OWNER_ID`.
    ///
    /// Returns `Ok(None)` when no remote URL is configured at all.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(base_url) = normalize_text_option(lookup(ENV_REMOTE_URL)) else {
            return Ok(None);
        };
        let auth_token = lookup(ENV_AUTH_TOKEN).unwrap_or_default();
        let owner_id = lookup(ENV_OWNER_ID).unwrap_or_default();
        Self::new(base_url, auth_token, owner_id).map(Some)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        let message = format!("{key} must be a non-negative integer, got '{raw}'");
        Error::InvalidInput(message)
    })
}

fn normalize_required_value(raw: String, field: &str) -> Result<String> {
    normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput(format!("remote field '{field}' is required")))
}

fn normalize_required_http_url(raw: String, field: &str) -> Result<String> {
    let value = normalize_required_value(raw, field)?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "remote field '{field}' must include http:// or https://"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.sync.stuck_after_attempts, DEFAULT_STUCK_AFTER);
        assert_eq!(
            config.sync.interval(),
            Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS))
        );
        assert_eq!(config.quota, StoreQuota::default());
    }

    #[test]
    fn overlay_reads_every_variable() {
        let config = EngineConfig::default()
            .overlay(lookup(&[
                (ENV_DB_PATH, " /tmp/deckbox.db "),
                (ENV_SYNC_INTERVAL_SECS, "0"),
                (ENV_STUCK_AFTER, "3"),
                (ENV_REMOTE_TIMEOUT_SECS, "5"),
                (ENV_MAX_RECORDS, "1000"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/deckbox.db")));
        assert_eq!(config.sync.interval(), None);
        assert_eq!(config.sync.stuck_after_attempts, 3);
        assert_eq!(config.sync.remote_timeout(), Duration::from_secs(5));
        assert_eq!(config.quota.max_records, Some(1000));
    }

    #[test]
    fn overlay_rejects_invalid_numbers() {
        let error = EngineConfig::default()
            .overlay(lookup(&[(ENV_STUCK_AFTER, "many")]))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(message) if message.contains(ENV_STUCK_AFTER)));

        let error = EngineConfig::default()
            .overlay(lookup(&[(ENV_REMOTE_TIMEOUT_SECS, "0")]))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn engine_config_deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "sync": { "interval_secs": 5 } }"#).unwrap();
        assert_eq!(config.sync.interval_secs, 5);
        assert_eq!(config.sync.stuck_after_attempts, DEFAULT_STUCK_AFTER);
    }

    #[test]
    fn remote_config_is_optional() {
        assert_eq!(RemoteConfig::from_lookup(lookup(&[])).unwrap(), None);
    }

    #[test]
    fn remote_config_normalizes_url() {
        let remote = RemoteConfig::from_lookup(lookup(&[
            (ENV_REMOTE_URL, "https://api.example.com/ "),
            (ENV_AUTH_TOKEN, "token"),
            (ENV_OWNER_ID, "user-1"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(remote.base_url, "https://api.example.com");
        assert_eq!(remote.owner_id.as_str(), "user-1");
    }

    #[test]
    fn remote_config_requires_scheme_and_token() {
        assert!(RemoteConfig::new("api.example.com", "token", "owner").is_err());
        assert!(RemoteConfig::new("https://api.example.com", " ", "owner").is_err());
        assert!(RemoteConfig::new("https://api.example.com", "token", "").is_err());
    }

    #[test]
    fn remote_config_debug_redacts_token() {
        let remote = RemoteConfig::new("https://api.example.com", "secret", "owner").unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
