//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend and identity-provider endpoints plus session timing knobs.
//!
//! Configuration is stored at `~/.config/sessionsync/config.json`.
//! Endpoint fields can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// File holding the durable storage tier
const DURABLE_STORAGE_FILE: &str = "durable.json";

pub const ENV_API_URL: &str = "SESSIONSYNC_API_URL";
pub const ENV_GRAPHQL_URL: &str = "SESSIONSYNC_GRAPHQL_URL";
pub const ENV_IDENTITY_URL: &str = "SESSIONSYNC_IDENTITY_URL";
pub const ENV_IDENTITY_ANON_KEY: &str = "SESSIONSYNC_IDENTITY_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL; the login endpoint is `{api_base_url}/api/auth/login`
    pub api_base_url: String,
    pub graphql_url: String,
    /// GoTrue-style identity provider base URL
    pub identity_url: String,
    pub identity_anon_key: String,
    /// Where the user is sent when the session is gone
    pub login_path: String,
    /// Seconds before literal expiry at which a token counts as expired
    pub token_skew_secs: i64,
    pub request_timeout_secs: u64,
    /// Upper bound on identity-provider round trips. 0 disables the bound.
    pub refresh_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            graphql_url: "http://localhost:3000/graphql".to_string(),
            identity_url: "http://localhost:54321".to_string(),
            identity_anon_key: String::new(),
            login_path: "/login".to_string(),
            token_skew_secs: crate::auth::token::DEFAULT_SKEW_SECS,
            request_timeout_secs: 30,
            refresh_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Replace endpoint fields with any non-empty environment values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 4] = [
            (ENV_API_URL, &mut self.api_base_url),
            (ENV_GRAPHQL_URL, &mut self.graphql_url),
            (ENV_IDENTITY_URL, &mut self.identity_url),
            (ENV_IDENTITY_ANON_KEY, &mut self.identity_anon_key),
        ];
        for (name, field) in fields {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                debug!(var = name, "Config overridden from environment");
                *field = value;
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Location of the persisted durable storage tier
    pub fn durable_storage_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DURABLE_STORAGE_FILE))
    }

    pub fn login_url(&self) -> String {
        format!("{}/api/auth/login", self.api_base_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        (self.refresh_timeout_secs > 0).then(|| Duration::from_secs(self.refresh_timeout_secs))
    }

    /// Config pointing every endpoint at one base URL (used by tests and demos)
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            api_base_url: base.to_string(),
            graphql_url: format!("{}/graphql", base),
            identity_url: base.to_string(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
