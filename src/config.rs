use std::{fs, net::SocketAddr, path::PathBuf, sync::Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mailer::EmailProvider;
use crate::utils;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_RESTAURANTS: usize = 10;
const DEFAULT_MAX_DRAFTS: usize = 5;
const DEFAULT_SESSION_TTL_MINUTES: i64 = 120;

/// Sender preferences that survive restarts. The SMTP password is never
/// written here; it lives only in the in-memory session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sender_email: Option<String>,
    pub email_provider: Option<EmailProvider>,
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::at(utils::config_path())
    }

    pub fn at(path: PathBuf) -> Self {
        let data = match read_config(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = ?path, error = %err, "ignoring unreadable config");
                AppConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        self.data.lock().expect("config mutex poisoned").clone()
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, String>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| "config mutex poisoned".to_string())?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &PathBuf) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&contents).map_err(|err| err.to_string())
}

fn write_config(path: &PathBuf, config: &AppConfig) -> Result<(), String> {
    utils::ensure_parent(path)?;
    let contents = serde_json::to_string_pretty(config).map_err(|err| err.to_string())?;
    fs::write(path, contents).map_err(|err| err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMode {
    Auto,
    Off,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub maps_api_key: Option<String>,
    pub browser: BrowserMode,
    pub max_restaurants: usize,
    pub max_drafts: usize,
    pub session_ttl_minutes: i64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("EVENT_AGENT_ADDR")
            .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
            .parse()
            .context("EVENT_AGENT_ADDR must be a socket address like 127.0.0.1:8080")?;
        let maps_api_key = non_empty_var("GOOGLE_MAPS_API_KEY");
        let browser = match std::env::var("EVENT_AGENT_BROWSER") {
            Ok(value) if matches!(value.trim().to_lowercase().as_str(), "off" | "0" | "false") => {
                BrowserMode::Off
            }
            _ => BrowserMode::Auto,
        };

        Ok(Self {
            listen_addr,
            maps_api_key,
            browser,
            max_restaurants: parsed_var("EVENT_AGENT_MAX_RESTAURANTS")
                .unwrap_or(DEFAULT_MAX_RESTAURANTS),
            max_drafts: parsed_var("EVENT_AGENT_MAX_DRAFTS").unwrap_or(DEFAULT_MAX_DRAFTS),
            session_ttl_minutes: parsed_var("EVENT_AGENT_SESSION_TTL_MINUTES")
                .unwrap_or(DEFAULT_SESSION_TTL_MINUTES),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            maps_api_key: None,
            browser: BrowserMode::Off,
            max_restaurants: DEFAULT_MAX_RESTAURANTS,
            max_drafts: DEFAULT_MAX_DRAFTS,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
        }
    }
}

pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("event-agent-test-{tag}-{}", uuid::Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn missing_file_loads_defaults() {
        let store = ConfigStore::at(temp_config_path("missing"));
        let config = store.read();
        assert!(config.sender_email.is_none());
        assert!(config.email_provider.is_none());
    }

    #[test]
    fn update_persists_sender_preferences() {
        let path = temp_config_path("update");
        let store = ConfigStore::at(path.clone());
        store
            .update(|config| {
                config.sender_email = Some("me@example.org".to_string());
                config.email_provider = Some(EmailProvider::Outlook);
            })
            .expect("write config");

        let reloaded = ConfigStore::at(path.clone()).read();
        assert_eq!(reloaded.sender_email.as_deref(), Some("me@example.org"));
        assert_eq!(reloaded.email_provider, Some(EmailProvider::Outlook));

        let raw = fs::read_to_string(&path).expect("config on disk");
        assert!(!raw.contains("password"));
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }
}
