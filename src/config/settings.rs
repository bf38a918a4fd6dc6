//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/mailmint/settings.json` (or XDG
//! equivalent) and loaded at daemon startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or persisting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("could not determine a config directory for this platform")]
    NoConfigDir,
}

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Google OAuth application credentials.
    pub google: GoogleSettings,
    /// LLM extraction and classification configuration.
    pub ai: AiSettings,
    /// Exchange-rate refresh configuration.
    pub rates: RateSettings,
    /// Background sync scheduling.
    pub sync: SyncSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            google: GoogleSettings::default(),
            ai: AiSettings::default(),
            rates: RateSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Settings {
    /// Default settings file path under the platform config directory.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let dirs = directories::ProjectDirs::from("", "", "mailmint")
            .ok_or(SettingsError::NoConfigDir)?;
        Ok(dirs.config_dir().join("settings.json"))
    }

    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist yet.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists settings as pretty-printed JSON, creating parent directories
    /// as needed.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Google OAuth application credentials.
///
/// These identify the daemon to Google's token endpoint; per-mailbox refresh
/// tokens live in the credential store, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleSettings {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Redirect URI registered with the OAuth client.
    pub redirect_uri: String,
}

/// LLM extraction and classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// API key for the completion/embedding provider.
    pub api_key: String,
    /// Custom API endpoint (for self-hosted or compatible APIs).
    pub base_url: Option<String>,
    /// Model used for field extraction and category disambiguation.
    pub completion_model: String,
    /// Model used for category embeddings.
    pub embedding_model: String,
    /// Sampling temperature (0.0 to 1.0).
    pub temperature: f32,
    /// Nearest-neighbor count for semantic category lookup.
    pub classify_top_k: usize,
    /// Minimum cosine similarity for a semantic match.
    pub classify_min_similarity: f32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            completion_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.0,
            classify_top_k: 3,
            classify_min_similarity: 0.6,
        }
    }
}

/// Exchange-rate refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSettings {
    /// API access key for the rate provider.
    pub access_key: String,
    /// Rate provider endpoint.
    pub base_url: String,
    /// Currency pairs to keep warm, e.g. `["USDEUR", "USDNGN"]`.
    pub tracked_pairs: Vec<String>,
    /// UTC hours at which tracked pairs are refreshed.
    pub refresh_hours: Vec<u32>,
    /// Minutes past a refresh hour during which the window stays open.
    pub refresh_window_minutes: i64,
    /// Scheduler tick interval in seconds.
    pub tick_interval_seconds: u64,
    /// Retries per fetch attempt before giving up.
    pub fetch_retries: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            base_url: "https://api.exchangerate.host".to_string(),
            tracked_pairs: Vec::new(),
            refresh_hours: vec![6, 12, 18],
            refresh_window_minutes: 15,
            tick_interval_seconds: 300,
            fetch_retries: 2,
        }
    }
}

/// Background sync scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Whether scheduled background sync is enabled.
    pub enabled: bool,
    /// Interval between scheduled sync rounds, in seconds.
    pub interval_seconds: u64,
    /// Hard deadline for a single mailbox sync job, in seconds.
    pub job_timeout_seconds: u64,
    /// Gmail label that marks transactional bank emails.
    pub label_name: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            job_timeout_seconds: 600,
            label_name: "Transactions".to_string(),
        }
    }
}
