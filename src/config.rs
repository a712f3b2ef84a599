//! Scan configuration.
//!
//! Connectors auto-detect their platform-default store locations; a config
//! file can override any of them (useful for synced backups and tests).
//! Location: `{config_dir}/coding-agent-threads/config.toml`.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::connectors::ScanContext;
use crate::detect::ThreadFormat;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Per-provider store root overrides; `None` means auto-detect.
    #[serde(default)]
    pub copilot_root: Option<PathBuf>,
    #[serde(default)]
    pub codex_root: Option<PathBuf>,
    #[serde(default)]
    pub cursor_root: Option<PathBuf>,
    #[serde(default)]
    pub gemini_root: Option<PathBuf>,
}

impl ScanConfig {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "coding-agent-threads", "coding-agent-threads")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location; missing or unreadable config falls
    /// back to auto-detection rather than failing discovery.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "bad scan config, using defaults");
                Self::default()
            }
        }
    }

    /// Build the scan context for one provider, applying its override.
    pub fn context_for(&self, provider: ThreadFormat) -> ScanContext {
        let data_root = match provider {
            ThreadFormat::Copilot => self.copilot_root.clone(),
            ThreadFormat::Codex => self.codex_root.clone(),
            ThreadFormat::Cursor => self.cursor_root.clone(),
            ThreadFormat::Gemini => self.gemini_root.clone(),
            ThreadFormat::Claude => None,
        };
        ScanContext {
            data_root,
            since_ts: None,
        }
    }
}
