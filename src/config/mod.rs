//! Configuration management module
//!
//! Provides centralized configuration including:
//! - Portable paths under `$HOME/.atm-watch/` (log file, config file, alert store)
//! - Build information (date, version, authors)
//! - Runtime-mutable monitor settings shared by the monitoring loops
//!
//! All configuration is environment-aware and portable.

pub mod watch;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration manager
pub struct Config;

impl Config {
    /// Base directory: `$HOME/.atm-watch`, or a temp-dir fallback when HOME is not set.
    pub fn data_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".atm-watch");
        }
        std::env::temp_dir().join("atm-watch")
    }

    /// Get the log file path: `$HOME/.atm-watch/debug.log`
    pub fn log_file_path() -> PathBuf {
        Self::data_dir().join("debug.log")
    }

    /// Get the config file path: `$HOME/.atm-watch/config.json`
    pub fn config_file_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Directory backing the durable key-value store (alert log lives here).
    pub fn store_dir() -> PathBuf {
        Self::data_dir().join("store")
    }

    /// Ensure the log directory exists
    pub fn ensure_log_directory() -> std::io::Result<()> {
        let log_path = Self::log_file_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Build date stamped by build.rs, or "unknown".
    pub fn build_date() -> String {
        option_env!("BUILD_DATE").unwrap_or("unknown").to_string()
    }

    /// Get the version string
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Get the authors string
    pub fn authors() -> String {
        env!("CARGO_PKG_AUTHORS").to_string()
    }
}

/// Placeholder values shipped in sample configs; treated as "not configured".
const PLACEHOLDERS: &[&str] = &[
    "your_service_id",
    "your_public_key",
    "your_template_id",
    "your_email@example.com",
];

/// Credentials and addressing for the email-dispatch service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailConfig {
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
    pub recipient: String,
    pub sender_name: String,
    /// REST endpoint of the email service.
    pub endpoint: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            service_id: String::new(),
            template_id: String::new(),
            public_key: String::new(),
            recipient: String::new(),
            sender_name: "ATM Surveillance System".to_string(),
            endpoint: "https://api.emailjs.com/api/v1.0/email/send".to_string(),
        }
    }
}

impl EmailConfig {
    /// List every missing or placeholder field. Empty means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let is_unset = |v: &str| v.trim().is_empty() || PLACEHOLDERS.contains(&v.trim());
        let mut issues = Vec::new();
        if is_unset(&self.service_id) {
            issues.push("serviceId not configured".to_string());
        }
        if is_unset(&self.public_key) {
            issues.push("publicKey not configured".to_string());
        }
        if is_unset(&self.template_id) {
            issues.push("templateId not configured".to_string());
        }
        if is_unset(&self.recipient) {
            issues.push("recipient not configured".to_string());
        }
        if url::Url::parse(&self.endpoint).is_err() {
            issues.push(format!("endpoint is not a valid URL: {}", self.endpoint));
        }
        issues
    }
}

/// Operator-editable settings, persisted as camelCase JSON in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    pub camera_id: String,
    pub location: String,
    pub blackout_detection_enabled: bool,
    pub email_alerts_enabled: bool,
    pub blackout_threshold_secs: u64,
    /// Base URL of the detection backend; frames go to `<base>/api/process-video`.
    pub detection_endpoint: String,
    pub email: EmailConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            camera_id: "ATM_CAMERA_001".to_string(),
            location: "ATM Surveillance System".to_string(),
            blackout_detection_enabled: true,
            email_alerts_enabled: true,
            blackout_threshold_secs: 30,
            detection_endpoint: "http://localhost:5000".to_string(),
            email: EmailConfig::default(),
        }
    }
}

impl MonitorSettings {
    pub fn blackout_threshold(&self) -> Duration {
        Duration::from_secs(self.blackout_threshold_secs)
    }

    /// Read settings from `path`. A missing file yields defaults; a broken one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("Config: {:?} does not exist, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let settings: MonitorSettings = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", path, e))?;
        if url::Url::parse(&settings.detection_endpoint).is_err() {
            warn!(
                "Config: detectionEndpoint {:?} is not a valid URL; detection requests will fail",
                settings.detection_endpoint
            );
        }
        Ok(settings)
    }

    /// Settings from the default config path, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = Config::config_file_path();
        match Self::load_from(&path) {
            Ok(s) => s,
            Err(e) => {
                warn!("Config: {}; using defaults", e);
                Self::default()
            }
        }
    }
}

/// Shared, runtime-mutable settings. Readers take a snapshot per tick or alert,
/// so edits apply to the next tick without restarting a running loop.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<MonitorSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> MonitorSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut MonitorSettings)) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn replace(&self, settings: MonitorSettings) {
        self.update(|s| *s = settings);
    }
}
