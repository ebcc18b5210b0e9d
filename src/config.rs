use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_APP_FOLDER: &str = "Drive Backup Sample";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://oauth2.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_folder")]
    pub app_folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_oauth_base_url")]
    pub oauth_base_url: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_app_folder() -> String {
    DEFAULT_APP_FOLDER.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_oauth_base_url() -> String {
    DEFAULT_OAUTH_BASE_URL.to_string()
}

fn default_log_level() -> String {
    "drivebackup=info".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_folder: default_app_folder(),
            client_id: None,
            client_secret: None,
            api_base_url: default_api_base_url(),
            oauth_base_url: default_oauth_base_url(),
            log: LogConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Loads `config.toml`, falling back to defaults when the file is absent,
    /// then applies `DRIVEBACKUP_*` environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&config_path()?)?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn apply_env(&mut self) {
        if let Ok(v) = env::var("DRIVEBACKUP_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Ok(v) = env::var("DRIVEBACKUP_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Ok(v) = env::var("DRIVEBACKUP_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Ok(v) = env::var("DRIVEBACKUP_OAUTH_BASE_URL") {
            self.oauth_base_url = v;
        }
    }

    pub fn client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "no OAuth client id configured; set client_id in {} or DRIVEBACKUP_CLIENT_ID",
                    config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| "config.toml".into())
                )
            })
    }

    pub fn client_secret(&self) -> &str {
        self.client_secret.as_deref().unwrap_or_default()
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        match &self.log.file {
            Some(p) => Ok(p.clone()),
            None => Ok(config_dir()?.join("drivebackup.log")),
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let base = home_config_dir().ok_or_else(|| anyhow!("unable to locate config dir"))?;
    Ok(base.join("drivebackup"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// `path` with `.{suffix}` appended to its file name.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `contents` to a temporary sibling, then renames it over `path`,
/// so readers see either the old file or the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }
    let tmp = sibling(
        path,
        &format!("{}-{}.tmp", std::process::id(), SEQ.fetch_add(1, Ordering::Relaxed)),
    );
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

/// Returns ~/.config on all platforms instead of platform-specific config dirs.
fn home_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config"))
}
