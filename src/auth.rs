use crate::config::{AppConfig, config_dir, write_atomic};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const SCOPE_DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";
pub const SCOPE_DRIVE_APPDATA: &str = "https://www.googleapis.com/auth/drive.appdata";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const USER_AGENT: &str = concat!("drivebackup/", env!("CARGO_PKG_VERSION"));
// Refresh a little early so a token never expires mid-request.
const EXPIRY_SKEW_SECS: i64 = 60;
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_at_unix: i64,
    #[serde(default)]
    pub scope: String,
}

impl SessionToken {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix >= self.expires_at_unix.saturating_sub(EXPIRY_SKEW_SECS)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Outcome of one token-endpoint poll during the device flow.
#[derive(Debug)]
pub enum PollStatus {
    Pending,
    SlowDown,
    Granted(SessionToken),
}

pub struct AuthConfig {
    pub session_path: PathBuf,
    pub oauth_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

pub struct GoogleAuth {
    session_path: PathBuf,
    oauth_base_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    http: reqwest::blocking::Client,
}

impl GoogleAuth {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::from_config(AuthConfig {
            session_path: default_session_path()?,
            oauth_base_url: config.oauth_base_url.clone(),
            client_id: config.client_id()?.to_string(),
            client_secret: config.client_secret().to_string(),
            scopes: vec![SCOPE_DRIVE_FILE.into(), SCOPE_DRIVE_APPDATA.into()],
        })
    }

    pub fn from_config(cfg: AuthConfig) -> Result<Self> {
        Ok(Self {
            session_path: cfg.session_path,
            oauth_base_url: cfg.oauth_base_url,
            client_id: cfg.client_id,
            client_secret: cfg.client_secret,
            scopes: cfg.scopes,
            http: reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .context("failed to build http client")?,
        })
    }

    // --- Session persistence ---

    pub fn load_session(&self) -> Result<Option<SessionToken>> {
        if !self.session_path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.session_path).with_context(|| {
            format!(
                "failed to read session file {}",
                self.session_path.display()
            )
        })?;
        let token: SessionToken =
            serde_json::from_str(&raw).context("failed to parse session json")?;
        Ok(Some(token))
    }

    pub fn save_session(&self, token: &SessionToken) -> Result<()> {
        let raw = serde_json::to_string_pretty(token).context("failed to encode session json")?;
        write_atomic(&self.session_path, raw.as_bytes()).with_context(|| {
            format!(
                "failed to write session file {}",
                self.session_path.display()
            )
        })
    }

    pub fn clear_session(&self) -> Result<()> {
        if self.session_path.exists() {
            fs::remove_file(&self.session_path).with_context(|| {
                format!(
                    "failed to remove session file {}",
                    self.session_path.display()
                )
            })?;
        }
        Ok(())
    }

    pub fn has_session(&self) -> bool {
        matches!(self.load_session(), Ok(Some(_)))
    }

    pub fn session_path(&self) -> &PathBuf {
        &self.session_path
    }

    // --- Device authorization grant ---

    pub fn request_device_code(&self) -> Result<DeviceCode> {
        let url = format!("{}/device/code", self.oauth_base_url.trim_end_matches('/'));
        let scope = self.scopes.join(" ");
        let response = self
            .http
            .post(url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .context("device code request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "device code request failed with status {}: {}",
                status,
                sanitize(&body)
            ));
        }

        response
            .json::<DeviceCode>()
            .context("invalid device code response json")
    }

    /// Polls the token endpoint once. Pending and slow-down answers come back
    /// as non-2xx statuses carrying an `error` field.
    pub fn poll_once(&self, device: &DeviceCode) -> Result<PollStatus> {
        let url = format!("{}/token", self.oauth_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("device_code", device.device_code.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .send()
            .context("token request failed")?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.is_success() {
            let grant: TokenResponse =
                serde_json::from_str(&body).context("invalid token response json")?;
            return Ok(PollStatus::Granted(grant.into_session(None)?));
        }

        let err: TokenError = serde_json::from_str(&body).unwrap_or_default();
        match err.error.as_str() {
            "authorization_pending" => Ok(PollStatus::Pending),
            "slow_down" => Ok(PollStatus::SlowDown),
            "access_denied" => Err(anyhow!("sign-in was denied by the user")),
            "expired_token" => Err(anyhow!("device code expired before sign-in completed")),
            _ => Err(anyhow!(
                "token request failed with status {}: {}",
                status,
                sanitize(&body)
            )),
        }
    }

    /// Blocks until the user approves the device code, then persists the session.
    pub fn poll_device_token(&self, device: &DeviceCode) -> Result<SessionToken> {
        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval);

        loop {
            match self.poll_once(device)? {
                PollStatus::Granted(token) => {
                    self.save_session(&token)?;
                    tracing::info!(scope = %token.scope, "signed in");
                    return Ok(token);
                }
                PollStatus::Pending => {}
                PollStatus::SlowDown => interval += SLOW_DOWN_STEP,
            }
            if Instant::now() + interval >= deadline {
                return Err(anyhow!("device code expired before sign-in completed"));
            }
            thread::sleep(interval);
        }
    }

    pub fn refresh(&self, token: &SessionToken) -> Result<SessionToken> {
        if token.refresh_token.is_empty() {
            return Err(anyhow!("session expired and has no refresh token; sign in again"));
        }
        let url = format!("{}/token", self.oauth_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", token.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .context("token refresh request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "token refresh failed with status {}: {}",
                status,
                sanitize(&body)
            ));
        }

        let grant: TokenResponse = response.json().context("invalid refresh response json")?;
        let refreshed = grant.into_session(Some(token))?;
        self.save_session(&refreshed)?;
        tracing::debug!("access token refreshed");
        Ok(refreshed)
    }

    /// A usable bearer token, refreshing the stored session when it has expired.
    pub fn access_token(&self) -> Result<String> {
        let session = self
            .load_session()?
            .ok_or_else(|| anyhow!("not signed in, run `drivebackup login` first"))?;
        if !session.is_expired(now_unix()?) {
            return Ok(session.access_token);
        }
        Ok(self.refresh(&session)?.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_session(self, previous: Option<&SessionToken>) -> Result<SessionToken> {
        let expires_in = i64::try_from(self.expires_in).context("expires_in overflow")?;
        let refresh_token = match (self.refresh_token, previous) {
            (Some(t), _) => t,
            (None, Some(prev)) => prev.refresh_token.clone(),
            (None, None) => String::new(),
        };
        let scope = match (self.scope, previous) {
            (Some(s), _) => s,
            (None, Some(prev)) => prev.scope.clone(),
            (None, None) => String::new(),
        };
        Ok(SessionToken {
            access_token: self.access_token,
            refresh_token,
            expires_at_unix: now_unix()?.saturating_add(expires_in),
            scope,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
}

fn default_session_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("session.json"))
}

pub(crate) fn now_unix() -> Result<i64> {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("clock is before unix epoch")?;
    i64::try_from(d.as_secs()).context("unix timestamp overflow")
}

pub(crate) fn sanitize(s: &str) -> String {
    match s.char_indices().nth(240) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
