use crate::auth::{GoogleAuth, sanitize};
use crate::config::AppConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const TEXT_MIME_TYPE: &str = "text/plain";
const USER_AGENT: &str = concat!("drivebackup/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: String,
}

impl RemoteFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// The remote operations the backup session and the deferred worker rely on.
pub trait StorageApi: Send + Sync {
    /// Returns the id of the folder called `name`, creating it when no such
    /// folder is visible to the app yet.
    fn fetch_or_create_app_folder(&self, name: &str) -> Result<String>;

    /// Creates an empty text file under `parent_id` and returns its id.
    fn create_file(&self, parent_id: &str, name: &str) -> Result<String>;

    /// Overwrites the name and content of an existing file.
    fn save_file(&self, file_id: &str, name: &str, contents: &str) -> Result<()>;

    /// Every non-trashed file the app can see.
    fn list_files(&self) -> Result<Vec<RemoteFile>>;
}

pub struct DriveConfig {
    pub auth: GoogleAuth,
    pub api_base_url: String,
}

pub struct Drive {
    http: reqwest::blocking::Client,
    auth: GoogleAuth,
    api_base_url: String,
}

impl Drive {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::from_config(DriveConfig {
            auth: GoogleAuth::new(config)?,
            api_base_url: config.api_base_url.clone(),
        })
    }

    pub fn from_config(cfg: DriveConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .context("failed to build http client")?,
            auth: cfg.auth,
            api_base_url: cfg.api_base_url,
        })
    }

    pub fn auth(&self) -> &GoogleAuth {
        &self.auth
    }

    fn files_url(&self) -> String {
        format!(
            "{}/drive/v3/files",
            self.api_base_url.trim_end_matches('/')
        )
    }

    /// Account the stored credential belongs to.
    pub fn about(&self) -> Result<AccountInfo> {
        let token = self.auth.access_token()?;
        let url = format!(
            "{}/drive/v3/about",
            self.api_base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[("fields", "user(displayName,emailAddress)")])
            .send()
            .context("about request failed")?;
        let response = check_status(response, "about")?;

        let about: AboutResponse = response.json().context("invalid about json")?;
        Ok(about.user)
    }

    fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>> {
        let q = format!(
            "mimeType = '{}' and name = '{}' and trashed = false",
            FOLDER_MIME_TYPE,
            escape_query_value(name)
        );
        let response = self
            .http
            .get(self.files_url())
            .bearer_auth(token)
            .query(&[
                ("q", q.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id,name,mimeType)"),
            ])
            .send()
            .context("folder lookup request failed")?;
        let response = check_status(response, "folder lookup")?;

        let payload: FileListResponse = response.json().context("invalid folder lookup json")?;
        Ok(payload.files.into_iter().next().map(|f| f.id))
    }

    fn create(&self, token: &str, metadata: &FileMetadata<'_>, op: &str) -> Result<String> {
        let response = self
            .http
            .post(self.files_url())
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(metadata)
            .send()
            .with_context(|| format!("{} request failed", op))?;
        let response = check_status(response, op)?;

        let created: CreatedFile = response
            .json()
            .with_context(|| format!("invalid {} json", op))?;
        Ok(created.id)
    }
}

impl StorageApi for Drive {
    fn fetch_or_create_app_folder(&self, name: &str) -> Result<String> {
        let token = self.auth.access_token()?;
        if let Some(id) = self.find_folder(&token, name)? {
            tracing::debug!(folder = name, id = %id, "using existing app folder");
            return Ok(id);
        }

        let metadata = FileMetadata {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: None,
        };
        let id = self.create(&token, &metadata, "create folder")?;
        tracing::info!(folder = name, id = %id, "created app folder");
        Ok(id)
    }

    fn create_file(&self, parent_id: &str, name: &str) -> Result<String> {
        let token = self.auth.access_token()?;
        let metadata = FileMetadata {
            name,
            mime_type: TEXT_MIME_TYPE,
            parents: Some(vec![parent_id]),
        };
        self.create(&token, &metadata, "create file")
    }

    fn save_file(&self, file_id: &str, name: &str, contents: &str) -> Result<()> {
        let token = self.auth.access_token()?;
        let url = format!(
            "{}/upload/drive/v3/files/{}",
            self.api_base_url.trim_end_matches('/'),
            file_id
        );

        let (boundary, body) = multipart_body(name, contents)?;
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .context("save file request failed")?;
        check_status(response, "save file")?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<RemoteFile>> {
        let token = self.auth.access_token()?;
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut rb = self.http.get(self.files_url()).bearer_auth(&token).query(&[
                ("q", "trashed = false"),
                ("spaces", "drive"),
                ("pageSize", PAGE_SIZE),
                ("fields", "nextPageToken,files(id,name,mimeType)"),
            ]);
            if let Some(pt) = &page_token {
                rb = rb.query(&[("pageToken", pt.as_str())]);
            }

            let response = rb.send().context("list files request failed")?;
            let response = check_status(response, "list files")?;
            let payload: FileListResponse = response.json().context("invalid list files json")?;

            files.extend(payload.files);
            match payload.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }
}

#[derive(Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<&'a str>>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountInfo {
    #[serde(default, rename = "displayName")]
    pub display_name: String,
    #[serde(default, rename = "emailAddress")]
    pub email_address: String,
}

#[derive(Deserialize)]
struct AboutResponse {
    #[serde(default)]
    user: AccountInfo,
}

/// Builds a `multipart/related` body of JSON metadata plus the text, and
/// returns it with its boundary. The boundary never occurs in either part.
fn multipart_body(name: &str, contents: &str) -> Result<(String, String)> {
    let metadata = serde_json::json!({ "name": name });
    let metadata = serde_json::to_string(&metadata).context("failed to encode file metadata")?;
    let boundary = unused_boundary(&[&metadata, contents]);
    let body = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n{body}\r\n--{b}--\r\n",
        b = boundary,
        meta = metadata,
        mime = TEXT_MIME_TYPE,
        body = contents,
    );
    Ok((boundary, body))
}

fn unused_boundary(parts: &[&str]) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    loop {
        let boundary = format!(
            "drivebackup-{:08x}-{:x}",
            nanos,
            SEQ.fetch_add(1, Ordering::Relaxed)
        );
        if !parts.iter().any(|p| p.contains(&boundary)) {
            return boundary;
        }
    }
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn check_status(
    response: reqwest::blocking::Response,
    op: &str,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(anyhow!("{} failed ({}): {}", op, status, sanitize(&body)))
}
