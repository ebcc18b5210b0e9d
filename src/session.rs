//! The storage session: resolves the application folder once, then serves
//! uploads and counts against it.

use crate::document::{DocumentProvider, DocumentRef, read_document};
use crate::drive::StorageApi;
use crate::work::{TaskDispatcher, TaskId, UploadTask};
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} attempted before the storage session was initialized")]
    NotInitialized { operation: &'static str },

    #[error("unable to read document: {0}")]
    Document(#[from] io::Error),

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Foreground,
    Background,
}

impl UploadMode {
    /// Operation name reported when the session is not ready.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Foreground => "upload",
            Self::Background => "background upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReceipt {
    Uploaded { name: String, file_id: String },
    Enqueued { name: String, task_id: TaskId },
}

impl UploadReceipt {
    pub fn name(&self) -> &str {
        match self {
            Self::Uploaded { name, .. } | Self::Enqueued { name, .. } => name,
        }
    }
}

/// A signed-in client bound to its application folder.
pub struct DriveSession {
    storage: Arc<dyn StorageApi>,
    folder_id: String,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl DriveSession {
    /// Fetches or creates `folder_name`, then binds `dispatcher` to the same
    /// client. Blocking; callers with a UI run this off the main thread.
    pub fn open(
        storage: Arc<dyn StorageApi>,
        folder_name: &str,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> SessionResult<Self> {
        let folder_id = storage.fetch_or_create_app_folder(folder_name)?;
        tracing::info!(folder = folder_name, id = %folder_id, "application folder ready");
        dispatcher.bind(storage.clone())?;
        Ok(Self {
            storage,
            folder_id,
            dispatcher,
        })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// Creates the file, then writes `contents` into it. A failed write
    /// leaves the created file behind.
    pub fn upload(&self, name: &str, contents: &str) -> SessionResult<String> {
        let file_id = self.storage.create_file(&self.folder_id, name)?;
        self.storage.save_file(&file_id, name, contents)?;
        tracing::info!(name, file = %file_id, "uploaded");
        Ok(file_id)
    }

    pub fn upload_in_background(&self, name: &str, contents: &str) -> SessionResult<TaskId> {
        let id = self.dispatcher.enqueue(UploadTask {
            name: name.to_string(),
            contents: contents.to_string(),
            folder_id: self.folder_id.clone(),
        })?;
        Ok(id)
    }

    /// Number of files visible to the app. Not cached.
    pub fn count_files(&self) -> SessionResult<usize> {
        let files = self.storage.list_files()?;
        let folders = files.iter().filter(|f| f.is_folder()).count();
        tracing::info!(count = files.len(), folders, "counted files");
        Ok(files.len())
    }

    pub fn upload_document(
        &self,
        provider: &dyn DocumentProvider,
        doc: &DocumentRef,
        mode: UploadMode,
    ) -> SessionResult<UploadReceipt> {
        let document = read_document(provider, doc)?;
        let receipt = match mode {
            UploadMode::Foreground => {
                let file_id = self.upload(&document.name, &document.contents)?;
                UploadReceipt::Uploaded {
                    name: document.name,
                    file_id,
                }
            }
            UploadMode::Background => {
                let task_id = self.upload_in_background(&document.name, &document.contents)?;
                UploadReceipt::Enqueued {
                    name: document.name,
                    task_id,
                }
            }
        };
        tracing::debug!(doc = doc.as_str(), name = receipt.name(), ?mode, "document handed off");
        Ok(receipt)
    }
}

#[derive(Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Ready(Arc<DriveSession>),
}

/// Owner of the session state. Every operation fails with
/// [`SessionError::NotInitialized`] until a [`DriveSession`] is installed.
pub struct FileSession {
    state: SessionState,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl FileSession {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            state: SessionState::Uninitialized,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> Arc<dyn TaskDispatcher> {
        self.dispatcher.clone()
    }

    pub fn initialize(
        &mut self,
        storage: Arc<dyn StorageApi>,
        folder_name: &str,
    ) -> SessionResult<Arc<DriveSession>> {
        let session = DriveSession::open(storage, folder_name, self.dispatcher.clone())?;
        Ok(self.install(session))
    }

    pub fn install(&mut self, session: DriveSession) -> Arc<DriveSession> {
        let session = Arc::new(session);
        self.state = SessionState::Ready(session.clone());
        session
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    pub fn folder_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Ready(s) => Some(s.folder_id()),
            SessionState::Uninitialized => None,
        }
    }

    pub fn ready(&self, operation: &'static str) -> SessionResult<Arc<DriveSession>> {
        match &self.state {
            SessionState::Ready(s) => Ok(s.clone()),
            SessionState::Uninitialized => Err(SessionError::NotInitialized { operation }),
        }
    }

    pub fn count_files(&self) -> SessionResult<usize> {
        self.ready("count")?.count_files()
    }

    pub fn upload_document(
        &self,
        provider: &dyn DocumentProvider,
        doc: &DocumentRef,
        mode: UploadMode,
    ) -> SessionResult<UploadReceipt> {
        self.ready(mode.operation())?
            .upload_document(provider, doc, mode)
    }
}
