//! Resolving a picked document into a display name and its text.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Opaque handle to a user-selected document: a filesystem path or a
/// `file://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(self.0.strip_prefix("file://").unwrap_or(&self.0))
    }
}

impl From<&Path> for DocumentRef {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub display_name: String,
    pub size: Option<u64>,
}

/// Source of document metadata and content streams.
pub trait DocumentProvider: Send + Sync {
    /// Metadata rows for `doc`. `None` when the provider produced no result
    /// set at all, an empty vec when it produced one without rows.
    fn query(&self, doc: &DocumentRef) -> Option<Vec<DocumentMetadata>>;

    fn open(&self, doc: &DocumentRef) -> Option<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub contents: String,
}

/// Reads the whole document into memory.
///
/// An empty metadata result set is an error; a stream that cannot be opened
/// degrades to empty contents.
pub fn read_document(provider: &dyn DocumentProvider, doc: &DocumentRef) -> io::Result<Document> {
    let mut name = String::new();
    if let Some(rows) = provider.query(doc) {
        match rows.into_iter().next() {
            Some(row) => {
                tracing::debug!(doc = doc.as_str(), size = ?row.size, "document metadata");
                name = row.display_name;
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "Empty cursor returned for file.",
                ));
            }
        }
    }

    let contents = match provider.open(doc) {
        Some(mut stream) => {
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw)?;
            String::from_utf8_lossy(&raw).into_owned()
        }
        None => String::new(),
    };

    tracing::debug!(doc = doc.as_str(), name = %name, bytes = contents.len(), "read document");
    Ok(Document { name, contents })
}

/// Documents on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

impl DocumentProvider for LocalFiles {
    fn query(&self, doc: &DocumentRef) -> Option<Vec<DocumentMetadata>> {
        let path = doc.to_path();
        let rows = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => vec![DocumentMetadata {
                display_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: Some(meta.len()),
            }],
            _ => Vec::new(),
        };
        Some(rows)
    }

    fn open(&self, doc: &DocumentRef) -> Option<Box<dyn Read + Send>> {
        fs::File::open(doc.to_path())
            .ok()
            .map(|f| Box::new(f) as Box<dyn Read + Send>)
    }
}
