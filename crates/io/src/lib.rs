// Document access: open, read and write query formulas, save

pub mod file;
pub mod lock;
pub mod memory;
pub mod section;

pub use file::{SectionFileGateway, SectionFileSession};
pub use memory::{MemoryGateway, MemorySession};

use std::fmt;
use std::path::{Path, PathBuf};

/// Error accessing a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    NotFound(PathBuf),
    ReadOnly(PathBuf),
    /// Another session holds the document lock
    Locked { path: PathBuf, pid: Option<u32> },
    QueryNotFound { query: String, available: Vec<String> },
    Parse(String),
    Io(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::NotFound(path) => write!(f, "Document not found: {}", path.display()),
            DocumentError::ReadOnly(path) => write!(f, "Document is read-only: {}", path.display()),
            DocumentError::Locked { path, pid } => {
                write!(f, "Document is open in another session: {}", path.display())?;
                if let Some(pid) = pid {
                    write!(f, " (pid {})", pid)?;
                }
                Ok(())
            }
            DocumentError::QueryNotFound { query, available } => {
                write!(f, "Query '{}' not found.", query)?;
                if available.is_empty() {
                    write!(f, " The document has no queries.")
                } else {
                    write!(f, " Available queries: {}", available.join(", "))
                }
            }
            DocumentError::Parse(msg) => write!(f, "Cannot parse document: {}", msg),
            DocumentError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<std::io::Error> for DocumentError {
    fn from(e: std::io::Error) -> Self {
        DocumentError::Io(e.to_string())
    }
}

/// An open document. Changes stay in memory until [`save`](Self::save).
pub trait DocumentSession {
    /// Query names in document order.
    fn query_names(&self) -> Vec<String>;

    fn formula(&self, query: &str) -> Result<String, DocumentError>;

    fn set_formula(&mut self, query: &str, formula: &str) -> Result<(), DocumentError>;

    /// True if a formula was changed since open or the last save.
    fn is_dirty(&self) -> bool;

    /// Persist changes. Saving a clean session does nothing.
    fn save(&mut self) -> Result<(), DocumentError>;

    /// End the session, discarding unsaved changes.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Opens documents by path.
pub trait DocumentGateway {
    type Session: DocumentSession;

    fn open(&self, path: &Path) -> Result<Self::Session, DocumentError>;
}

pub(crate) fn query_not_found(query: &str, available: Vec<String>) -> DocumentError {
    DocumentError::QueryNotFound {
        query: query.to_string(),
        available,
    }
}
