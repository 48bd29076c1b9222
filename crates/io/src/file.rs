// Section documents on disk

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::lock::{self, DocumentLock};
use crate::section::SectionDocument;
use crate::{query_not_found, DocumentError, DocumentGateway, DocumentSession};

/// Opens `section` export files (`*.pq`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionFileGateway;

impl SectionFileGateway {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentGateway for SectionFileGateway {
    type Session = SectionFileSession;

    fn open(&self, path: &Path) -> Result<SectionFileSession, DocumentError> {
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(DocumentError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(DocumentError::Io(format!("{}: {}", path.display(), e))),
        };
        if metadata.permissions().readonly() {
            return Err(DocumentError::ReadOnly(path.to_path_buf()));
        }

        let lock = DocumentLock::acquire(path)?;

        let text = fs::read_to_string(path)
            .map_err(|e| DocumentError::Io(format!("{}: {}", path.display(), e)))?;
        let document = SectionDocument::parse(&text)
            .map_err(|e| DocumentError::Parse(format!("{}: {}", path.display(), e)))?;

        log::info!(
            "Opened {} ({} queries)",
            path.display(),
            document.query_names().len()
        );

        Ok(SectionFileSession {
            path: path.to_path_buf(),
            document,
            dirty: false,
            _lock: lock,
        })
    }
}

/// An open section document holding the document lock.
#[derive(Debug)]
pub struct SectionFileSession {
    path: PathBuf,
    document: SectionDocument,
    dirty: bool,
    _lock: DocumentLock,
}

impl SectionFileSession {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the rendered document atomically (temp file, then rename).
    fn write(&self) -> std::io::Result<()> {
        let temp_path = lock::sibling(&self.path, "tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(self.document.render().as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }
}

impl DocumentSession for SectionFileSession {
    fn query_names(&self) -> Vec<String> {
        self.document.query_names()
    }

    fn formula(&self, query: &str) -> Result<String, DocumentError> {
        self.document
            .formula(query)
            .map(str::to_string)
            .ok_or_else(|| query_not_found(query, self.query_names()))
    }

    fn set_formula(&mut self, query: &str, formula: &str) -> Result<(), DocumentError> {
        if !self.document.set_formula(query, formula) {
            return Err(query_not_found(query, self.query_names()));
        }
        self.dirty = true;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn save(&mut self) -> Result<(), DocumentError> {
        if !self.dirty {
            return Ok(());
        }
        self.write()
            .map_err(|e| DocumentError::Io(format!("{}: {}", self.path.display(), e)))?;
        self.dirty = false;
        log::info!("Saved {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DOC: &str = "section Section1;\n\nshared Table1 = let\n    Source = Excel.CurrentWorkbook(){[Name=\"Table1\"]}[Content]\nin\n    Source;\n\nshared Rates = 1;\n";

    fn write_doc(dir: &Path) -> PathBuf {
        let path = dir.join("book.pq");
        fs::write(&path, DOC).unwrap();
        path
    }

    #[test]
    fn test_open_read_and_list() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());
        let session = SectionFileGateway::new().open(&path).unwrap();
        assert_eq!(session.query_names(), vec!["Table1", "Rates"]);
        assert_eq!(session.formula("Rates").unwrap(), "1");
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_missing_document() {
        let dir = tempdir().unwrap();
        let err = SectionFileGateway::new().open(&dir.path().join("nope.pq")).unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[test]
    fn test_directory_is_not_a_document() {
        let dir = tempdir().unwrap();
        let err = SectionFileGateway::new().open(dir.path()).unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[test]
    fn test_read_only_document() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        let err = SectionFileGateway::new().open(&path).unwrap_err();
        assert_eq!(err, DocumentError::ReadOnly(path.clone()));

        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(&path, perms).unwrap();
    }

    #[test]
    fn test_second_session_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());
        let gateway = SectionFileGateway::new();

        let first = gateway.open(&path).unwrap();
        assert!(matches!(gateway.open(&path), Err(DocumentError::Locked { .. })));
        first.close();
        assert!(gateway.open(&path).is_ok());
    }

    #[test]
    fn test_save_rewrites_only_changed_member() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());

        let mut session = SectionFileGateway::new().open(&path).unwrap();
        session.set_formula("Rates", "2").unwrap();
        assert!(session.is_dirty());
        session.save().unwrap();
        assert!(!session.is_dirty());
        session.close();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, DOC.replace("shared Rates = 1;", "shared Rates = 2;"));
        assert!(!lock::sibling(&path, "tmp").exists());
        assert!(!lock::lock_path(&path).exists());
    }

    #[test]
    fn test_close_without_save_leaves_file() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());

        let mut session = SectionFileGateway::new().open(&path).unwrap();
        session.set_formula("Table1", "1").unwrap();
        session.close();

        assert_eq!(fs::read_to_string(&path).unwrap(), DOC);
    }

    #[test]
    fn test_unknown_query() {
        let dir = tempdir().unwrap();
        let path = write_doc(dir.path());
        let mut session = SectionFileGateway::new().open(&path).unwrap();

        let err = session.formula("Sales").unwrap_err();
        assert_eq!(err.to_string(), "Query 'Sales' not found. Available queries: Table1, Rates");
        assert!(session.set_formula("Sales", "1").is_err());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_parse_error_releases_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.pq");
        fs::write(&path, "section S;\nshared Q = 1\n").unwrap();

        let err = SectionFileGateway::new().open(&path).unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
        assert!(!lock::lock_path(&path).exists());
    }
}
