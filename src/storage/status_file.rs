//! On-disk location of the status log.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{Result, StatusLogDocument};

/// The status log file.
///
/// Only the status log writer touches this file. A store writes a sibling
/// temporary file and renames it over the target, so a crash mid-write never
/// leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct StatusLogFile {
    path: PathBuf,
}

impl StatusLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and verifies the document.
    ///
    /// A missing or empty file yields a fresh document.
    pub async fn load(&self) -> Result<StatusLogDocument> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            tracing::debug!(path = %self.path.display(), "Status log empty, starting new document");
            return Ok(StatusLogDocument::new());
        }

        StatusLogDocument::decode(&bytes)
    }

    /// Signs and writes the whole document.
    pub async fn store(&self, document: &mut StatusLogDocument) -> Result<()> {
        let bytes = document.encode()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
