//! NFe document entity and the 44-digit canonical access key.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Detected document subtype, distinguished by root-element markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Authority-processed wrapper (`nfeProc` / `procNFe` root)
    Processed,
    /// Raw document (`NFe` / `infNFe` root)
    Raw,
    /// Neither marker found
    Unknown,
}

impl DocumentKind {
    pub fn is_known(&self) -> bool {
        !matches!(self, DocumentKind::Unknown)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Processed => write!(f, "procNFe"),
            DocumentKind::Raw => write!(f, "NFe"),
            DocumentKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Canonical 44-digit access key uniquely identifying a fiscal document.
///
/// Construction validates length and digit-ness; a `NfeKey` in hand is always
/// exactly 44 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NfeKey(String);

impl NfeKey {
    pub const LEN: usize = 44;

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != Self::LEN || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::Unexpected(format!(
                "invalid NFe key: expected {} digits, got {:?}",
                Self::LEN,
                trimmed
            )));
        }
        Ok(NfeKey(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NfeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate file entering the pipeline.
///
/// Immutable once constructed except for `kind` and `key`, which validation
/// fills in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub size: u64,
    pub kind: DocumentKind,
    pub key: Option<NfeKey>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Resolve a path into a Document, capturing size and timestamps.
    /// The file may legitimately not exist yet; validation reports that case.
    pub fn from_path(path: &Path) -> Self {
        let metadata = std::fs::metadata(path).ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
        // Creation time is not available on every filesystem.
        let created_at = metadata
            .as_ref()
            .and_then(|m| m.created().ok())
            .map(DateTime::<Utc>::from);
        let modified_at = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        Self {
            path: path.to_path_buf(),
            size,
            kind: DocumentKind::Unknown,
            key: None,
            created_at,
            modified_at,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn is_xml(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_key_accepts_exactly_44_digits() {
        let digits = "3".repeat(44);
        let key = NfeKey::parse(&digits).unwrap();
        assert_eq!(key.as_str(), digits);
        assert_eq!(key.to_string(), digits);
    }

    #[test]
    fn test_key_rejects_wrong_length() {
        assert!(NfeKey::parse(&"3".repeat(43)).is_err());
        assert!(NfeKey::parse(&"3".repeat(45)).is_err());
        assert!(NfeKey::parse("").is_err());
    }

    #[test]
    fn test_key_rejects_non_numeric() {
        let mixed = format!("{}X", "3".repeat(43));
        assert_eq!(mixed.len(), 44);
        assert!(NfeKey::parse(&mixed).is_err());
    }

    #[test]
    fn test_key_trims_whitespace() {
        let digits = "7".repeat(44);
        let key = NfeKey::parse(&format!("  {digits}\n")).unwrap();
        assert_eq!(key.as_str(), digits);
    }

    #[test]
    fn test_document_from_existing_file() {
        let mut file = NamedTempFile::with_suffix(".xml").unwrap();
        write!(file, "<NFe/>").unwrap();
        file.flush().unwrap();

        let doc = Document::from_path(file.path());
        assert!(doc.exists());
        assert!(doc.is_xml());
        assert_eq!(doc.size, 6);
        assert_eq!(doc.kind, DocumentKind::Unknown);
        assert!(doc.key.is_none());
        assert!(doc.modified_at.is_some());
    }

    #[test]
    fn test_document_from_missing_file() {
        let doc = Document::from_path(Path::new("/nonexistent/nota.xml"));
        assert!(!doc.exists());
        assert_eq!(doc.size, 0);
        assert!(doc.created_at.is_none());
        assert!(doc.modified_at.is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DocumentKind::Processed.to_string(), "procNFe");
        assert_eq!(DocumentKind::Raw.to_string(), "NFe");
        assert!(!DocumentKind::Unknown.is_known());
        assert!(DocumentKind::Raw.is_known());
    }
}
