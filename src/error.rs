use std::path::PathBuf;

use thiserror::Error;

/// Main pipeline error type covering every failure mode a document can hit
/// between intake and terminal placement.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extraction failed: {container} - {details}")]
    Extraction { container: PathBuf, details: String },

    #[error("unsupported archive format: {extension} ({container})")]
    UnsupportedArchive {
        container: PathBuf,
        extension: String,
    },

    #[error("structure error: {file} - {details}")]
    Structure { file: PathBuf, details: String },

    #[error("request timeout after {timeout_seconds}s: {url}")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("concurrent operation error: {details}")]
    Concurrency { details: String },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Transient errors are eligible for the submission retry policy;
    /// everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Structure {
            file: PathBuf::from("/tmp/nota.xml"),
            details: "file too small".to_string(),
        };
        assert!(err.to_string().contains("structure error"));
        assert!(err.to_string().contains("nota.xml"));

        let err = PipelineError::UnsupportedArchive {
            container: PathBuf::from("batch.rar"),
            extension: "rar".to_string(),
        };
        assert!(err.to_string().contains("unsupported archive format"));
        assert!(err.to_string().contains("rar"));
    }

    #[test]
    fn test_transient_classification() {
        let timeout = PipelineError::Timeout {
            url: "https://api.validanfe.com".to_string(),
            timeout_seconds: 30,
        };
        assert!(timeout.is_transient());

        let structure = PipelineError::Structure {
            file: PathBuf::from("nota.xml"),
            details: "too small".to_string(),
        };
        assert!(!structure.is_transient());

        let io: PipelineError = std::io::Error::other("disk").into();
        assert!(!io.is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = PipelineError::Io(io);
        assert_eq!(err.source().unwrap().to_string(), "file not found");
    }
}
