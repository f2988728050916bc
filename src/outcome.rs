//! Validation outcome model: per-document status, the append-only issue list,
//! and the remote authority's response.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::NfeKey;

/// Overall status of one document's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// All checks passed
    Success,
    /// One or more checks failed
    Failed,
    /// An internal error prevented validation from completing
    Error,
    /// Validation was not applicable (e.g. nothing to do)
    Skipped,
}

/// Category of a single recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Structure,
    Schema,
    Signature,
    Remote,
}

impl IssueKind {
    pub fn label(&self) -> &'static str {
        match self {
            IssueKind::Structure => "STRUCTURE",
            IssueKind::Schema => "SCHEMA",
            IssueKind::Signature => "SIGNATURE",
            IssueKind::Remote => "REMOTE",
        }
    }
}

/// One recorded validation issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
    pub detail: Option<String>,
    pub line: Option<u64>,
}

impl ValidationIssue {
    pub fn render(&self) -> String {
        let mut out = format!("[{}] {}", self.kind.label(), self.message);
        if let Some(line) = self.line {
            out.push_str(&format!(" (line {line})"));
        }
        if let Some(detail) = &self.detail {
            out.push_str(&format!(" - {detail}"));
        }
        out
    }
}

/// Response from the remote authority.
///
/// `success` is the application-level verdict: it stays `true` for the
/// idempotent-duplicate status code (409) even though that is not a 2xx.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub success: bool,
    pub message: String,
    pub status_code: Option<u16>,
    pub elapsed: Duration,
    pub payload: Option<serde_json::Value>,
}

impl RemoteResponse {
    pub fn failure(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code: None,
            elapsed,
            payload: None,
        }
    }
}

/// Result of running the validation pipeline on one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub document_path: PathBuf,
    pub status: ValidationStatus,
    pub validated_at: DateTime<Utc>,
    pub issues: Vec<ValidationIssue>,
    pub schema_valid: bool,
    pub signature_present: bool,
    pub key: Option<NfeKey>,
    pub elapsed: Duration,
    pub remote: Option<RemoteResponse>,
}

impl ValidationOutcome {
    pub fn new(document_path: PathBuf) -> Self {
        Self {
            document_path,
            status: ValidationStatus::Success,
            validated_at: Utc::now(),
            issues: Vec::new(),
            schema_valid: false,
            signature_present: false,
            key: None,
            elapsed: Duration::ZERO,
            remote: None,
        }
    }

    pub fn skipped(document_path: PathBuf) -> Self {
        Self {
            status: ValidationStatus::Skipped,
            ..Self::new(document_path)
        }
    }

    /// Append an issue. The first issue moves the status off `Success`;
    /// an `Error` status is never downgraded back to `Failed`.
    pub fn push_issue(
        &mut self,
        kind: IssueKind,
        message: impl Into<String>,
        detail: Option<String>,
        line: Option<u64>,
    ) {
        self.issues.push(ValidationIssue {
            kind,
            message: message.into(),
            detail,
            line,
        });
        if self.status == ValidationStatus::Success {
            self.status = ValidationStatus::Failed;
        }
    }

    /// Record the remote response; a failed submission also lands in the
    /// issue list so the classifier sees one uniform error channel.
    pub fn attach_remote(&mut self, response: RemoteResponse) {
        if !response.success {
            self.push_issue(IssueKind::Remote, response.message.clone(), None, None);
        }
        self.remote = Some(response);
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Success && self.issues.is_empty()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_issue_flips_status() {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        assert!(outcome.is_valid());

        outcome.push_issue(IssueKind::Structure, "missing declaration", None, None);
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert!(!outcome.is_valid());

        // Further issues only accumulate.
        outcome.push_issue(IssueKind::Schema, "bad element", None, Some(12));
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert_eq!(outcome.issues.len(), 2);
    }

    #[test]
    fn test_issue_order_preserved() {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        outcome.push_issue(IssueKind::Structure, "first", None, None);
        outcome.push_issue(IssueKind::Signature, "second", None, None);
        outcome.push_issue(IssueKind::Remote, "third", None, None);

        let messages: Vec<_> = outcome.issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_attach_failed_remote_records_issue() {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        outcome.attach_remote(RemoteResponse {
            success: false,
            message: "invalid token".to_string(),
            status_code: Some(401),
            elapsed: Duration::from_millis(80),
            payload: None,
        });

        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert_eq!(outcome.issues_of(IssueKind::Remote).count(), 1);
        assert_eq!(outcome.remote.as_ref().unwrap().status_code, Some(401));
    }

    #[test]
    fn test_attach_successful_remote_keeps_status() {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        outcome.attach_remote(RemoteResponse {
            success: true,
            message: "already submitted".to_string(),
            status_code: Some(409),
            elapsed: Duration::from_millis(40),
            payload: None,
        });

        assert_eq!(outcome.status, ValidationStatus::Success);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_issue_render() {
        let issue = ValidationIssue {
            kind: IssueKind::Schema,
            message: "element out of place".to_string(),
            detail: Some("unexpected <det>".to_string()),
            line: Some(7),
        };
        let rendered = issue.render();
        assert!(rendered.starts_with("[SCHEMA]"));
        assert!(rendered.contains("line 7"));
        assert!(rendered.contains("unexpected <det>"));
    }
}
