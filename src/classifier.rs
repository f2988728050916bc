//! Routes a finished validation outcome to its terminal destination.
//!
//! Rejections decided on this machine (structure, schema, signature) are
//! deterministic and go straight to the error bucket. Remote failures are
//! classified by status code where the code is conclusive, then by
//! keyword, and anything unrecognized ends up in the reprocess queue:
//! retrying a permanent failure wastes a request, but discarding a
//! transient one loses a fiscal document.

use crate::outcome::{IssueKind, ValidationOutcome, ValidationStatus};

/// Terminal destination for a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Accepted by the remote authority; goes under `processed/`.
    Success,
    /// Deterministic rejection; retrying cannot help. Goes under `errors/`.
    PermanentError,
    /// Transient or unclassified failure; goes under `reprocess/`.
    Reprocess,
}

impl Route {
    /// Directory name under the output root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Route::Success => "processed",
            Route::PermanentError => "errors",
            Route::Reprocess => "reprocess",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Messages that mark a failure as deterministic. Both Portuguese and
/// English variants appear in API responses.
const PERMANENT_KEYWORDS: &[&str] = &[
    "já existe",
    "already exists",
    "duplicate",
    "assinatura",
    "signature",
    "digital",
    "schema",
    "xsd",
    "xml malformado",
    "malformed",
];

/// Messages that mark a failure as transient.
const TEMPORARY_KEYWORDS: &[&str] = &[
    "servidor",
    "server",
    "timeout",
    "internal",
    "connection",
    "network",
    "unavailable",
    "service temporarily",
    "try again",
];

/// Client-error statuses that cannot change on resubmission. Rate
/// limiting (429) is deliberately absent: it clears on its own.
fn conclusive_status(code: u16) -> bool {
    matches!(code, 400 | 401 | 403 | 404 | 413)
}

/// Classify one outcome. Successful outcomes always route to
/// [`Route::Success`]. Failures that never reached the API (structural,
/// schema or signature rejections) are deterministic and route to
/// [`Route::PermanentError`]. Remote failures go by status code first,
/// then by message keywords, with [`Route::Reprocess`] as the default
/// when nothing matches.
pub fn classify(outcome: &ValidationOutcome) -> Route {
    if outcome.is_valid() {
        return Route::Success;
    }
    if outcome.status == ValidationStatus::Skipped {
        return Route::Reprocess;
    }

    if let Some(remote) = &outcome.remote {
        if remote.status_code.is_some_and(conclusive_status) {
            return Route::PermanentError;
        }
    }

    let mut attempted_submission = outcome.remote.is_some();
    for issue in outcome.issues_of(IssueKind::Remote) {
        attempted_submission = true;
        let message = issue.message.to_lowercase();

        if PERMANENT_KEYWORDS.iter().any(|k| message.contains(k)) {
            return Route::PermanentError;
        }
        if TEMPORARY_KEYWORDS.iter().any(|k| message.contains(k)) {
            return Route::Reprocess;
        }
    }

    if attempted_submission {
        Route::Reprocess
    } else {
        // Rejected locally before any network call; the file itself is
        // the problem and a retry cannot change the verdict.
        Route::PermanentError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{IssueKind, RemoteResponse, ValidationOutcome};
    use std::path::PathBuf;
    use std::time::Duration;

    fn outcome_with_remote_issue(message: &str) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        outcome.push_issue(IssueKind::Remote, message, None, None);
        outcome
    }

    #[test]
    fn test_valid_outcome_routes_to_processed() {
        let outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        assert_eq!(classify(&outcome), Route::Success);
    }

    #[test]
    fn test_permanent_keywords_route_to_errors() {
        for message in [
            "NFe já existe no sistema",
            "Duplicate document detected",
            "Assinatura digital inválida",
            "schema validation failed against XSD",
        ] {
            assert_eq!(
                classify(&outcome_with_remote_issue(message)),
                Route::PermanentError,
                "message: {message}"
            );
        }
    }

    #[test]
    fn test_temporary_keywords_route_to_reprocess() {
        for message in [
            "Erro interno do servidor (500)",
            "timed out contacting the API",
            "could not connect to the API",
            "service unavailable (503), server overloaded",
        ] {
            assert_eq!(
                classify(&outcome_with_remote_issue(message)),
                Route::Reprocess,
                "message: {message}"
            );
        }
    }

    #[test]
    fn test_permanent_wins_within_one_message() {
        // Substring order is permanent first, per issue.
        let route = classify(&outcome_with_remote_issue(
            "signature rejected by server",
        ));
        assert_eq!(route, Route::PermanentError);
    }

    #[test]
    fn test_unmatched_remote_failure_defaults_to_reprocess() {
        assert_eq!(
            classify(&outcome_with_remote_issue("something odd happened")),
            Route::Reprocess
        );
    }

    #[test]
    fn test_local_structural_rejection_routes_to_errors() {
        // No submission was attempted; the verdict is deterministic.
        let mut structural = ValidationOutcome::new(PathBuf::from("nota.xml"));
        structural.push_issue(IssueKind::Structure, "file too small", None, None);
        assert_eq!(classify(&structural), Route::PermanentError);

        let mut schema = ValidationOutcome::new(PathBuf::from("nota.xml"));
        schema.push_issue(IssueKind::Schema, "unexpected element", None, Some(3));
        assert_eq!(classify(&schema), Route::PermanentError);
    }

    #[test]
    fn test_skipped_outcome_routes_to_reprocess() {
        let skipped = ValidationOutcome::skipped(PathBuf::from("leia-me.txt"));
        assert_eq!(classify(&skipped), Route::Reprocess);
    }

    #[test]
    fn test_conclusive_status_codes_route_to_errors() {
        for code in [400u16, 401, 403, 404, 413] {
            let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
            outcome.attach_remote(RemoteResponse {
                success: false,
                message: "invalid or expired API token".to_string(),
                status_code: Some(code),
                elapsed: Duration::ZERO,
                payload: None,
            });
            assert_eq!(classify(&outcome), Route::PermanentError, "status: {code}");
        }
    }

    #[test]
    fn test_rate_limit_routes_to_reprocess() {
        let mut outcome = ValidationOutcome::new(PathBuf::from("nota.xml"));
        outcome.attach_remote(RemoteResponse {
            success: false,
            message: "API rate limit reached, try again later".to_string(),
            status_code: Some(429),
            elapsed: Duration::ZERO,
            payload: None,
        });
        assert_eq!(classify(&outcome), Route::Reprocess);
    }

    #[test]
    fn test_route_dir_names() {
        assert_eq!(Route::Success.dir_name(), "processed");
        assert_eq!(Route::PermanentError.dir_name(), "errors");
        assert_eq!(Route::Reprocess.dir_name(), "reprocess");
    }
}
