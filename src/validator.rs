//! Multi-stage document validation.
//!
//! The structural pipeline runs fixed stages in order: existence, size
//! bounds, encoding resolution, content normalization, declaration check,
//! subtype detection, key extraction, and signature presence. The first
//! three are terminal; later stages append issues but keep going so that
//! every structural problem is reported together. Schema validation is a
//! separate step gated on structural success and on schemas being loaded.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use tracing::debug;

use crate::document::{Document, DocumentKind, NfeKey};
use crate::error::{PipelineError, Result};
use crate::outcome::{IssueKind, ValidationOutcome, ValidationStatus};
use crate::schema::SchemaRepository;

/// Minimum plausible document size in bytes. The original had 100- and
/// 1024-byte variants; 100 is the chosen value (see DESIGN.md).
pub const MIN_DOCUMENT_BYTES: u64 = 100;

/// Hard ceiling, matching the remote authority's request-body limit.
pub const MAX_DOCUMENT_BYTES: u64 = 5 * 1024 * 1024;

const XML_DECLARATION: &str = "<?xml";

/// Root-element markers that identify an authority-processed wrapper.
const PROCESSED_MARKERS: &[&str] = &["<nfeProc", "<procNFe"];
/// Root-element markers that identify a raw document.
const RAW_MARKERS: &[&str] = &["<NFe", "<infNFe"];

// Key patterns, in precedence order. Each captures the raw candidate;
// NfeKey::parse enforces the 44-digit rule so near-misses fall through
// to the next pattern.
static KEY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<chNFe>([^<]*)</chNFe>").unwrap());
static KEY_ID_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[Ii]d="NFe([^"]*)""#).unwrap());
static KEY_INF_NFE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<(?:\w+:)?infNFe[^>]*[Ii]d="NFe([^"]*)""#).unwrap());

static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?Signature[\s>]").unwrap());

/// Decode a document with the encoding fallback chain:
/// UTF-8, UTF-8 with signature, then the single-byte legacy family
/// (Latin-1 / ISO-8859-1 / Windows-1252 via encoding_rs).
///
/// Returns the decoded text and the name of the winning encoding.
pub fn read_document_content(path: &Path) -> Result<(String, &'static str)> {
    let bytes = std::fs::read(path)?;
    decode_content(&bytes).ok_or_else(|| PipelineError::Structure {
        file: path.to_path_buf(),
        details: "no supported encoding could decode the file".to_string(),
    })
}

fn decode_content(bytes: &[u8]) -> Option<(String, &'static str)> {
    if bytes.is_empty() {
        return None;
    }

    if let Some(stripped) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(text) = std::str::from_utf8(stripped) {
            return Some((text.to_string(), "utf-8-sig"));
        }
    } else if let Ok(text) = std::str::from_utf8(bytes) {
        return Some((text.to_string(), "utf-8"));
    }

    // The single-byte decoder accepts any byte sequence, so the chain
    // always terminates here for non-UTF-8 input.
    let (text, _had_replacements) =
        encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
    Some((text.into_owned(), "windows-1252"))
}

/// Strip a leading byte-order mark and drop non-printable control
/// characters (tab, CR and LF survive).
pub fn normalize_content(content: &str) -> String {
    content
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Three-tier declaration check: exact prefix, prefix within the first 100
/// characters, then a full parse with a marker fallback.
fn has_xml_declaration(content: &str) -> bool {
    let trimmed = content.trim_start();
    if trimmed.starts_with(XML_DECLARATION) {
        return true;
    }

    let head: String = content.chars().take(100).collect();
    if head.contains(XML_DECLARATION) {
        return true;
    }

    if parses_as_xml(content) {
        return true;
    }
    PROCESSED_MARKERS
        .iter()
        .chain(RAW_MARKERS.iter())
        .any(|marker| content.contains(marker))
}

fn parses_as_xml(content: &str) -> bool {
    let mut reader = quick_xml::Reader::from_str(content);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Eof) => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

/// Subtype detection by marker precedence: processed-wrapper markers win
/// over raw markers.
pub fn detect_kind(content: &str) -> DocumentKind {
    if PROCESSED_MARKERS.iter().any(|m| content.contains(m)) {
        DocumentKind::Processed
    } else if RAW_MARKERS.iter().any(|m| content.contains(m)) {
        DocumentKind::Raw
    } else {
        DocumentKind::Unknown
    }
}

/// Extract the canonical key with the ordered pattern chain. A candidate
/// that is not exactly 44 digits is rejected and the next pattern is tried.
pub fn extract_key(content: &str) -> Option<NfeKey> {
    for pattern in [&*KEY_TAG_RE, &*KEY_ID_ATTR_RE, &*KEY_INF_NFE_RE] {
        if let Some(caps) = pattern.captures(content) {
            if let Ok(key) = NfeKey::parse(&caps[1]) {
                return Some(key);
            }
        }
    }
    None
}

pub fn signature_present(content: &str) -> bool {
    SIGNATURE_RE.is_match(content)
}

/// Lightweight structural precheck shared with the remote client
/// (defense in depth before any network call). Returns the failure
/// message, or None when the content looks like a fiscal document.
pub fn precheck_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 10 {
        return Some("document is empty or too small".to_string());
    }
    if !has_xml_declaration(content) {
        return Some("document has no XML declaration".to_string());
    }
    if detect_kind(content) == DocumentKind::Unknown {
        return Some("document does not look like an NFe".to_string());
    }
    None
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_size: MIN_DOCUMENT_BYTES,
            max_size: MAX_DOCUMENT_BYTES,
        }
    }
}

/// Runs the structural pipeline and the gated schema step.
pub struct DocumentValidator {
    schemas: Arc<dyn SchemaRepository>,
    config: ValidatorConfig,
}

impl DocumentValidator {
    pub fn new(schemas: Arc<dyn SchemaRepository>, config: ValidatorConfig) -> Self {
        Self { schemas, config }
    }

    /// Full validation: structure, then schema when structure passed and
    /// schemas are loaded. Fills in the document's kind and key.
    pub fn validate(&self, doc: &mut Document) -> ValidationOutcome {
        let started = Instant::now();
        let mut outcome = self.validate_structure(doc);

        if outcome.status == ValidationStatus::Success && !self.schemas.loaded_kinds().is_empty() {
            self.validate_schema(doc, &mut outcome);
        }

        outcome.elapsed = started.elapsed();
        outcome
    }

    /// Structural stages only.
    pub fn validate_structure(&self, doc: &mut Document) -> ValidationOutcome {
        let started = Instant::now();
        let mut outcome = ValidationOutcome::new(doc.path.clone());

        // Stage 1: existence (terminal).
        if !doc.exists() {
            outcome.push_issue(
                IssueKind::Structure,
                "file not found",
                Some(format!("{} does not exist", doc.file_name())),
                None,
            );
            outcome.elapsed = started.elapsed();
            return outcome;
        }

        // Stage 2: size bounds (terminal).
        if doc.size < self.config.min_size {
            outcome.push_issue(
                IssueKind::Structure,
                "file too small",
                Some(format!("file is only {} bytes", doc.size)),
                None,
            );
            outcome.elapsed = started.elapsed();
            return outcome;
        }
        if doc.size > self.config.max_size {
            outcome.push_issue(
                IssueKind::Structure,
                "file too large",
                Some(format!(
                    "file is {:.1} MB (limit {} MB)",
                    doc.size as f64 / (1024.0 * 1024.0),
                    self.config.max_size / (1024 * 1024)
                )),
                None,
            );
            outcome.elapsed = started.elapsed();
            return outcome;
        }

        // Stage 3: encoding resolution (terminal).
        let content = match read_document_content(&doc.path) {
            Ok((content, encoding)) => {
                debug!(file = %doc.file_name(), encoding, "decoded document");
                content
            }
            Err(e) => {
                outcome.push_issue(
                    IssueKind::Structure,
                    "encoding failure",
                    Some(e.to_string()),
                    None,
                );
                outcome.elapsed = started.elapsed();
                return outcome;
            }
        };

        // Stage 4: normalization.
        let content = normalize_content(&content);

        // Stage 5: declaration (non-terminal; later stages still run so all
        // structural problems surface together).
        if !has_xml_declaration(&content) {
            outcome.push_issue(
                IssueKind::Structure,
                "missing XML declaration",
                Some("file does not carry a valid XML declaration".to_string()),
                None,
            );
        }

        // Stage 6: subtype detection.
        doc.kind = detect_kind(&content);
        if doc.kind == DocumentKind::Unknown {
            outcome.push_issue(
                IssueKind::Structure,
                "NFe content not found",
                Some("file does not appear to contain fiscal document data".to_string()),
                None,
            );
        }

        // Stage 7: key extraction (non-terminal).
        match extract_key(&content) {
            Some(key) => {
                doc.key = Some(key.clone());
                outcome.key = Some(key);
            }
            None => {
                outcome.push_issue(
                    IssueKind::Structure,
                    "NFe key not found",
                    Some("no 44-digit access key could be extracted".to_string()),
                    None,
                );
            }
        }

        // Signature presence only; cryptographic verification is the
        // authority's job.
        outcome.signature_present = signature_present(&content);
        if !outcome.signature_present {
            outcome.push_issue(
                IssueKind::Signature,
                "no digital signature found",
                None,
                None,
            );
        }

        outcome.elapsed = started.elapsed();
        outcome
    }

    /// Schema step: pick the schema for the detected kind and collect every
    /// violation. Unavailable schema is reported, not skipped silently.
    pub fn validate_schema(&self, doc: &Document, outcome: &mut ValidationOutcome) {
        if !self.schemas.has_schema(doc.kind) {
            outcome.push_issue(
                IssueKind::Schema,
                "schema unavailable",
                Some(format!("no schema loaded for kind {}", doc.kind)),
                None,
            );
            return;
        }

        let content = match read_document_content(&doc.path) {
            Ok((content, _)) => normalize_content(&content),
            Err(e) => {
                outcome.push_issue(IssueKind::Schema, "unreadable document", Some(e.to_string()), None);
                return;
            }
        };

        let violations = self.schemas.validate(doc.kind, &content);
        if violations.is_empty() {
            outcome.schema_valid = true;
        } else {
            for violation in violations {
                outcome.issues.push(violation);
            }
            if outcome.status == ValidationStatus::Success {
                outcome.status = ValidationStatus::Failed;
            }
        }
    }
}
