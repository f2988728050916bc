//! Schema repository collaborator.
//!
//! Schemas are loaded once at startup from a directory of XSD files keyed by
//! document kind. Validation is a structural check built on quick-xml: the
//! document must be well formed, carry the root element the kind demands, and
//! use only element names the schema declares. Every violation is collected
//! with its line number; the list is never truncated to the first hit.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{info, warn};

use crate::document::DocumentKind;
use crate::error::Result;
use crate::outcome::{IssueKind, ValidationIssue};

/// External collaborator contract: answers "is a schema loaded for this kind"
/// and produces the full violation list for a document.
pub trait SchemaRepository: Send + Sync {
    fn has_schema(&self, kind: DocumentKind) -> bool;
    fn validate(&self, kind: DocumentKind, content: &str) -> Vec<ValidationIssue>;
    fn loaded_kinds(&self) -> Vec<DocumentKind>;
}

/// One parsed schema: the root element it demands and the element vocabulary
/// it declares.
#[derive(Debug, Clone)]
struct CompiledSchema {
    source: String,
    root: &'static str,
    elements: HashSet<String>,
}

/// Directory-backed schema repository.
#[derive(Debug, Default)]
pub struct DirSchemaRepository {
    schemas: HashMap<DocumentKind, CompiledSchema>,
}

impl DirSchemaRepository {
    /// Empty repository; every kind reports "schema unavailable".
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the canonical schema files from `dir`. A missing directory or
    /// unparseable schema leaves that kind unavailable rather than failing
    /// startup.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut repo = Self::default();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "schema directory not found, schema validation disabled");
            return Ok(repo);
        }

        for (kind, file_name, root) in [
            (DocumentKind::Raw, "leiauteNFe_v4.00.xsd", "NFe"),
            (DocumentKind::Processed, "procNFe_v4.00.xsd", "nfeProc"),
        ] {
            let path = dir.join(file_name);
            if !path.exists() {
                warn!(schema = file_name, "schema file not found");
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => match parse_xsd_elements(&content) {
                    Ok(elements) => {
                        info!(schema = file_name, elements = elements.len(), "schema loaded");
                        repo.schemas.insert(
                            kind,
                            CompiledSchema {
                                source: file_name.to_string(),
                                root,
                                elements,
                            },
                        );
                    }
                    Err(details) => {
                        warn!(schema = file_name, %details, "schema failed to parse");
                    }
                },
                Err(e) => warn!(schema = file_name, error = %e, "schema unreadable"),
            }
        }

        Ok(repo)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }
}

impl SchemaRepository for DirSchemaRepository {
    fn has_schema(&self, kind: DocumentKind) -> bool {
        self.schemas.contains_key(&kind)
    }

    fn validate(&self, kind: DocumentKind, content: &str) -> Vec<ValidationIssue> {
        let Some(schema) = self.schemas.get(&kind) else {
            return vec![ValidationIssue {
                kind: IssueKind::Schema,
                message: "schema unavailable".to_string(),
                detail: Some(format!("no schema loaded for kind {kind}")),
                line: None,
            }];
        };

        let mut violations = Vec::new();
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut saw_root = false;
        loop {
            let event = reader.read_event();
            // Position after the event still sits on the event's line for
            // single-line tags, which NFe documents are in practice.
            let position = reader.buffer_position();
            match event {
                Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                    let name = local_name(&start);
                    if !saw_root {
                        saw_root = true;
                        if name != schema.root {
                            violations.push(ValidationIssue {
                                kind: IssueKind::Schema,
                                message: format!(
                                    "unexpected root element <{name}>, schema {} requires <{}>",
                                    schema.source, schema.root
                                ),
                                detail: None,
                                line: Some(line_at(content, position)),
                            });
                        }
                    } else if !schema.elements.contains(&name) && name != schema.root {
                        violations.push(ValidationIssue {
                            kind: IssueKind::Schema,
                            message: format!("element <{name}> not declared by schema"),
                            detail: Some(format!("schema: {}", schema.source)),
                            line: Some(line_at(content, position)),
                        });
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    violations.push(ValidationIssue {
                        kind: IssueKind::Schema,
                        message: format!("document is not well-formed XML: {e}"),
                        detail: None,
                        line: Some(line_at(content, position)),
                    });
                    break;
                }
            }
        }

        if !saw_root {
            violations.push(ValidationIssue {
                kind: IssueKind::Schema,
                message: "document has no root element".to_string(),
                detail: None,
                line: None,
            });
        }

        violations
    }

    fn loaded_kinds(&self) -> Vec<DocumentKind> {
        self.schemas.keys().copied().collect()
    }
}

/// Collect every `name` attribute of `xs:element` declarations in an XSD.
fn parse_xsd_elements(xsd: &str) -> std::result::Result<HashSet<String>, String> {
    let mut reader = Reader::from_str(xsd);
    let mut elements = HashSet::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                if local_name(&start) == "element" {
                    for attr in start.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"name" {
                            if let Ok(value) = attr.unescape_value() {
                                elements.insert(value.into_owned());
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    if elements.is_empty() {
        return Err("schema declares no elements".to_string());
    }
    Ok(elements)
}

fn local_name(start: &quick_xml::events::BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().local_name().as_ref()).into_owned()
}

/// 1-based line number of a byte offset in `content`.
fn line_at(content: &str, byte_position: u64) -> u64 {
    let end = (byte_position as usize).min(content.len());
    content.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() as u64 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NFE_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="NFe">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="infNFe"/>
        <xs:element name="chNFe"/>
        <xs:element name="Signature"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    fn repo_with_nfe_schema() -> DirSchemaRepository {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("leiauteNFe_v4.00.xsd"), NFE_XSD).unwrap();
        DirSchemaRepository::load(temp.path()).unwrap()
    }

    #[test]
    fn test_load_missing_directory_is_empty() {
        let repo = DirSchemaRepository::load(Path::new("/nonexistent/schemas")).unwrap();
        assert_eq!(repo.schema_count(), 0);
        assert!(!repo.has_schema(DocumentKind::Raw));
    }

    #[test]
    fn test_load_single_schema() {
        let repo = repo_with_nfe_schema();
        assert_eq!(repo.schema_count(), 1);
        assert!(repo.has_schema(DocumentKind::Raw));
        assert!(!repo.has_schema(DocumentKind::Processed));
        assert_eq!(repo.loaded_kinds(), vec![DocumentKind::Raw]);
    }

    #[test]
    fn test_validate_conforming_document() {
        let repo = repo_with_nfe_schema();
        let doc = "<NFe><infNFe><chNFe>123</chNFe></infNFe></NFe>";
        assert!(repo.validate(DocumentKind::Raw, doc).is_empty());
    }

    #[test]
    fn test_validate_wrong_root() {
        let repo = repo_with_nfe_schema();
        let violations = repo.validate(DocumentKind::Raw, "<cancelamento/>");
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("unexpected root element"));
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let repo = repo_with_nfe_schema();
        let doc = "<NFe>\n<bogus/>\n<alsoBogus/>\n</NFe>";
        let violations = repo.validate(DocumentKind::Raw, doc);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].line, Some(2));
        assert_eq!(violations[1].line, Some(3));
    }

    #[test]
    fn test_validate_malformed_document() {
        let repo = repo_with_nfe_schema();
        let violations = repo.validate(DocumentKind::Raw, "<NFe><infNFe></NFe>");
        assert!(!violations.is_empty());
        assert!(
            violations
                .iter()
                .any(|v| v.message.contains("not well-formed"))
        );
    }

    #[test]
    fn test_validate_unavailable_kind() {
        let repo = repo_with_nfe_schema();
        let violations = repo.validate(DocumentKind::Processed, "<nfeProc/>");
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("schema unavailable"));
    }
}
