//! # nfe-pipeline Library
//!
//! An async Rust library for processing Brazilian NFe XML documents:
//! container extraction, multi-stage validation, remote submission with
//! bounded retry, outcome classification and terminal file organization,
//! coordinated by a semaphore-bounded session worker pool.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod extractor;
pub mod organizer;
pub mod outcome;
pub mod remote;
pub mod report;
pub mod schema;
pub mod session;
pub mod validator;

pub use classifier::{Route, classify};
pub use cli::{Cli, OutputFormat};
pub use config::{Config, ConfigManager};
pub use coordinator::{
    CoordinatorConfig, SessionCoordinator, SessionEvent, SessionHandle,
};
pub use document::{Document, DocumentKind, NfeKey};
pub use error::{PipelineError, Result};
pub use extractor::ArchiveExtractor;
pub use organizer::FileOrganizer;
pub use outcome::{
    IssueKind, RemoteResponse, ValidationIssue, ValidationOutcome, ValidationStatus,
};
pub use remote::{RemoteConfig, RemoteSubmitter, ValidaNfeClient};
pub use report::{BatchReport, FileReport, Report};
pub use schema::{DirSchemaRepository, SchemaRepository};
pub use session::{FileState, ProcessingSession, SessionSummary};
pub use validator::{DocumentValidator, ValidatorConfig};
