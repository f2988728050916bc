//! Concurrent session coordination.
//!
//! Each batch of inputs becomes one [`ProcessingSession`]. Containers are
//! extracted into a session-scoped ephemeral directory at dispatch, then
//! every document gets its own semaphore-bounded tokio task running the
//! full pipeline: structural and schema validation, remote submission,
//! classification, placement. Results arrive in completion order over a
//! per-session mpsc event stream.
//!
//! The session store is a single mutex-guarded map keyed by session id.
//! Ephemeral directories are removed after a grace delay, and only when
//! no file inside them is still active; a blocked cleanup is retried
//! instead of deleting mid-use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::classifier::{self, Route};
use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::extractor::ArchiveExtractor;
use crate::organizer::FileOrganizer;
use crate::outcome::{IssueKind, ValidationOutcome, ValidationStatus};
use crate::remote::RemoteSubmitter;
use crate::session::{FileState, ProcessingSession, SessionSummary};
use crate::validator::{self, DocumentValidator};

/// Default worker cap per coordinator.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Grace delay before an ephemeral directory is considered for removal.
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(5);

const CLEANUP_RETRIES: u32 = 3;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_workers: usize,
    pub cleanup_grace: Duration,
    /// Bound on how long `stop` waits for in-flight work.
    pub stop_timeout: Duration,
    /// Move finished files into the output layout.
    pub auto_organize: bool,
    pub output_root: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
            stop_timeout: Duration::from_secs(30),
            auto_organize: true,
            output_root: PathBuf::from("output"),
        }
    }
}

/// Progress and result notifications for one session, in completion order.
#[derive(Debug)]
pub enum SessionEvent {
    FileStarted {
        session_id: String,
        path: PathBuf,
    },
    FileFinished {
        session_id: String,
        path: PathBuf,
        outcome: Box<ValidationOutcome>,
        route: Route,
        placed_at: Option<PathBuf>,
    },
    SessionCompleted {
        session_id: String,
        summary: SessionSummary,
    },
}

/// Handle returned by dispatch: the session id plus its event stream.
pub struct SessionHandle {
    pub session_id: String,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Owns the session store and the worker pool.
pub struct SessionCoordinator {
    validator: Arc<DocumentValidator>,
    submitter: Arc<dyn RemoteSubmitter>,
    organizer: FileOrganizer,
    extractor: ArchiveExtractor,
    config: CoordinatorConfig,
    sessions: Arc<Mutex<HashMap<String, ProcessingSession>>>,
    semaphore: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl SessionCoordinator {
    pub fn new(
        validator: Arc<DocumentValidator>,
        submitter: Arc<dyn RemoteSubmitter>,
        config: CoordinatorConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            validator,
            submitter,
            organizer: FileOrganizer::new(),
            extractor: ArchiveExtractor::default(),
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            semaphore,
            accepting: AtomicBool::new(true),
        }
    }

    /// Swap in an extractor with non-default settings.
    pub fn with_extractor(mut self, extractor: ArchiveExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run one extraction on the blocking pool, holding a worker permit
    /// so archive I/O counts against the same cap as document work.
    async fn extract_container(&self, input: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let _permit =
            self.semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Concurrency {
                    details: "coordinator is stopping, no new sessions accepted".to_string(),
                })?;

        let extractor = self.extractor.clone();
        let input = input.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extractor.extract(&input, &dest))
            .await
            .map_err(|e| PipelineError::Unexpected(format!("extraction task failed: {e}")))?
    }

    /// Dispatch one batch. Containers are extracted before workers start;
    /// an input that fails extraction is recorded as an error without
    /// sinking the rest of the batch.
    pub async fn process_batch(&self, inputs: Vec<PathBuf>) -> Result<SessionHandle> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::Concurrency {
                details: "coordinator is stopping, no new sessions accepted".to_string(),
            });
        }

        if self.config.auto_organize {
            self.organizer.ensure_layout(&self.config.output_root)?;
        }

        let mut session = ProcessingSession::new();
        let session_id = session.id.clone();
        info!(session = %session_id, inputs = inputs.len(), "session dispatched");

        // Resolve containers up front so workers only ever see documents.
        let mut documents: Vec<PathBuf> = Vec::new();
        let mut containers: Vec<(String, Vec<PathBuf>)> = Vec::new();

        for input in inputs {
            if ArchiveExtractor::is_container(&input) {
                let container_name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| input.display().to_string());

                let temp_dir = session_temp_dir(&session_id);
                session.add_file_in_state(&input, FileState::Extracting);

                match self.extract_container(&input, &temp_dir).await {
                    Ok(members) => {
                        session.temp_directory = Some(temp_dir);
                        session.mark_completed(&input);
                        for member in &members {
                            session.add_file(member);
                        }
                        containers.push((container_name, members.clone()));
                        documents.extend(members);
                    }
                    Err(e) => {
                        warn!(session = %session_id, container = %container_name, %e, "extraction failed");
                        session.mark_error(&input, e.to_string());
                    }
                }
            } else {
                session.add_file(&input);
                documents.push(input);
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        {
            let mut store = self.sessions.lock().await;
            store.insert(session_id.clone(), session);
        }

        let mut handles = Vec::with_capacity(documents.len());
        for (index, path) in documents.into_iter().enumerate() {
            let worker = format!("worker-{index}");
            let permit_source = Arc::clone(&self.semaphore);
            let validator = Arc::clone(&self.validator);
            let submitter = Arc::clone(&self.submitter);
            let organizer = self.organizer.clone();
            let sessions = Arc::clone(&self.sessions);
            let tx = tx.clone();
            let session_id = session_id.clone();
            let auto_organize = self.config.auto_organize;
            let output_root = self.config.output_root.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match permit_source.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed only during shutdown.
                        return None;
                    }
                };

                {
                    let mut store = sessions.lock().await;
                    if let Some(session) = store.get_mut(&session_id) {
                        session.mark_processing(&path, &worker);
                    }
                }
                let _ = tx
                    .send(SessionEvent::FileStarted {
                        session_id: session_id.clone(),
                        path: path.clone(),
                    })
                    .await;

                let (outcome, route, placed_at) = process_document(
                    &validator,
                    submitter.as_ref(),
                    &organizer,
                    &path,
                    auto_organize,
                    &output_root,
                )
                .await;

                {
                    let mut store = sessions.lock().await;
                    if let Some(session) = store.get_mut(&session_id) {
                        if outcome.status == ValidationStatus::Error {
                            let message = outcome
                                .issues
                                .last()
                                .map(|i| i.message.clone())
                                .unwrap_or_else(|| "processing failed".to_string());
                            session.mark_error(&path, message);
                        } else {
                            session.mark_completed(&path);
                        }
                    }
                }

                let _ = tx
                    .send(SessionEvent::FileFinished {
                        session_id,
                        path: path.clone(),
                        outcome: Box::new(outcome),
                        route,
                        placed_at,
                    })
                    .await;

                Some((path, route))
            }));
        }
        drop(tx);

        // Supervisor: waits for the batch, emits the terminal event, then
        // runs the deferred cleanup.
        let sessions = Arc::clone(&self.sessions);
        let organizer = self.organizer.clone();
        let cleanup_grace = self.config.cleanup_grace;
        let auto_organize = self.config.auto_organize;
        let output_root = self.config.output_root.clone();
        let supervisor_id = session_id.clone();
        let (done_tx, done_rx) = mpsc::channel::<SessionEvent>(1);

        tokio::spawn(async move {
            let mut member_routes: HashMap<PathBuf, Route> = HashMap::new();
            for result in futures::future::join_all(handles).await {
                match result {
                    Ok(Some((path, route))) => {
                        member_routes.insert(path, route);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(session = %supervisor_id, %e, "worker task panicked");
                    }
                }
            }

            let summary = {
                let store = sessions.lock().await;
                store
                    .get(&supervisor_id)
                    .map(|s| s.summary())
                    .unwrap_or_default()
            };
            info!(
                session = %supervisor_id,
                total = summary.total,
                completed = summary.completed,
                errors = summary.errors,
                "session completed"
            );
            if auto_organize {
                write_container_summaries(&organizer, &containers, &member_routes, &output_root);
            }
            let _ = done_tx
                .send(SessionEvent::SessionCompleted {
                    session_id: supervisor_id.clone(),
                    summary,
                })
                .await;

            deferred_cleanup(sessions, supervisor_id, cleanup_grace).await;
        });

        // Merge worker events with the supervisor's terminal event.
        let merged = merge_event_streams(rx, done_rx);

        Ok(SessionHandle {
            session_id,
            events: merged,
        })
    }

    /// Snapshot of one session's progress.
    pub async fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        let store = self.sessions.lock().await;
        store.get(session_id).map(|s| s.summary())
    }

    pub async fn active_session_count(&self) -> usize {
        let store = self.sessions.lock().await;
        store.values().filter(|s| !s.is_complete()).count()
    }

    /// Refuse new dispatch and wait for in-flight work, bounded by the
    /// configured stop timeout. Returns true when everything drained.
    pub async fn stop(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        info!("coordinator stopping, draining in-flight work");

        let workers = self.config.max_workers.max(1) as u32;
        match timeout(
            self.config.stop_timeout,
            self.semaphore.acquire_many(workers),
        )
        .await
        {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    timeout_seconds = self.config.stop_timeout.as_secs(),
                    "stop timed out with work still in flight"
                );
                false
            }
        }
    }
}

/// Full pipeline for one document. Never returns an error: failures are
/// folded into the outcome so the caller can classify and route them.
async fn process_document(
    validator: &DocumentValidator,
    submitter: &dyn RemoteSubmitter,
    organizer: &FileOrganizer,
    path: &Path,
    auto_organize: bool,
    output_root: &Path,
) -> (ValidationOutcome, Route, Option<PathBuf>) {
    let mut doc = Document::from_path(path);

    // Non-XML inputs are left in place for manual handling.
    if doc.exists() && !doc.is_xml() {
        debug!(file = %path.display(), "skipping non-XML file");
        return (
            ValidationOutcome::skipped(path.to_path_buf()),
            Route::Reprocess,
            None,
        );
    }

    let mut outcome = validator.validate(&mut doc);

    // Submission only for structurally sound documents; everything else
    // already has its routing decided locally.
    if outcome.status == ValidationStatus::Success {
        match validator::read_document_content(path) {
            Ok((content, _)) => {
                let content = validator::normalize_content(&content);
                let response = submitter.submit(&doc.file_name(), &content).await;
                outcome.attach_remote(response);
            }
            Err(e) => {
                outcome.push_issue(IssueKind::Remote, "could not read document for submission", Some(e.to_string()), None);
            }
        }
    }

    let route = classifier::classify(&outcome);

    let placed_at = if auto_organize {
        match organizer.place(path, &outcome, route, output_root) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(file = %path.display(), %e, "placement failed");
                outcome.status = ValidationStatus::Error;
                outcome.push_issue(
                    IssueKind::Structure,
                    "file placement failed",
                    Some(e.to_string()),
                    None,
                );
                None
            }
        }
    } else {
        None
    };

    debug!(file = %path.display(), route = %route, "document finished");
    (outcome, route, placed_at)
}

/// Container summaries need the routes of each member, so they are
/// written after the batch settles, from the per-document results.
fn write_container_summaries(
    organizer: &FileOrganizer,
    containers: &[(String, Vec<PathBuf>)],
    member_routes: &HashMap<PathBuf, Route>,
    output_root: &Path,
) {
    for (container_name, members) in containers {
        let entries: Vec<(String, Route)> = members
            .iter()
            .map(|member| {
                let name = member
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| member.display().to_string());
                // A member with no result never ran (shutdown); it stays
                // a retry candidate.
                let route = member_routes
                    .get(member)
                    .copied()
                    .unwrap_or(Route::Reprocess);
                (name, route)
            })
            .collect();
        organizer.write_container_summary(container_name, &entries, output_root);
    }
}

/// Grace delay, then cleanup guarded by the active set; blocked attempts
/// are retried before giving up. The session record is dropped once its
/// ephemeral directory is gone.
async fn deferred_cleanup(
    sessions: Arc<Mutex<HashMap<String, ProcessingSession>>>,
    session_id: String,
    grace: Duration,
) {
    sleep(grace).await;

    for attempt in 0..=CLEANUP_RETRIES {
        let cleaned = {
            let mut store = sessions.lock().await;
            match store.get_mut(&session_id) {
                Some(session) => session.try_cleanup_temp(),
                None => true,
            }
        };

        if cleaned {
            let mut store = sessions.lock().await;
            if store
                .get(&session_id)
                .map(|s| s.is_complete())
                .unwrap_or(false)
            {
                store.remove(&session_id);
            }
            debug!(session = %session_id, "ephemeral directory cleaned");
            return;
        }

        debug!(session = %session_id, attempt, "cleanup blocked by active files, retrying");
        sleep(grace).await;
    }

    warn!(session = %session_id, "giving up on ephemeral cleanup after retries");
}

/// Forward two event streams into one receiver, worker events first come
/// first served, terminal event last.
fn merge_event_streams(
    mut workers: mpsc::Receiver<SessionEvent>,
    mut terminal: mpsc::Receiver<SessionEvent>,
) -> mpsc::Receiver<SessionEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = workers.recv().await {
            if tx.send(event).await.is_err() {
                return;
            }
        }
        // Worker stream closed; the terminal event follows.
        while let Some(event) = terminal.recv().await {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
    rx
}

fn session_temp_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nfe_session_{session_id}"))
}
