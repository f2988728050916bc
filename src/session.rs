//! Per-session bookkeeping for the coordinator.
//!
//! A session tracks one batch of documents from dispatch to terminal
//! state. The active-file set is the guard used by deferred cleanup: the
//! session's ephemeral directory is only removed once nothing in it is
//! still being worked on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of a single file within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Extracting,
    Processing,
    Processed,
    Error,
}

impl FileState {
    /// Active files pin the session's ephemeral directory.
    pub fn is_active(self) -> bool {
        matches!(self, FileState::Extracting | FileState::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Processed | FileState::Error)
    }
}

/// Processing record for one file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub state: FileState,
    /// Identifier of the worker task that picked the file up.
    pub worker: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl FileRecord {
    fn new(path: PathBuf, state: FileState) -> Self {
        Self {
            path,
            state,
            worker: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    fn mark_processing(&mut self, worker: &str) {
        self.state = FileState::Processing;
        self.worker = Some(worker.to_string());
        self.started_at = Some(Utc::now());
    }

    fn mark_completed(&mut self) {
        self.state = FileState::Processed;
        self.completed_at = Some(Utc::now());
    }

    fn mark_error(&mut self, message: impl Into<String>) {
        self.state = FileState::Error;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Counts by state, for progress reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub errors: usize,
}

/// One batch of documents being processed together.
#[derive(Debug)]
pub struct ProcessingSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Ephemeral extraction directory, removed after the grace period.
    pub temp_directory: Option<PathBuf>,
    files: HashMap<PathBuf, FileRecord>,
}

impl ProcessingSession {
    pub fn new() -> Self {
        Self {
            // Short ids keep log lines readable.
            id: Uuid::new_v4().to_string()[..8].to_string(),
            created_at: Utc::now(),
            temp_directory: None,
            files: HashMap::new(),
        }
    }

    pub fn add_file(&mut self, path: &Path) {
        self.add_file_in_state(path, FileState::Pending);
    }

    pub fn add_file_in_state(&mut self, path: &Path, state: FileState) {
        self.files
            .insert(path.to_path_buf(), FileRecord::new(path.to_path_buf(), state));
    }

    pub fn file_state(&self, path: &Path) -> Option<FileState> {
        self.files.get(path).map(|r| r.state)
    }

    pub fn record(&self, path: &Path) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn mark_processing(&mut self, path: &Path, worker: &str) {
        if let Some(record) = self.files.get_mut(path) {
            record.mark_processing(worker);
        }
    }

    pub fn mark_completed(&mut self, path: &Path) {
        if let Some(record) = self.files.get_mut(path) {
            record.mark_completed();
        }
    }

    pub fn mark_error(&mut self, path: &Path, message: impl Into<String>) {
        if let Some(record) = self.files.get_mut(path) {
            record.mark_error(message);
        }
    }

    /// Paths currently pinning the ephemeral directory.
    pub fn active_files(&self) -> Vec<PathBuf> {
        self.files
            .values()
            .filter(|r| r.state.is_active())
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.files.values().all(|r| r.state.is_terminal())
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary {
            total: self.files.len(),
            ..Default::default()
        };
        for record in self.files.values() {
            match record.state {
                FileState::Pending => summary.pending += 1,
                FileState::Extracting | FileState::Processing => summary.active += 1,
                FileState::Processed => summary.completed += 1,
                FileState::Error => summary.errors += 1,
            }
        }
        summary
    }

    /// Remove the ephemeral directory if nothing active remains. Returns
    /// false when cleanup must be retried later.
    pub fn try_cleanup_temp(&mut self) -> bool {
        let Some(dir) = self.temp_directory.clone() else {
            return true;
        };
        if !self.active_files().is_empty() {
            return false;
        }
        if dir.exists() {
            // Cleanup failure is not fatal; the directory will be retried
            // or picked up by the OS temp reaper.
            if std::fs::remove_dir_all(&dir).is_err() {
                return false;
            }
        }
        self.temp_directory = None;
        true
    }
}

impl Default for ProcessingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_lifecycle() {
        let mut session = ProcessingSession::new();
        let path = Path::new("/tmp/nota.xml");

        session.add_file(path);
        assert_eq!(session.file_state(path), Some(FileState::Pending));
        assert!(!session.is_complete());

        session.mark_processing(path, "worker-3");
        assert_eq!(session.file_state(path), Some(FileState::Processing));
        assert_eq!(session.active_files(), vec![path.to_path_buf()]);

        session.mark_completed(path);
        assert_eq!(session.file_state(path), Some(FileState::Processed));
        assert!(session.is_complete());
        assert!(session.active_files().is_empty());

        let record = session.record(path).unwrap();
        assert_eq!(record.worker.as_deref(), Some("worker-3"));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert!(session.created_at <= record.started_at.unwrap());
    }

    #[test]
    fn test_error_is_terminal_and_keeps_message() {
        let mut session = ProcessingSession::new();
        let path = Path::new("/tmp/ruim.xml");
        session.add_file(path);
        session.mark_error(path, "extraction failed");

        assert_eq!(session.file_state(path), Some(FileState::Error));
        assert!(session.is_complete());
        assert_eq!(
            session.record(path).unwrap().error_message.as_deref(),
            Some("extraction failed")
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut session = ProcessingSession::new();
        session.add_file(Path::new("a.xml"));
        session.add_file(Path::new("b.xml"));
        session.add_file(Path::new("c.xml"));
        session.mark_processing(Path::new("b.xml"), "worker-1");
        session.mark_error(Path::new("c.xml"), "boom");

        let summary = session.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn test_cleanup_blocked_while_files_active() {
        let temp = TempDir::new().unwrap();
        let keep = temp.path().join("extract");
        std::fs::create_dir(&keep).unwrap();

        let mut session = ProcessingSession::new();
        session.temp_directory = Some(keep.clone());
        let path = keep.join("nota.xml");
        session.add_file_in_state(&path, FileState::Processing);

        assert!(!session.try_cleanup_temp());
        assert!(keep.exists());

        session.mark_completed(&path);
        assert!(session.try_cleanup_temp());
        assert!(!keep.exists());
        assert!(session.temp_directory.is_none());
    }

    #[test]
    fn test_cleanup_without_temp_directory_is_trivially_done() {
        let mut session = ProcessingSession::new();
        assert!(session.try_cleanup_temp());
    }

    #[test]
    fn test_session_ids_are_short_and_distinct() {
        let a = ProcessingSession::new();
        let b = ProcessingSession::new();
        assert_eq!(a.id.len(), 8);
        assert_ne!(a.id, b.id);
    }
}
