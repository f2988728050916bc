//! Terminal file placement under the output root.
//!
//! Layout is `processed/`, `errors/`, `reprocess/` and `logs/`. Placement
//! moves the file and then writes an audit record under `logs/`; a failed
//! audit write is logged and swallowed so it can never undo a successful
//! placement.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::classifier::Route;
use crate::error::Result;
use crate::outcome::ValidationOutcome;

const LOGS_DIR: &str = "logs";

/// Moves finished documents to their terminal directory and keeps the
/// audit trail.
#[derive(Debug, Clone, Default)]
pub struct FileOrganizer;

impl FileOrganizer {
    pub fn new() -> Self {
        Self
    }

    /// Create the four output directories. Idempotent.
    pub fn ensure_layout(&self, output_root: &Path) -> Result<()> {
        for dir in ["processed", "errors", "reprocess", LOGS_DIR] {
            std::fs::create_dir_all(output_root.join(dir))?;
        }
        Ok(())
    }

    /// Move `path` into the directory for `route` and write its audit
    /// record. Returns the final resting path.
    pub fn place(
        &self,
        path: &Path,
        outcome: &ValidationOutcome,
        route: Route,
        output_root: &Path,
    ) -> Result<PathBuf> {
        let target_dir = output_root.join(route.dir_name());
        std::fs::create_dir_all(&target_dir)?;

        let target = unique_target_path(&target_dir, path);
        move_file(path, &target)?;

        info!(
            from = %path.display(),
            to = %target.display(),
            route = %route,
            "document placed"
        );

        // Audit failures must not undo the placement.
        if let Err(e) = self.write_audit_record(&target, outcome, route, output_root) {
            warn!(file = %target.display(), %e, "failed to write audit record");
        }

        Ok(target)
    }

    /// One text record per placed document, named `{stem}_processing.log`.
    fn write_audit_record(
        &self,
        placed: &Path,
        outcome: &ValidationOutcome,
        route: Route,
        output_root: &Path,
    ) -> Result<()> {
        let logs_dir = output_root.join(LOGS_DIR);
        std::fs::create_dir_all(&logs_dir)?;

        let stem = placed
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let log_path = logs_dir.join(format!("{stem}_processing.log"));

        let mut lines = vec![
            format!(
                "NFe processing - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
            format!("File: {}", placed.file_name().unwrap_or_default().to_string_lossy()),
            format!("Original path: {}", outcome.document_path.display()),
            format!("Status: {:?}", outcome.status),
            format!("Route: {route}"),
            format!(
                "NFe key: {}",
                outcome
                    .key
                    .as_ref()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "not found".to_string())
            ),
            format!("Schema valid: {}", yes_no(outcome.schema_valid)),
            format!("Signature present: {}", yes_no(outcome.signature_present)),
            format!("Processing time: {:.1} ms", outcome.elapsed.as_secs_f64() * 1000.0),
            String::new(),
            "=== ISSUES ===".to_string(),
        ];

        if outcome.has_issues() {
            for (i, issue) in outcome.issues.iter().enumerate() {
                lines.push(format!("{}. {}", i + 1, issue.render()));
            }
        } else {
            lines.push("No issues found".to_string());
        }

        if let Some(remote) = &outcome.remote {
            lines.push(String::new());
            lines.push("=== API RESPONSE ===".to_string());
            lines.push(format!("Success: {}", yes_no(remote.success)));
            lines.push(format!("Message: {}", remote.message));
            lines.push(format!(
                "HTTP status: {}",
                remote
                    .status_code
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            ));
            lines.push(format!(
                "Response time: {:.1} ms",
                remote.elapsed.as_secs_f64() * 1000.0
            ));
            if let Some(payload) = &remote.payload {
                lines.push(format!("Payload: {payload}"));
            }
        }

        std::fs::write(&log_path, lines.join("\n"))?;
        Ok(())
    }

    /// One summary record for a container input, listing the route each
    /// member took.
    pub fn write_container_summary(
        &self,
        container_name: &str,
        members: &[(String, Route)],
        output_root: &Path,
    ) {
        let result = (|| -> Result<()> {
            let logs_dir = output_root.join(LOGS_DIR);
            std::fs::create_dir_all(&logs_dir)?;

            let stem = Path::new(container_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| container_name.to_string());
            let log_path = logs_dir.join(format!("{stem}_container.log"));

            let mut lines = vec![
                format!(
                    "Container summary - {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S")
                ),
                format!("Container: {container_name}"),
                format!("Members: {}", members.len()),
                String::new(),
            ];
            for (name, route) in members {
                lines.push(format!("{name} -> {route}"));
            }

            std::fs::write(&log_path, lines.join("\n"))?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!(container = container_name, %e, "failed to write container summary");
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Pick a name that does not collide with an existing file. First choice
/// is the original name; collisions get `{stem}_{timestamp}_{counter:03}`
/// up to 999, then a microsecond timestamp as the last resort.
fn unique_target_path(target_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.xml".to_string());
    let candidate = target_dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    for counter in 1..=999u32 {
        let candidate = target_dir.join(format!("{stem}_{timestamp}_{counter:03}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let precise = Local::now().format("%Y%m%d_%H%M%S_%6f");
    target_dir.join(format!("{stem}_{precise}{extension}"))
}

/// Rename, falling back to copy-and-remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)?;
            Ok(())
        }
    }
}
