//! Batch report formatting.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::classifier::Route;
use crate::cli::OutputFormat;
use crate::outcome::ValidationOutcome;

/// Per-file line of the final report.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub route: String,
    pub key: Option<String>,
    pub issues: Vec<String>,
    pub remote_message: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
    pub elapsed_ms: u64,
    pub placed_at: Option<PathBuf>,
}

impl FileReport {
    pub fn from_outcome(
        outcome: &ValidationOutcome,
        route: Route,
        placed_at: Option<PathBuf>,
    ) -> Self {
        Self {
            path: outcome.document_path.clone(),
            route: route.dir_name().to_string(),
            key: outcome.key.as_ref().map(|k| k.to_string()),
            issues: outcome.issues.iter().map(|i| i.render()).collect(),
            remote_message: outcome.remote.as_ref().map(|r| r.message.clone()),
            elapsed: outcome.elapsed,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            placed_at,
        }
    }

    fn succeeded(&self) -> bool {
        self.route == "processed"
    }
}

/// Aggregated result of one batch run.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchReport {
    pub session_id: String,
    pub files: Vec<FileReport>,
    #[serde(skip)]
    pub total_duration: Duration,
}

impl BatchReport {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.files.iter().filter(|f| f.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.processed()
    }

    pub fn success_rate(&self) -> f64 {
        if self.files.is_empty() {
            100.0
        } else {
            self.processed() as f64 / self.files.len() as f64 * 100.0
        }
    }
}

/// Formats a batch report for the terminal.
pub struct Report {
    format: OutputFormat,
    verbose: bool,
    quiet: bool,
    show_colors: bool,
}

impl Report {
    pub fn new(format: OutputFormat, verbose: bool, quiet: bool) -> Self {
        Self {
            format,
            verbose,
            quiet,
            show_colors: std::io::stdout().is_terminal(),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{color}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn format_report(&self, report: &BatchReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
            }
            OutputFormat::Summary => self.format_one_line(report),
            OutputFormat::Human => self.format_human(report),
        }
    }

    fn format_one_line(&self, report: &BatchReport) -> String {
        format!(
            "session {}: {} processed, {} failed, {:.1}% success, {}\n",
            report.session_id,
            report.processed(),
            report.failed(),
            report.success_rate(),
            format_duration(report.total_duration)
        )
    }

    fn format_human(&self, report: &BatchReport) -> String {
        let mut output = String::new();

        if self.quiet {
            if report.failed() > 0 {
                output.push_str(&format!("Failed: {}\n", report.failed()));
            }
            return output;
        }

        for file in &report.files {
            output.push_str(&self.format_file_line(file));
            output.push('\n');
        }

        output.push_str("\nProcessing Summary:\n");
        output.push_str(&format!("  Session: {}\n", report.session_id));
        output.push_str(&format!("  Total files: {}\n", report.files.len()));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Processed:", "32"),
            report.processed()
        ));
        if report.failed() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                report.failed()
            ));
        }
        output.push_str(&format!("  Success rate: {:.1}%\n", report.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(report.total_duration)
        ));

        output
    }

    fn format_file_line(&self, file: &FileReport) -> String {
        let duration = format_duration(file.elapsed);
        let mut line = if file.succeeded() {
            format!(
                "{}  {} ({})",
                self.colorize("✓ PROCESSED", "32"),
                file.path.display(),
                duration
            )
        } else {
            format!(
                "{}  {} ({}) -> {}",
                self.colorize("✗ FAILED", "31"),
                file.path.display(),
                duration,
                file.route
            )
        };

        if self.verbose {
            if let Some(key) = &file.key {
                line.push_str(&format!("\n    key: {key}"));
            }
            for issue in &file.issues {
                line.push_str(&format!("\n    {issue}"));
            }
            if let Some(message) = &file.remote_message {
                line.push_str(&format!("\n    api: {message}"));
            }
        }
        line
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{total_secs:.2}s")
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{mins}m{secs:.1}s")
    }
}
