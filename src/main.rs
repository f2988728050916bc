use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nfe_pipeline::cli::Cli;
use nfe_pipeline::config::ConfigManager;
use nfe_pipeline::coordinator::{SessionCoordinator, SessionEvent};
use nfe_pipeline::extractor::ArchiveExtractor;
use nfe_pipeline::remote::{RemoteSubmitter, ValidaNfeClient};
use nfe_pipeline::report::{BatchReport, FileReport, Report};
use nfe_pipeline::schema::DirSchemaRepository;
use nfe_pipeline::validator::{DocumentValidator, ValidatorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    if let Err(message) = cli.validate() {
        error!("{message}");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(failed) if failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nfe_pipeline={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs the batch and returns the number of failed files.
async fn run(cli: Cli) -> anyhow::Result<usize> {
    let config = ConfigManager::load_config(&cli).await?;

    let client = ValidaNfeClient::new(config.remote_config())?;

    if cli.check_connection {
        if client.test_connection().await {
            info!(url = %config.api.base_url, "API is reachable");
            return Ok(0);
        }
        anyhow::bail!("API at {} is not reachable", config.api.base_url);
    }

    if config.api.token.trim().is_empty() {
        warn!("no API token configured, submissions will fail");
    }

    let schemas = match DirSchemaRepository::load(&config.schemas.directory) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            warn!(
                dir = %config.schemas.directory.display(),
                %e,
                "schema directory unavailable, schema validation disabled"
            );
            Arc::new(DirSchemaRepository::empty())
        }
    };

    let validator = Arc::new(DocumentValidator::new(schemas, ValidatorConfig::default()));
    let submitter: Arc<dyn RemoteSubmitter> = Arc::new(client);
    let coordinator = SessionCoordinator::new(validator, submitter, config.coordinator_config())
        .with_extractor(ArchiveExtractor::new().with_max_depth(config.extraction.max_depth));

    let started = Instant::now();
    let mut handle = coordinator.process_batch(cli.inputs.clone()).await?;
    let mut report = BatchReport::new(handle.session_id.clone());

    while let Some(event) = handle.events.recv().await {
        match event {
            SessionEvent::FileStarted { path, .. } => {
                info!(file = %path.display(), "processing");
            }
            SessionEvent::FileFinished {
                path,
                outcome,
                route,
                placed_at,
                ..
            } => {
                info!(file = %path.display(), route = %route, "finished");
                report
                    .files
                    .push(FileReport::from_outcome(&outcome, route, placed_at));
            }
            SessionEvent::SessionCompleted { summary, .. } => {
                info!(
                    total = summary.total,
                    completed = summary.completed,
                    errors = summary.errors,
                    "batch complete"
                );
            }
        }
    }
    report.total_duration = started.elapsed();

    coordinator.stop().await;

    let formatter = Report::new(config.output.format, cli.verbose, cli.quiet);
    print!("{}", formatter.format_report(&report));

    Ok(report.failed())
}
