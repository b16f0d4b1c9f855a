use anyhow::{Context, Result};
use chunk_upload::cli::Args;
use chunk_upload::entry::{DropItem, Entry};
use chunk_upload::progress::ProgressObserver;
use chunk_upload::state::{SessionReport, StateManager};
use chunk_upload::{FileCandidate, HttpTransport, UploadOrchestrator};
use clap::Parser;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.upload_config()?;
    let transport =
        HttpTransport::new(config.request_timeout()).context("Failed to build HTTP client")?;
    let mut orchestrator = UploadOrchestrator::new(
        config,
        Arc::new(transport),
        Box::new(ProgressObserver::new()),
    )
    .context("Invalid upload configuration")?;

    let state = match &args.report {
        Some(path) => StateManager::new(path),
        None => StateManager::in_dir(Path::new(".")),
    };
    match state.load_report() {
        Ok(Some(previous)) => info!(
            report = %state.path().display(),
            files = previous.summary.total_files,
            success = previous.summary.success_count,
            failed = previous.summary.error_count,
            "overwriting previous session report"
        ),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "ignoring unreadable session report"),
    }

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
        args.paths.iter().cloned().partition(|p| p.is_dir());

    // Plain files go through the picker path, folders are expanded like a drop.
    let mut candidates = Vec::new();
    for (path, result) in files
        .iter()
        .zip(join_all(files.iter().map(|p| FileCandidate::from_path(p))).await)
    {
        match result {
            Ok(candidate) => candidates.push(candidate),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable file"),
        }
    }
    if !candidates.is_empty() {
        orchestrator.add_files(candidates);
    }

    let mut dropped = Vec::new();
    for dir in &dirs {
        let entry = Entry::from_path(dir)
            .await
            .with_context(|| format!("Failed to open folder {}", dir.display()))?;
        dropped.push(DropItem::Entry(entry));
    }
    if !dropped.is_empty() {
        orchestrator.add_dropped(dropped).await;
    }

    println!(
        "Queued {} files from {} paths",
        orchestrator.files().len(),
        args.paths.len()
    );

    orchestrator.start_all().await;
    orchestrator.run_until_idle().await;

    let summary = orchestrator.summary();
    state.save_report(&SessionReport::new(orchestrator.files(), summary.clone()))?;

    println!(
        "\nDone: {} success, {} failed",
        summary.success_count, summary.error_count
    );

    Ok(())
}
