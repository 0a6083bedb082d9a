#![warn(missing_docs)]
//! # inkly binary
//!
//! Command-line entry point for the inkly handwriting practice client.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use inkly_app::{
    AppConfig, AppError, PracticeRoundController, Session, app_version, init_logging,
    redact_sensitive,
};
use inkly_core::{GenerationState, SlotKind};
use inkly_poller::{PollEvent, PollerState, cancellation};
use inkly_session::MetricsSession;

#[derive(Parser)]
#[command(name = "inkly")]
#[command(about = "Handwriting generation and practice client", version = app_version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a sample, wait for generation, and score the result
    Run {
        /// Handwriting sample (PNG)
        image: PathBuf,

        /// Filename reported to the server (default: the image file name)
        #[arg(long)]
        filename: Option<String>,

        /// Directory to write the representative and character images into
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,

        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the server-side generation state of a job
    Status {
        /// Job id
        job_id: String,
    },

    /// Score a practice attempt against an existing job
    Practice {
        /// Job id
        job_id: String,

        /// Practice attempt (PNG)
        image: PathBuf,

        /// Also save the practice canvas underlay to this path
        #[arg(long)]
        background: Option<PathBuf>,

        /// Print the scores as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging() {
        eprintln!("warning: {error}");
    }

    let result = match AppConfig::from_env() {
        Ok(config) => match cli.command {
            Commands::Run {
                image,
                filename,
                out_dir,
                json,
            } => run_pipeline(&config, &image, filename, out_dir, json).await,
            Commands::Status { job_id } => run_status(&config, &job_id).await,
            Commands::Practice {
                job_id,
                image,
                background,
                json,
            } => run_practice(&config, &job_id, &image, background, json).await,
        },
        Err(error) => Err(error.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", redact_sensitive(&error.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run_pipeline(
    config: &AppConfig,
    image: &Path,
    filename: Option<String>,
    out_dir: Option<PathBuf>,
    json: bool,
) -> Result<(), AppError> {
    let png = read_image(image)?;
    let filename = filename
        .or_else(|| image.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let mut session = Session::from_config(config)?;
    let derived = session.submit_sample(png, &filename).await?;
    println!("uploaded {filename} as job {} ({:?} id)", derived.id, derived.origin);

    let (cancel_handle, mut cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_handle.cancel();
        }
    });

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                PollEvent::State(PollerState::Polling { attempt }) => {
                    println!("waiting for generation (poll {attempt})");
                }
                PollEvent::State(state) if state.is_terminal() => {}
                PollEvent::State(state) => println!("{state:?}"),
                PollEvent::Notice(notice) => println!("notice: {notice}"),
            }
        }
    });
    let generated = session.generate(&mut cancel, Some(events_tx)).await;
    // The poller dropped its sender, so the printer drains and exits.
    let _ = printer.await;
    let representative = generated?;
    println!("generation done: {representative}");

    session.analyze_base().await?;
    let results = session.fetch_results().await?;
    if let Some(out_dir) = out_dir {
        write_results(&out_dir, &results)?;
        println!("images written to {}", out_dir.display());
    }

    print_metrics(session.metrics(), json)
}

async fn run_status(config: &AppConfig, job_id: &str) -> Result<(), AppError> {
    let session = Session::from_config(config)?;
    let client = session.client().clone();
    let request_job_id = job_id.to_string();
    let status = tokio::task::spawn_blocking(move || client.poll_status(&request_job_id))
        .await
        .map_err(|error| AppError::Worker(error.to_string()))??;

    match status.state {
        GenerationState::Done => match status.representative {
            Some(path) => println!("{job_id}: done ({path})"),
            None => println!("{job_id}: done, representative not available yet"),
        },
        GenerationState::Error => println!(
            "{job_id}: error ({})",
            status.error.as_deref().unwrap_or("generation failed")
        ),
        GenerationState::Running => println!("{job_id}: running"),
        GenerationState::None => println!("{job_id}: not started"),
        GenerationState::Unrecognized(raw) => println!("{job_id}: unknown state {raw:?}"),
    }
    Ok(())
}

async fn run_practice(
    config: &AppConfig,
    job_id: &str,
    image: &Path,
    background: Option<PathBuf>,
    json: bool,
) -> Result<(), AppError> {
    let png = read_image(image)?;
    let session = Session::from_config(config)?;
    let mut controller = PracticeRoundController::new();
    let mut metrics = MetricsSession::for_job(job_id);

    if let Some(path) = background {
        let underlay = controller
            .load_background(session.client(), Some(job_id))
            .await?;
        write_file(&path, &underlay)?;
        println!("practice background written to {}", path.display());
    }

    controller
        .run_round(session.client(), png, job_id, &mut metrics)
        .await?;
    print_metrics(&metrics, json)
}

fn print_metrics(metrics: &MetricsSession, json: bool) -> Result<(), AppError> {
    if json {
        let summary = serde_json::json!({
            "jobId": metrics.job_id(),
            "source": metrics.active_source(),
            "averageSimilarity": metrics.average_similarity(),
            "comparison": metrics.comparison(),
        });
        let rendered = serde_json::to_string_pretty(&summary)?;
        println!("{rendered}");
        return Ok(());
    }

    println!("similarity: {:.1}%", metrics.average_similarity());
    let comparison = metrics.comparison();
    for (index, label) in comparison.labels.iter().enumerate() {
        match &comparison.rewrite {
            Some(rewrite) => println!(
                "  {label}: {:.2} -> {:.2}",
                comparison.base[index], rewrite[index]
            ),
            None => println!("  {label}: {:.2}", comparison.base[index]),
        }
    }
    Ok(())
}

fn write_results(out_dir: &Path, results: &inkly_app::ResultSet) -> Result<(), AppError> {
    write_file(&out_dir.join("representative.png"), &results.representative)?;
    for (kind, dir) in [
        (SlotKind::Handwriting, "handwriting"),
        (SlotKind::Generation, "generation"),
    ] {
        for index in 0..inkly_core::CHARACTER_SLOT_COUNT {
            if let Some(bytes) = results.slot(kind, index) {
                write_file(&out_dir.join(dir).join(format!("{index}.png")), bytes)?;
            }
        }
    }
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>, AppError> {
    fs::read(path).map_err(|error| AppError::io(path, error))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| AppError::io(parent, error))?;
    }
    fs::write(path, bytes).map_err(|error| AppError::io(path, error))
}
