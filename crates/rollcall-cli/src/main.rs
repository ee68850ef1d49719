use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    load_known_faces, AttendanceLedger, AttendanceRecord, MarkOutcome, OnnxFaceEncoder,
    Recognition, RecognitionSession, StopReason, StopSignal,
};
use rollcall_hw::Camera;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance log")]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG, then ./rollcall.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of reference photos
    #[arg(long, global = true)]
    known_faces: Option<PathBuf>,

    /// Attendance CSV file
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// V4L2 camera device
    #[arg(long, global = true)]
    camera: Option<String>,

    /// Maximum embedding distance accepted as a match
    #[arg(long, global = true)]
    tolerance: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces from the camera and mark attendance (Ctrl-C or `q` to stop)
    Mark,
    /// Show all attendance records
    View {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all attendance records
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Load the reference photos and list recognized identities
    Known,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.known_faces {
        config.known_faces_dir = dir;
    }
    if let Some(path) = cli.ledger {
        config.attendance_path = path;
    }
    if let Some(device) = cli.camera {
        config.camera_device = device;
    }
    if let Some(tolerance) = cli.tolerance {
        config.match_tolerance = tolerance;
    }
    config.validate()?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Mark => mark(config).await,
        Commands::View { json } => view(&config, json),
        Commands::Reset { yes } => reset(&config, yes),
        Commands::Known => known(&config),
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

async fn mark(config: Config) -> Result<()> {
    let mut encoder = OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;

    let store = load_known_faces(&config.known_faces_dir, &mut encoder)?;
    if store.is_empty() {
        tracing::warn!(
            dir = %config.known_faces_dir.display(),
            "no known faces loaded; nobody can be recognized"
        );
    }

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("unable to access the camera {}", config.camera_device))?;
    camera.discard_frames(config.warmup_frames)?;

    let stop = StopSignal::new();
    watch_ctrl_c(stop.clone());
    watch_stdin_quit(stop.clone())?;

    println!("Recognizing faces. Press Ctrl-C, or type q and Enter, to stop.");

    let ledger = AttendanceLedger::new(config.attendance_path.clone());
    let tolerance = config.match_tolerance;
    let summary = tokio::task::spawn_blocking(move || {
        let mut session = RecognitionSession::new(store, ledger, encoder, tolerance);
        let mut announced = HashSet::new();
        session.run(camera, &stop, |r| announce(r, &mut announced))
    })
    .await
    .context("recognition thread panicked")??;

    if let StopReason::SourceFailed(reason) = &summary.ended_by {
        eprintln!("Camera stopped delivering frames: {reason}");
    }
    println!(
        "Session ended after {} frames; {} newly marked.",
        summary.frames,
        summary.newly_marked.len()
    );
    Ok(())
}

/// Print a recognition once per name per session.
fn announce(recognition: &Recognition, announced: &mut HashSet<String>) {
    if !announced.insert(recognition.name.clone()) {
        return;
    }
    match &recognition.outcome {
        MarkOutcome::Marked(record) => {
            println!("Attendance marked for {} at {}.", record.name, record.time);
        }
        MarkOutcome::AlreadyMarkedToday => {
            println!("Attendance for {} is already marked today.", recognition.name);
        }
    }
}

fn watch_ctrl_c(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping session");
            stop.stop();
        }
    });
}

/// Raise `stop` when a line reading `q` arrives on stdin.
///
/// Runs on a detached OS thread so a pending read never delays process exit.
fn watch_stdin_quit(stop: StopSignal) -> Result<()> {
    std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    stop.stop();
                    break;
                }
            }
        })
        .context("spawning stdin watcher")?;
    Ok(())
}

fn view(config: &Config, json: bool) -> Result<()> {
    let ledger = AttendanceLedger::new(config.attendance_path.clone());
    let records = ledger.read_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No attendance records found.");
    } else {
        print!("{}", render_table(&records));
    }
    Ok(())
}

fn render_table(records: &[AttendanceRecord]) -> String {
    let name_width = records
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let mut out = format!("{:<name_width$}  {:<10}  {:<8}\n", "Name", "Date", "Time");
    for r in records {
        out.push_str(&format!(
            "{:<name_width$}  {:<10}  {:<8}\n",
            r.name,
            r.date.to_string(),
            r.time.to_string()
        ));
    }
    out
}

fn reset(config: &Config, yes: bool) -> Result<()> {
    let ledger = AttendanceLedger::new(config.attendance_path.clone());

    if !yes {
        print!(
            "Delete all attendance records in {}? [y/N] ",
            ledger.path().display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    ledger.reset()?;
    println!("Attendance has been reset.");
    Ok(())
}

fn known(config: &Config) -> Result<()> {
    let mut encoder = OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    let store = load_known_faces(&config.known_faces_dir, &mut encoder)?;

    if store.is_empty() {
        println!("No known faces in {}.", config.known_faces_dir.display());
    }
    for identity in &store {
        println!("{}\t{}", identity.name, identity.source.display());
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
    }
    for d in devices {
        println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}
