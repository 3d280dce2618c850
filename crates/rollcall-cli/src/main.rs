use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rollcall_core::{
    capture_samples, recognize_and_mark, trainer, FaceStore, IdentityKey, JsonModelStore, Ledger,
    OnnxFaceDetector, TrainOutcome,
};
use rollcall_hw::Camera;
use rollcalld::accounts::{AccountStore, Role};
use rollcalld::config::Config;
use std::io::{BufRead, Write};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for an identity and retrain the model
    Enroll {
        /// Account name (no underscores)
        #[arg(short, long)]
        name: String,
        /// Roll number
        #[arg(short, long)]
        roll: String,
        /// Samples to capture
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// Rebuild the model from all stored samples
    Train,
    /// Recognize a face from the camera and mark attendance
    Mark,
    /// List enrolled identities and today's attendance
    List,
    /// Remove an enrolled identity and retrain
    Remove {
        /// Identity key, e.g. "alice_101"
        identity: String,
    },
    /// Run camera diagnostics
    Test,
    /// Create an admin account in the daemon's database
    CreateAdmin {
        #[arg(short, long)]
        username: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { name, roll, count } => {
            enroll(&config, &name, &roll, count.unwrap_or(config.max_samples))
        }
        Commands::Train => train(&config),
        Commands::Mark => mark(&config),
        Commands::List => list(&config),
        Commands::Remove { identity } => remove(&config, &identity),
        Commands::Test => camera_test(&config),
        Commands::CreateAdmin { username } => create_admin(&config, &username),
    }
}

fn enroll(config: &Config, name: &str, roll: &str, count: usize) -> Result<()> {
    let identity = IdentityKey::new(name, roll)?;
    let store = FaceStore::new(&config.faces_dir);
    if store.roll_in_use(roll)? {
        bail!("roll {roll:?} is already enrolled");
    }

    let mut detector = load_detector(config)?;
    let mut camera = Camera::open(&config.camera_device)?;
    println!("Capturing up to {count} samples for {identity}, look at the camera...");
    let report = capture_samples(
        &mut camera,
        &mut detector,
        &store,
        &identity,
        count,
        config.enroll_frame_budget,
    )?;
    drop(camera);
    println!("Saved {} samples ({} frames)", report.saved, report.frames_seen);

    train(config)
}

fn train(config: &Config) -> Result<()> {
    let store = FaceStore::new(&config.faces_dir);
    let models = JsonModelStore::new(&config.model_path);
    match trainer::train(&store, &models, config.knn_k)? {
        TrainOutcome::Trained {
            identities,
            samples,
        } => println!("Model trained: {identities} identities, {samples} samples"),
        TrainOutcome::NoSamples => println!("No samples in the face store; model unchanged"),
    }
    Ok(())
}

fn mark(config: &Config) -> Result<()> {
    let models = JsonModelStore::new(&config.model_path);
    let ledger = Ledger::new(&config.ledger_dir);
    let mut detector = load_detector(config)?;
    let mut camera = Camera::open(&config.camera_device)?;

    println!("Looking for a face...");
    let recognition = recognize_and_mark(
        &mut camera,
        &mut detector,
        &models,
        &ledger,
        config.mark_frame_budget,
    )?;
    match recognition.outcome {
        rollcall_core::MarkOutcome::Marked => {
            println!("Marked {} present", recognition.identity)
        }
        rollcall_core::MarkOutcome::AlreadyMarked => {
            println!("{} is already marked today", recognition.identity)
        }
    }
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = FaceStore::new(&config.faces_dir);
    let identities = store.list_identities()?;
    if identities.is_empty() {
        println!("No identities enrolled");
    } else {
        println!("Enrolled identities:");
        for identity in &identities {
            let samples = store.sample_count(identity)?;
            println!("  {identity}  ({samples} samples)");
        }
    }

    let ledger = Ledger::new(&config.ledger_dir);
    let today = Local::now().date_naive();
    let records = ledger.read_day(today)?;
    println!("Attendance today ({today}): {} marked", records.len());
    for record in records {
        println!("  {}  {}", record.name, record.time);
    }
    Ok(())
}

fn remove(config: &Config, identity: &str) -> Result<()> {
    let identity = IdentityKey::parse(identity)?;
    let store = FaceStore::new(&config.faces_dir);
    store.remove_identity(&identity)?;
    println!("Removed {identity}");
    train(config)
}

fn camera_test(config: &Config) -> Result<()> {
    println!("Available capture devices:");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  none found");
    }
    for dev in &devices {
        println!("  {}  {} ({})", dev.path, dev.name, dev.driver);
    }

    println!("Opening {}...", config.camera_device);
    let camera = Camera::open(&config.camera_device)?;
    let frame = camera.capture_frame()?;
    let mean: f64 =
        frame.data.iter().map(|&p| p as f64).sum::<f64>() / frame.data.len().max(1) as f64;
    println!(
        "Captured {}x{} frame, mean brightness {mean:.1}",
        frame.width, frame.height
    );

    let detector = load_detector(config);
    match detector {
        Ok(mut detector) => {
            use rollcall_core::FaceDetector;
            let faces = detector.detect(&frame)?;
            println!("Detected {} face(s)", faces.len());
        }
        Err(err) => println!("Detector unavailable: {err}"),
    }
    Ok(())
}

fn create_admin(config: &Config, username: &str) -> Result<()> {
    let accounts = AccountStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    print!("Password for {username}: ");
    std::io::stdout().flush()?;
    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    let account = accounts.create(username, password, Role::Admin)?;
    println!("Created admin account {:?} (id {})", account.username, account.id);
    Ok(())
}

fn load_detector(config: &Config) -> Result<OnnxFaceDetector> {
    let path = config.detector_model_path.to_string_lossy();
    OnnxFaceDetector::load(&path).with_context(|| format!("loading detector model {path}"))
}
