use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::matcher::GallerySnapshot;
use rollcall_core::{FaceAnalyzer, IdentityGallery, MatchPurpose, OnnxEmbeddingModel};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod session;
mod store;

use config::Config;
use engine::EngineHandle;
use store::IdentityStore;

#[derive(Parser)]
#[command(name = "rollcalld", version, about = "Liveness-gated face attendance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an attendance session over landmark events (JSON lines)
    Run {
        /// Read events from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
        /// Drop events that arrive while the previous one is being analyzed
        /// (always on for stdin)
        #[arg(long)]
        latest_only: bool,
    },
    /// Enroll a person from a cropped face image
    Enroll {
        /// Name shown on check-in
        #[arg(long)]
        name: String,
        /// Face image (already cropped to the face)
        #[arg(long)]
        image: PathBuf,
        /// Enroll even if the face matches an existing identity
        #[arg(long)]
        force: bool,
    },
    /// List enrolled identities
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity by ID
    Remove { id: String },
    /// Show store and model status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Reports go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Run { input, latest_only } => run(&config, input, latest_only).await,
        Command::Enroll { name, image, force } => enroll(&config, &name, image, force).await,
        Command::List { json } => list(&config, json).await,
        Command::Remove { id } => remove(&config, &id).await,
        Command::Status => status(&config).await,
    }
}

async fn open_store(config: &Config) -> Result<IdentityStore> {
    IdentityStore::open(&config.db_path, config.embedding.embedding_dim)
        .await
        .with_context(|| format!("failed to open identity store {}", config.db_path.display()))
}

/// Verify and load the embedding model, then start the engine thread.
fn start_engine(config: &Config) -> Result<EngineHandle> {
    let path = config.model_path();
    rollcall_models::verify_model(&path, config.model_sha256.as_deref())
        .context("embedding model failed integrity check")?;

    let model = OnnxEmbeddingModel::load(&path.to_string_lossy(), config.embedding.embedding_dim)
        .context("failed to load embedding model")?;
    Ok(engine::spawn_engine(Box::new(model), config.embedding.clone())?)
}

async fn run(config: &Config, input: Option<PathBuf>, latest_only: bool) -> Result<()> {
    let store = open_store(config).await?;
    let identities = store.get_all_identities().await?;
    tracing::info!(count = identities.len(), "enrolled identities loaded");
    let gallery = Arc::new(IdentityGallery::new(identities));

    let engine = start_engine(config)?;
    let refresher = (config.gallery_refresh_secs > 0).then(|| {
        spawn_gallery_refresh(
            store.clone(),
            Arc::clone(&gallery),
            Duration::from_secs(config.gallery_refresh_secs),
        )
    });

    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(session::write_reports(reports_rx, tokio::io::stdout()));

    let session = session::Session::new(
        FaceAnalyzer::new(config.analyzer.clone()),
        engine,
        gallery,
        config.matching.clone(),
        reports_tx,
    );

    let mut snapshots = session.subscribe();
    tokio::spawn(async move {
        let mut last = snapshots.borrow().status;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if snapshot.status != last {
                tracing::debug!(
                    status = %snapshot.status,
                    guidance = snapshot.guidance,
                    quality = snapshot.quality,
                    "status changed"
                );
                last = snapshot.status;
            }
        }
    });

    let (reader, latest_only): (Box<dyn AsyncBufRead + Unpin + Send>, bool) = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            (Box::new(BufReader::new(file)), latest_only)
        }
        None => (Box::new(BufReader::new(tokio::io::stdin())), true),
    };

    tracing::info!(latest_only, "session started");
    let stats = tokio::select! {
        res = session::run(reader, latest_only, session) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, session abandoned");
            return Ok(());
        }
    };

    if let Some(handle) = refresher {
        handle.abort();
    }
    let written = writer.await??;
    tracing::info!(
        frames = stats.frames,
        dropped = stats.dropped,
        malformed = stats.malformed,
        captures = stats.captures,
        reports = written,
        "session finished"
    );
    Ok(())
}

/// Periodically reload the enrolled set, swapping it in when it changed.
fn spawn_gallery_refresh(
    store: IdentityStore,
    gallery: Arc<IdentityGallery>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.get_all_identities().await {
                Ok(identities) => {
                    let current = gallery.snapshot();
                    let unchanged = current.identities.len() == identities.len()
                        && current
                            .identities
                            .iter()
                            .zip(&identities)
                            .all(|(a, b)| a.id == b.id);
                    if !unchanged {
                        gallery.replace(identities);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to refresh enrolled identities"),
            }
        }
    })
}

async fn enroll(config: &Config, name: &str, image: PathBuf, force: bool) -> Result<()> {
    let store = open_store(config).await?;
    let snapshot = Arc::new(GallerySnapshot {
        version: 0,
        identities: store.get_all_identities().await?,
    });
    let engine = start_engine(config)?;

    let face = tokio::task::spawn_blocking(move || {
        image::open(&image)
            .map(|img| img.to_rgb8())
            .with_context(|| format!("failed to read {}", image.display()))
    })
    .await??;

    let threshold = MatchPurpose::DuplicateCheck.threshold(&config.matching);
    let out = engine.enroll(face, snapshot, threshold).await?;

    if let (true, Some(existing)) = (out.duplicate.decided, out.duplicate.identity.as_ref()) {
        if !force {
            bail!(
                "face already enrolled as {} ({}), similarity {:.3}; use --force to enroll anyway",
                existing.display_name,
                existing.id,
                out.duplicate.similarity
            );
        }
        tracing::warn!(existing = %existing.id, "enrolling despite duplicate match");
    }

    let id = store.insert(name, &out.embedding, out.quality.score).await?;
    tracing::info!(%id, quality = out.quality.score, "identity enrolled");
    println!("{id}");
    Ok(())
}

async fn list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let identities = store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&identities)?);
        return Ok(());
    }
    if identities.is_empty() {
        println!("no identities enrolled");
        return Ok(());
    }
    for info in identities {
        println!(
            "{}  {:<24}  quality {:.2}  {}  {}",
            info.id, info.display_name, info.quality_score, info.model_version, info.created_at
        );
    }
    Ok(())
}

async fn remove(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    if !store.remove(id).await? {
        bail!("no identity with id {id}");
    }
    println!("removed {id}");
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let count = store.count_all().await?;
    let model_path = config.model_path();

    println!("database:   {}", config.db_path.display());
    println!("identities: {count}");
    println!("model:      {}", model_path.display());
    match rollcall_models::verify_model(&model_path, config.model_sha256.as_deref()) {
        Ok(rollcall_models::Verification::Verified { digest }) => {
            println!("checksum:   {digest} (verified)")
        }
        Ok(rollcall_models::Verification::Unpinned { digest }) => {
            println!("checksum:   {digest} (not pinned)")
        }
        Err(e) => println!("checksum:   error: {e}"),
    }
    println!(
        "thresholds: attendance {:.2}, duplicate {:.2}",
        config.matching.attendance_threshold, config.matching.duplicate_threshold
    );
    Ok(())
}
