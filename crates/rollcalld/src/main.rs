use anyhow::{Context, Result};
use rollcall_core::{FaceStore, JsonModelStore, Ledger};
use rollcalld::accounts::AccountStore;
use rollcalld::auth::SessionStore;
use rollcalld::config::Config;
use rollcalld::engine::{spawn_engine, EngineSettings};
use rollcalld::http::{self, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    std::fs::create_dir_all(&config.faces_dir)
        .with_context(|| format!("creating {}", config.faces_dir.display()))?;
    std::fs::create_dir_all(&config.ledger_dir)
        .with_context(|| format!("creating {}", config.ledger_dir.display()))?;

    let accounts = AccountStore::open(&config.db_path)
        .with_context(|| format!("opening account db {}", config.db_path.display()))?;
    if accounts.role_counts()?.admin == 0 {
        tracing::warn!(
            "no admin accounts exist; run `rollcall create-admin` to bootstrap one"
        );
    }

    let face_store = FaceStore::new(&config.faces_dir);
    let model_store = JsonModelStore::new(&config.model_path);
    let ledger = Ledger::new(&config.ledger_dir);

    let engine = spawn_engine(
        EngineSettings {
            camera_device: config.camera_device.clone(),
            detector_model_path: config.detector_model_path.to_string_lossy().into_owned(),
            knn_k: config.knn_k,
            enroll_frame_budget: config.enroll_frame_budget,
            mark_frame_budget: config.mark_frame_budget,
        },
        face_store.clone(),
        model_store,
        ledger.clone(),
    )
    .context("starting engine")?;

    let state = Arc::new(AppState {
        accounts,
        sessions: SessionStore::new(),
        engine,
        ledger,
        face_store,
        max_samples: config.max_samples,
    });
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    axum::serve(listener, app).await?;
    Ok(())
}
