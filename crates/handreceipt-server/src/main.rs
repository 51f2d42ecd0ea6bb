//! handreceipt-server binary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use handreceipt_core::{CredentialKey, CustodyEngine, CustodyStore, InMemoryCustodyStore};
use handreceipt_ledger::{AuditLedgerRecorder, InMemoryLedger};
use handreceipt_server::{AppState, ServerConfig, StorageBackend, create_app};
use handreceipt_storage::RedbCustodyStore;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "handreceipt-server", version, about = "Hand-receipt custody service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding [server] bind
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Directory for the redb database, overriding [storage] path
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = &args.data_dir {
        config.storage.path = dir.join("handreceipt.redb");
    }

    let _log_guard = handreceipt_logging::init(config.log_config())?;

    match config.storage.backend {
        StorageBackend::Redb => {
            let store = RedbCustodyStore::open(config.redb_config())
                .with_context(|| format!("opening {}", config.storage.path.display()))?;
            serve(Arc::new(store), &config).await
        }
        StorageBackend::Memory => {
            warn!("using in-memory storage; state is lost on exit");
            serve(Arc::new(InMemoryCustodyStore::new()), &config).await
        }
    }
}

async fn serve<S: CustodyStore>(store: Arc<S>, config: &ServerConfig) -> Result<()> {
    let secret = config.credential_secret()?;
    let ledger = Arc::new(InMemoryLedger::new());
    let recorder = Arc::new(AuditLedgerRecorder::new(
        store.clone(),
        ledger.clone(),
        config.recorder_config(),
    ));

    let engine = CustodyEngine::new(
        store,
        CredentialKey::derive(secret.as_bytes()),
        config.engine_config(),
    )
    .with_notifier(Arc::new(recorder.handle()));

    let recorder_task = recorder.clone().start();

    let app = create_app(AppState::new(Arc::new(engine), ledger));
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, backend = ?config.storage.backend, "handreceipt server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("shutting down");
    recorder_task.stop().await?;
    // Last attempt to deliver what the final requests committed.
    if let Err(e) = recorder.flush().await {
        warn!(error = %e, "final outbox flush failed");
    }
    Ok(())
}
