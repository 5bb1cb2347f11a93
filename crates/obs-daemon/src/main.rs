// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use obs_cache::{ChaChaCipher, InMemoryByteCache, SessionCache};
use obs_config::{apply_env_overrides, load_config, validate_config, CoreConfig, LogFormat};
use obs_daemon::{build_app, AppState};
use obs_import::{ImportService, ImporterRegistry, ResponsesImporter, WorkflowImporter};
use obs_platform_client::PlatformConfigClient;
use obs_store::memory::{InMemoryMessageStore, InMemoryTraceStore};
use obs_store::TraceStore;
use obs_stream::{ResponsesStreamClient, WorkflowStreamClient};
use rand::RngCore;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bounded wait for in-flight jobs to drain before the process exits (§4.11).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "obs-daemon", version, about = "Multi-tenant agent execution observability daemon")]
struct Args {
    /// Path to a TOML configuration file; compiled-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Forces debug-level logging regardless of the configured log level.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    apply_env_overrides(&mut config);
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    let warnings = validate_config(&config).context("validate configuration")?;

    init_logging(&config, args.debug);
    for warning in &warnings {
        warn!(target: "obs.config", %warning, "configuration warning");
    }

    let trace_store: Arc<dyn TraceStore> = Arc::new(InMemoryTraceStore::new());
    let message_store = Arc::new(InMemoryMessageStore::new());

    let mut registry = ImporterRegistry::new();
    registry.register(ResponsesImporter::new(Arc::clone(&trace_store)));
    registry.register(WorkflowImporter::new(Arc::clone(&trace_store)));
    let import_service = Arc::new(ImportService::new(
        Arc::new(registry),
        config.queue_capacity,
        config.queue_workers,
    ));

    let session_cache = Arc::new(SessionCache::new(InMemoryByteCache::new(), ChaChaCipher::new(&session_key(&config))));

    let platform_client = Arc::new(PlatformConfigClient::new(
        config.platform_config_base_url.clone().unwrap_or_default(),
        config.credentials.platform_bearer_token.clone().unwrap_or_default(),
        config.credentials.platform_service_key.clone().unwrap_or_default(),
        config.credentials.platform_api_key.clone().unwrap_or_default(),
    ));

    let responses_stream_client = match (&config.responses_backend_endpoint, &config.responses_api_version) {
        (Some(endpoint), Some(api_version)) => Some(Arc::new(ResponsesStreamClient::new(
            endpoint.clone(),
            api_version.clone(),
            config.credentials.responses_bearer_token.clone().unwrap_or_default(),
        ))),
        _ => {
            warn!(target: "obs.daemon", "responses backend endpoint/apiVersion not configured; live invocation via that backend is unavailable");
            None
        }
    };
    let workflow_stream_client = match &config.workflow_backend_base_url {
        Some(chat_url) => Some(Arc::new(WorkflowStreamClient::new(chat_url.clone(), None))),
        None => {
            warn!(target: "obs.daemon", "workflow backend base url not configured; live invocation via that backend is unavailable");
            None
        }
    };

    let state = Arc::new(AppState {
        trace_store: Arc::clone(&trace_store),
        message_store,
        import_service: Arc::clone(&import_service),
        session_cache,
        platform_client,
        responses_stream_client,
        workflow_stream_client,
        config: Arc::new(config.clone()),
    });

    let app = build_app(state);
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("bind {}", config.bind_address))?;
    info!(bind = %config.bind_address, contract_version = obs_core::CONTRACT_VERSION, "obs-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    info!("shutdown signal received, draining import queue");
    match Arc::try_unwrap(import_service) {
        Ok(service) => {
            if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, service.shutdown()).await.is_err() {
                warn!(target: "obs.daemon", "import queue did not drain within the grace period");
            }
        }
        Err(_) => warn!(target: "obs.daemon", "import service still had outstanding handles at shutdown"),
    }

    Ok(())
}

/// Resolves the session cache's encryption key from configuration, or
/// generates an ephemeral one for development when unset. Since the cache
/// backend itself is in-memory and process-local, an ephemeral key loses
/// nothing that a restart wouldn't already have dropped.
fn session_key(config: &CoreConfig) -> [u8; 32] {
    if let Some(hex_key) = &config.credentials.session_encryption_key {
        if let Ok(bytes) = hex::decode(hex_key) {
            if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
                return key;
            }
        }
        warn!(target: "obs.daemon", "OBS_SESSION_ENCRYPTION_KEY is not valid 32-byte hex; generating an ephemeral key");
    } else {
        warn!(target: "obs.daemon", "no session encryption key configured; generating an ephemeral key (development only)");
    }
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Resolves once on Ctrl+C or, on Unix, SIGTERM — whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_logging(config: &CoreConfig, debug: bool) {
    let directive = if debug { "obs=debug".to_string() } else { format!("obs={}", config.log_level) };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
