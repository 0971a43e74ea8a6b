//! choice-proxy binary: loads configuration, starts tracing, serves.

use std::sync::Arc;

use choice_proxy::audit::{FirestoreAuditStore, MemoryAuditStore, SharedAuditStore};
use choice_proxy::config::{AuditBackend, ProxyConfig};
use choice_proxy::server::{self, AppState};

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("CHOICE_PROXY_CONFIG").ok())
            .unwrap_or_else(|| "choice-proxy.toml".to_string())
    };

    // Missing backend URLs or project id stop the process here.
    let config = ProxyConfig::load(&config_path)?;

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let _tracing_guard = choice_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            bidder_url = ?config.upstream.bidder_url,
            vanilla_url = ?config.upstream.vanilla_url,
            audit_backend = ?config.audit.backend,
            audit_mode = ?config.audit.mode,
            "Starting choice-proxy"
        );

        run(config).await
    })
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let store: SharedAuditStore = match config.audit.backend {
        AuditBackend::Firestore => {
            let store = FirestoreAuditStore::from_config(&config.audit)?;
            tracing::info!(
                collection = %store.collection_url(),
                credentials = ?config.audit.credentials,
                static_token = config.audit.access_token.is_some(),
                "Writing audit records to Firestore"
            );
            Arc::new(store)
        }
        AuditBackend::Memory => {
            tracing::warn!("Audit records are kept in memory and lost on restart");
            Arc::new(MemoryAuditStore::new())
        }
    };

    let state = AppState::from_config(&config, store)?;

    server::run(&config.server.listen_address, state).await
}
