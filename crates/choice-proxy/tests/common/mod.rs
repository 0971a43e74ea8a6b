//! Shared harness: runs the real proxy on an ephemeral port.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use choice_proxy::audit::{AuditError, AuditRecord, AuditStore, SharedAuditStore};
use choice_proxy::config::{AuditBackend, ProxyConfig};
use choice_proxy::server::{self, AppState};
use choice_proxy::stats::ProxyStats;

pub struct TestProxy {
    pub base_url: String,
    pub stats: ProxyStats,
}

/// Audit store that rejects every write.
pub struct FailingStore;

#[async_trait]
impl AuditStore for FailingStore {
    async fn create(&self, _record: &AuditRecord) -> Result<(), AuditError> {
        Err(AuditError::Rejected {
            status: 503,
            message: "audit store unavailable".into(),
        })
    }
}

pub fn config_for(bidder_url: &str, vanilla_url: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.upstream.bidder_url = Some(bidder_url.to_string());
    config.upstream.vanilla_url = Some(vanilla_url.to_string());
    config.upstream.timeout_secs = 5;
    config.upstream.connect_timeout_secs = 2;
    config.audit.backend = AuditBackend::Memory;
    config
}

pub async fn spawn_proxy(config: ProxyConfig, store: SharedAuditStore) -> TestProxy {
    config.validate().expect("test config is valid");
    let state = AppState::from_config(&config, store).expect("state builds");
    let stats = state.stats.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, server::app(state))
            .await
            .expect("proxy server");
    });

    TestProxy {
        base_url: format!("http://{addr}"),
        stats,
    }
}

/// A localhost URL nothing is listening on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

pub fn shared<S: AuditStore + 'static>(store: Arc<S>) -> SharedAuditStore {
    store
}
