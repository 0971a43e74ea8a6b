//! Audit records for intercepted transaction submissions.
//!
//! Every audited request produces one [`AuditRecord`] keyed by its
//! [`Fingerprint`]. Records are written create-only: a second write under the
//! same key is rejected by the store, never merged or overwritten. A failed
//! write is reported once and never retried, and it never affects forwarding.

pub mod credentials;
pub mod firestore;
pub mod memory;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::AuditMode;
use crate::fingerprint::Fingerprint;
use crate::stats::ProxyStats;

pub use credentials::{Credentials, MetadataTokenSource};
pub use firestore::FirestoreAuditStore;
pub use memory::MemoryAuditStore;

/// Auction state label stored with each record. Only `open` exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionState {
    Open,
}

impl AuctionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionState::Open => "open",
        }
    }
}

/// One audited request. Immutable once built.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    fingerprint: Fingerprint,
    payload: Map<String, Value>,
    auction_state: AuctionState,
    created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// A new record in the `open` auction state, stamped with the current time.
    pub fn open(fingerprint: Fingerprint, payload: Map<String, Value>) -> Self {
        Self {
            fingerprint,
            payload,
            auction_state: AuctionState::Open,
            created_at: Utc::now(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Document key in the audit store.
    pub fn key(&self) -> String {
        self.fingerprint.as_key()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn auction_state(&self) -> AuctionState {
        self.auction_state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit record {key} already exists")]
    AlreadyExists { key: String },
    #[error("audit store rejected write with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("audit store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to obtain audit store credentials: {0}")]
    Credentials(String),
    #[error("audit write shed, {max_in_flight} writes already in flight")]
    Saturated { max_in_flight: usize },
}

/// Document store that audit records are written to.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Create `record` under [`AuditRecord::key`].
    ///
    /// Must return [`AuditError::AlreadyExists`] when the key is taken.
    async fn create(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

pub type SharedAuditStore = Arc<dyn AuditStore>;

/// Builds audit records and writes them through the configured store.
#[derive(Clone)]
pub struct AuditRecorder {
    store: SharedAuditStore,
    mode: AuditMode,
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
    stats: ProxyStats,
}

impl AuditRecorder {
    /// `max_in_flight` bounds concurrent background writes; it is ignored in
    /// [`AuditMode::Sync`].
    pub fn new(
        store: SharedAuditStore,
        mode: AuditMode,
        max_in_flight: usize,
        stats: ProxyStats,
    ) -> Self {
        Self {
            store,
            mode,
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            stats,
        }
    }

    pub fn mode(&self) -> AuditMode {
        self.mode
    }

    /// Build a record and write it, waiting for the store to answer.
    pub async fn record(
        &self,
        fingerprint: Fingerprint,
        payload: Map<String, Value>,
    ) -> Result<(), AuditError> {
        let record = AuditRecord::open(fingerprint, payload);
        let span = choice_tracing::audit_write_span!(fingerprint);
        let start = Instant::now();

        async {
            let result = self.store.create(&record).await;

            let span = tracing::Span::current();
            span.record("latency_ms", start.elapsed().as_millis() as u64);
            match &result {
                Ok(()) => {
                    span.record("outcome", "created");
                    self.stats.inc_audit_ok();
                }
                Err(AuditError::AlreadyExists { .. }) => {
                    span.record("outcome", "duplicate");
                    self.stats.inc_audit_failures();
                }
                Err(_) => {
                    span.record("outcome", "failed");
                    self.stats.inc_audit_failures();
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Record according to the configured [`AuditMode`]. Failures are logged
    /// and counted here; they never reach the caller.
    pub async fn submit(&self, fingerprint: Fingerprint, payload: Map<String, Value>) {
        match self.mode {
            AuditMode::Sync => self.record_and_log(fingerprint, payload).await,
            AuditMode::Background => {
                if let Err(e) = self.spawn_record(fingerprint, payload) {
                    self.stats.inc_audit_shed();
                    tracing::warn!(error = %e, %fingerprint, "Dropping audit record");
                }
            }
        }
    }

    /// Detach the write onto its own task. Fails without spawning when
    /// `max_in_flight` writes are already running.
    pub fn spawn_record(
        &self,
        fingerprint: Fingerprint,
        payload: Map<String, Value>,
    ) -> Result<JoinHandle<()>, AuditError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| AuditError::Saturated {
                max_in_flight: self.max_in_flight,
            })?;

        let recorder = self.clone();
        let parent = tracing::Span::current();
        Ok(tokio::spawn(
            async move {
                let _permit = permit;
                recorder.record_and_log(fingerprint, payload).await;
            }
            .instrument(parent),
        ))
    }

    async fn record_and_log(&self, fingerprint: Fingerprint, payload: Map<String, Value>) {
        match self.record(fingerprint, payload).await {
            Ok(()) => tracing::info!(%fingerprint, "Successfully recorded transaction"),
            Err(e) => tracing::warn!(error = %e, %fingerprint, "Failed to record transaction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn create(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Rejected {
                status: 503,
                message: "unavailable".into(),
            })
        }
    }

    fn payload() -> Map<String, Value> {
        match json!({"method": "eth_sendTransaction", "params": ["0xabc"]}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_new_record_is_open() {
        let record = AuditRecord::open(Fingerprint::from(42), payload());
        assert_eq!(record.auction_state().as_str(), "open");
        assert_eq!(record.key(), "42");
        assert_eq!(record.payload()["method"], "eth_sendTransaction");
        assert!(record.created_at() <= Utc::now());
    }

    #[tokio::test]
    async fn test_record_writes_to_store() {
        let store = Arc::new(MemoryAuditStore::new());
        let stats = ProxyStats::new();
        let recorder = AuditRecorder::new(store.clone(), AuditMode::Sync, 1, stats.clone());

        recorder.record(Fingerprint::from(7), payload()).await.unwrap();

        let stored = store.get("7").await.unwrap();
        assert_eq!(stored.payload(), &payload());
        assert_eq!(stats.snapshot().audit_writes_ok, 1);
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_rejected() {
        let store = Arc::new(MemoryAuditStore::new());
        let stats = ProxyStats::new();
        let recorder = AuditRecorder::new(store.clone(), AuditMode::Sync, 1, stats.clone());

        recorder.record(Fingerprint::from(7), payload()).await.unwrap();
        let err = recorder
            .record(Fingerprint::from(7), payload())
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::AlreadyExists { ref key } if key == "7"));
        assert_eq!(store.len().await, 1);
        assert_eq!(stats.snapshot().audit_write_failures, 1);
    }

    #[tokio::test]
    async fn test_submit_swallows_store_failure() {
        let stats = ProxyStats::new();
        let recorder =
            AuditRecorder::new(Arc::new(FailingStore), AuditMode::Sync, 1, stats.clone());

        recorder.submit(Fingerprint::from(1), payload()).await;

        assert_eq!(stats.snapshot().audit_write_failures, 1);
    }

    #[tokio::test]
    async fn test_background_write_completes() {
        let store = Arc::new(MemoryAuditStore::new());
        let recorder =
            AuditRecorder::new(store.clone(), AuditMode::Background, 4, ProxyStats::new());

        let handle = recorder.spawn_record(Fingerprint::from(9), payload()).unwrap();
        handle.await.unwrap();

        assert!(store.get("9").await.is_some());
    }

    #[tokio::test]
    async fn test_background_sheds_when_saturated() {
        let store = Arc::new(MemoryAuditStore::new());
        let stats = ProxyStats::new();
        let recorder =
            AuditRecorder::new(store.clone(), AuditMode::Background, 1, stats.clone());

        // Hold the only permit so the next submission has nowhere to go.
        let permit = recorder.semaphore.clone().try_acquire_owned().unwrap();
        let err = recorder
            .spawn_record(Fingerprint::from(3), payload())
            .unwrap_err();
        assert!(matches!(err, AuditError::Saturated { max_in_flight: 1 }));

        recorder.submit(Fingerprint::from(3), payload()).await;
        assert_eq!(stats.snapshot().audit_writes_shed, 1);
        assert!(store.is_empty().await);
        drop(permit);
    }
}
