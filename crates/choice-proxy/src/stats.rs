//! Atomic proxy statistics counters.
//!
//! All atomics use `Relaxed` ordering: these are monotonic display counters
//! with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::payload::Classification;

#[derive(Default)]
struct StatsInner {
    total_requests: AtomicU64,
    audited_requests: AtomicU64,
    passthrough_requests: AtomicU64,
    rejected_requests: AtomicU64,
    fingerprint_failures: AtomicU64,
    audit_writes_ok: AtomicU64,
    audit_write_failures: AtomicU64,
    audit_writes_shed: AtomicU64,
}

/// Thread-safe atomic proxy statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct ProxyStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub audited_requests: u64,
    pub passthrough_requests: u64,
    pub rejected_requests: u64,
    pub fingerprint_failures: u64,
    pub audit_writes_ok: u64,
    pub audit_write_failures: u64,
    pub audit_writes_shed: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_classified(&self, classification: Classification) {
        let counter = match classification {
            Classification::Audited => &self.inner.audited_requests,
            Classification::PassThrough => &self.inner.passthrough_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.inner.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fingerprint_failures(&self) {
        self.inner.fingerprint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_audit_ok(&self) {
        self.inner.audit_writes_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_audit_failures(&self) {
        self.inner.audit_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_audit_shed(&self) {
        self.inner.audit_writes_shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            total_requests: load(&self.inner.total_requests),
            audited_requests: load(&self.inner.audited_requests),
            passthrough_requests: load(&self.inner.passthrough_requests),
            rejected_requests: load(&self.inner.rejected_requests),
            fingerprint_failures: load(&self.inner.fingerprint_failures),
            audit_writes_ok: load(&self.inner.audit_writes_ok),
            audit_write_failures: load(&self.inner.audit_write_failures),
            audit_writes_shed: load(&self.inner.audit_writes_shed),
        }
    }
}
