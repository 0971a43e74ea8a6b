//! choice-proxy: JSON-RPC intermediary that audits transaction submissions.
//!
//! Requests whose `method` submits a transaction are fingerprinted, written
//! to the audit store and forwarded to the bidder upstream. Everything else
//! is forwarded untouched to the vanilla upstream.

pub mod audit;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod payload;
pub mod proxy;
pub mod server;
pub mod stats;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use server::AppState;
