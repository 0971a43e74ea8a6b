//! Dual-route forwarding to the bidder and vanilla upstreams.

pub mod correlation;
pub mod router;
pub mod upstream;

pub use router::DualRouter;
pub use upstream::{RouteTarget, Upstream};

/// Header identifying the operator on every upstream-bound request.
pub const OPERATOR_VERSION_HEADER: &str = "x-choice-operator-version";

/// Value sent in [`OPERATOR_VERSION_HEADER`].
pub const OPERATOR_VERSION: &str = "0.01";
