//! Span builder helpers for choice-proxy instrumentation.

/// Create the top-level span for one inbound request.
///
/// Usage: `let span = proxy_request_span!(correlation_id, http_method, path);`
///
/// Fields recorded once the body has been inspected:
/// - `rpc_method`: the JSON-RPC `method`, when present
/// - `route`: `bidder` or `vanilla`
/// - `fingerprint`: identity of an audited request
#[macro_export]
macro_rules! proxy_request_span {
    ($correlation_id:expr, $http_method:expr, $path:expr) => {
        tracing::info_span!(
            "proxy_request",
            correlation_id = %$correlation_id,
            http_method = %$http_method,
            path = %$path,
            rpc_method = tracing::field::Empty,
            route = tracing::field::Empty,
            fingerprint = tracing::field::Empty,
        )
    };
}

/// Create a span for the forward to one of the upstream targets.
#[macro_export]
macro_rules! upstream_forward_span {
    ($correlation_id:expr, $target:expr, $host:expr) => {
        tracing::info_span!(
            "upstream_forward",
            correlation_id = %$correlation_id,
            target = %$target,
            host = %$host,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a span for a single audit-store write.
#[macro_export]
macro_rules! audit_write_span {
    ($fingerprint:expr) => {
        tracing::info_span!(
            "audit_write",
            fingerprint = %$fingerprint,
            outcome = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
