//! Upstream targets and raw byte forwarding.
//!
//! Forwarding is verbatim in both directions: the client's body bytes are
//! sent unchanged and the upstream body is streamed back without parsing.
//! Only the target address, the operator version header and hop-by-hop
//! headers differ from what the client sent.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::Url;
use tracing::Instrument;

use super::{OPERATOR_VERSION, OPERATOR_VERSION_HEADER};
use crate::error::ProxyError;
use crate::payload::Classification;

/// Headers that should NOT be forwarded (hop-by-hop headers).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "proxy-connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
];

/// Which backend a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Bidder,
    Vanilla,
}

impl RouteTarget {
    pub fn for_classification(classification: Classification) -> Self {
        match classification {
            Classification::Audited => RouteTarget::Bidder,
            Classification::PassThrough => RouteTarget::Vanilla,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTarget::Bidder => "bidder",
            RouteTarget::Vanilla => "vanilla",
        }
    }
}

/// An upstream resolved once at startup: scheme, host and optional base path.
#[derive(Debug, Clone)]
pub struct Upstream {
    target: RouteTarget,
    base: Url,
}

impl Upstream {
    pub fn new(target: RouteTarget, base: Url) -> Self {
        Self { target, base }
    }

    pub fn target(&self) -> RouteTarget {
        self.target
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// URL for an inbound request: the base path joined with the request
    /// path by a single slash, and the base query followed by the request query.
    pub fn url_for(&self, uri: &Uri) -> Url {
        let base_path = self.base.path().trim_end_matches('/');
        let request_path = uri.path().trim_start_matches('/');

        let mut url = self.base.clone();
        url.set_path(&format!("{base_path}/{request_path}"));

        let query = match (self.base.query().filter(|q| !q.is_empty()), uri.query()) {
            (Some(base), Some(req)) if !req.is_empty() => Some(format!("{base}&{req}")),
            (Some(base), _) => Some(base.to_string()),
            (None, Some(req)) if !req.is_empty() => Some(req.to_string()),
            _ => None,
        };
        url.set_query(query.as_deref());
        url
    }
}

/// Forward a request to `upstream` and stream the response back.
///
/// Connection failures answer 502 and timeouts 504. Nothing is retried.
pub async fn forward_raw(
    client: &reqwest::Client,
    upstream: &Upstream,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
    correlation_id: &str,
) -> Response {
    let url = upstream.url_for(uri);
    let span = choice_tracing::upstream_forward_span!(
        correlation_id,
        upstream.target().as_str(),
        upstream.host()
    );
    let start = Instant::now();

    async {
        let upstream_result = client
            .request(method, url)
            .headers(outbound_headers(headers))
            .body(body)
            .send()
            .await;

        build_response(upstream_result, upstream.target(), start)
    }
    .instrument(span)
    .await
}

/// Copy of the client's headers as sent upstream: hop-by-hop headers and
/// `content-length` removed, operator version set.
pub fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = end_to_end_headers(headers);
    // reqwest sets content-length from the body, which is the client's own bytes.
    outbound.remove("content-length");
    outbound.insert(
        OPERATOR_VERSION_HEADER,
        HeaderValue::from_static(OPERATOR_VERSION),
    );
    outbound
}

/// Drop hop-by-hop headers, including any named in the `connection` header.
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name_str)
            || connection_listed.iter().any(|listed| listed == name_str)
        {
            continue;
        }
        kept.append(name.clone(), value.clone());
    }
    kept
}

/// Build an axum Response from the upstream reqwest result, streaming the body back.
fn build_response(
    upstream_result: Result<reqwest::Response, reqwest::Error>,
    target: RouteTarget,
    start: Instant,
) -> Response {
    let latency = start.elapsed().as_millis() as u64;
    tracing::Span::current().record("latency_ms", latency);

    let upstream_resp = match upstream_result {
        Ok(resp) => resp,
        Err(e) => {
            let err = if e.is_timeout() {
                ProxyError::UpstreamTimeout {
                    target: target.as_str(),
                    source: e,
                }
            } else {
                ProxyError::UpstreamUnavailable {
                    target: target.as_str(),
                    source: e,
                }
            };
            tracing::Span::current().record("status", err.status().as_u16());
            tracing::error!(error = %err, "Upstream request failed");
            return err.into_response();
        }
    };

    let status = upstream_resp.status();
    tracing::Span::current().record("status", status.as_u16());
    tracing::info!(status = status.as_u16(), latency_ms = latency, "Forward complete");

    let headers = end_to_end_headers(upstream_resp.headers());
    let mut response = Response::new(Body::from_stream(upstream_resp.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
