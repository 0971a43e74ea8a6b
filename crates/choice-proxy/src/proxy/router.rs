//! Routes a classified request to the bidder or the vanilla upstream.

use std::time::Duration;

use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;

use super::upstream::{self, RouteTarget, Upstream};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::payload::Classification;

/// Both upstreams and the pooled client that reaches them. Built once at
/// startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct DualRouter {
    client: reqwest::Client,
    bidder: Upstream,
    vanilla: Upstream,
}

impl DualRouter {
    pub fn new(client: reqwest::Client, bidder: Upstream, vanilla: Upstream) -> Self {
        Self {
            client,
            bidder,
            vanilla,
        }
    }

    /// Resolve both upstream URLs and build the forwarding client.
    ///
    /// Redirects are not followed: a redirect from an upstream is returned to
    /// the caller as-is.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let bidder = Upstream::new(RouteTarget::Bidder, config.bidder_url()?);
        let vanilla = Upstream::new(RouteTarget::Vanilla, config.vanilla_url()?);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream.timeout_secs))
            .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::InvalidConfig(format!("upstream client: {e}")))?;

        Ok(Self::new(client, bidder, vanilla))
    }

    pub fn upstream(&self, target: RouteTarget) -> &Upstream {
        match target {
            RouteTarget::Bidder => &self.bidder,
            RouteTarget::Vanilla => &self.vanilla,
        }
    }

    /// Forward the request with its original body bytes to the upstream
    /// selected by `classification`.
    pub async fn route(
        &self,
        parts: &Parts,
        body: Bytes,
        classification: Classification,
        correlation_id: &str,
    ) -> Response {
        let target = RouteTarget::for_classification(classification);
        tracing::Span::current().record("route", target.as_str());

        upstream::forward_raw(
            &self.client,
            self.upstream(target),
            parts.method.clone(),
            &parts.uri,
            &parts.headers,
            body,
            correlation_id,
        )
        .await
    }
}
