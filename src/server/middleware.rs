use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::guard::{LimitScope, RateLimiter};

#[derive(Clone)]
pub struct RateLimitContext {
    pub limiter: Arc<RateLimiter>,
    pub scope: LimitScope,
}

/// Rejects the request with 429 when the client is over any window for the
/// route's scope. Clients are identified by remote address only.
pub async fn enforce_rate_limit(
    State(ctx): State<RateLimitContext>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if let Err(rejection) = ctx.limiter.check(ctx.scope, client) {
        warn!(
            %client,
            endpoint = ctx.scope.as_str(),
            limit = %rejection.window,
            "Rate limit exceeded"
        );
        counter!("rate_limited_total", 1, "endpoint" => ctx.scope.as_str());
        return Err(ApiError::RateLimited {
            limit: rejection.window.to_string(),
            retry_after: rejection.retry_after,
        });
    }

    Ok(next.run(request).await)
}
