use crate::guard::LimitScope;
use crate::server::middleware::{enforce_rate_limit, RateLimitContext};
use crate::server::{handlers, types::AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let limited = |scope: LimitScope| {
        middleware::from_fn_with_state(
            RateLimitContext {
                limiter: Arc::clone(&state.limiter),
                scope,
            },
            enforce_rate_limit,
        )
    };

    Router::new()
        .route(
            "/predict",
            post(handlers::predict).layer(limited(LimitScope::Predict)),
        )
        .route(
            "/reload_models",
            post(handlers::reload_models).layer(limited(LimitScope::Reload)),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
