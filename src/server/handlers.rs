use axum::{body::Bytes, extract::State, Json};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::HealthCheckMode;
use crate::error::{ApiError, ModelError};
use crate::model::provisioner::ProvisionState;
use crate::server::dispatch;
use crate::server::types::*;

pub const CHECK_OK: &str = "Models responding normally";

pub async fn predict(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<PredictResponse>, ApiError> {
    let result = run_prediction(&state, &body).await;
    if let Err(err) = &result {
        counter!("predict_errors_total", 1, "kind" => err.kind());
    }
    result.map(Json)
}

async fn run_prediction(state: &Arc<AppState>, body: &[u8]) -> Result<PredictResponse, ApiError> {
    // 1. Validate
    let request = dispatch::parse_request(body)?;

    // 2. Route to a loaded capability
    let call = dispatch::route(request, &state.provisioner, &state.limits)?;
    let task = call.task_type();
    counter!("predict_requests_total", 1, "task" => task.as_str());

    // 3. Inference. The deadline covers the wait for a permit too.
    let permits = Arc::clone(&state.inference_permits);
    let timeout = state.limits.inference_timeout();
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, async move {
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Unavailable(task))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            call.execute()
        })
        .await
        .map_err(|join_err| {
            ApiError::from(ModelError::Inference(format!(
                "inference task aborted: {join_err}"
            )))
        })
    })
    .await;
    let duration = start.elapsed();
    histogram!("inference_duration_seconds", duration.as_secs_f64(), "task" => task.as_str());

    // 4. Memory check; cleanup runs in the background
    state.memory.relieve(&state.provisioner, &state.limiter);

    let response = match outcome {
        Err(_) => return Err(ApiError::Timeout(timeout)),
        Ok(result) => result??,
    };

    debug!(task = %task, elapsed_ms = duration.as_millis() as u64, "Prediction served");
    Ok(PredictResponse { response })
}

/// Always answers 200; problems are reported in the payload.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let monitor = Arc::clone(&state.monitor);
    let stats = tokio::task::spawn_blocking(move || monitor.sample())
        .await
        .unwrap_or_default();

    // One snapshot feeds every field, even if a reload lands meanwhile.
    let provision = state.provisioner.state();
    let check = match state.health_check {
        HealthCheckMode::Structural => provision.structural_check(),
        HealthCheckMode::Inference => provision.inference_check().await,
    };
    let model_check = match check {
        Ok(()) => CHECK_OK.to_string(),
        Err(err) => format!("Model issue detected: {err}"),
    };

    gauge!("process_cpu_percent", f64::from(stats.cpu_percent));
    gauge!("process_memory_percent", f64::from(stats.memory_percent));

    Json(HealthResponse {
        status: match &provision {
            ProvisionState::Loaded(_) => "healthy",
            _ => "degraded",
        },
        model_status: provision.status_message(),
        model_check,
        cpu_usage: format!("{:.1}%", stats.cpu_percent),
        memory_usage: format!("{:.1}%", stats.memory_percent),
        available_memory_gb: stats.available_gb(),
        uptime: format!("{} seconds", state.started_at.elapsed().as_secs()),
        capabilities: state.provisioner.capabilities_of(&provision),
    })
}

pub async fn reload_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    info!("Manual model reload requested");

    match state.provisioner.reload().await {
        Ok(()) => {
            counter!("model_reloads_total", 1, "outcome" => "success");
            Ok(Json(ReloadResponse {
                status: "success",
                model_status: state.provisioner.status_message(),
            }))
        }
        Err(err) => {
            counter!("model_reloads_total", 1, "outcome" => "failure");
            Err(ApiError::Reload(err.to_string()))
        }
    }
}

pub async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}
