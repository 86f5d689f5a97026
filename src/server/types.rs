use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::config::{AppConfig, HealthCheckMode, LimitsConfig};
use crate::guard::{MemoryGuard, RateLimiter};
use crate::model::provisioner::{CapabilityStatus, Provisioner};
use crate::monitor::StatsProvider;

/// Shared Application State
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub limiter: Arc<RateLimiter>,
    pub memory: MemoryGuard,
    pub monitor: Arc<dyn StatsProvider>,
    pub limits: LimitsConfig,
    pub health_check: HealthCheckMode,
    /// Bounds how many blocking inference calls run at once.
    pub inference_permits: Arc<Semaphore>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        provisioner: Arc<Provisioner>,
        monitor: Arc<dyn StatsProvider>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            provisioner,
            limiter: Arc::new(RateLimiter::new(&config.rate_limits)),
            memory: MemoryGuard::new(
                Arc::clone(&monitor),
                config.limits.memory_high_water_percent,
            ),
            monitor,
            limits: config.limits.clone(),
            health_check: config.health.check,
            inference_permits: Arc::new(Semaphore::new(config.limits.max_concurrent_inferences.max(1))),
            metrics,
            started_at: Instant::now(),
        }
    }
}

// --- DTOs (Data Transfer Objects) ---

// Predict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictRequest {
    Completion {
        text: String,
        max_length: Option<usize>,
    },
    Qa {
        context: String,
        question: String,
    },
}

#[derive(Serialize)]
pub struct PredictResponse {
    pub response: String,
}

// Health
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_status: String,
    pub model_check: String,
    pub cpu_usage: String,
    pub memory_usage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_memory_gb: Option<f64>,
    pub uptime: String,
    pub capabilities: Vec<CapabilityStatus>,
}

// Reload
#[derive(Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub model_status: String,
}
