//! Ownership of the loaded capabilities and their lifecycle.
//!
//! Request handlers never hold the lock across inference: they clone the
//! `Arc<ModelRegistry>` out of the slot and release it. A reload swaps the
//! slot wholesale, so every reader sees either the old pair or the new pair.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::TaskType;
use crate::error::ModelError;
use crate::model::capability::GenerationParams;
use crate::model::loader::ModelLoader;
use crate::model::registry::ModelRegistry;
use crate::monitor::StatsProvider;

pub const STATUS_LOADED: &str = "Models loaded successfully";
pub const STATUS_LOADING: &str = "Loading models";

#[derive(Clone)]
pub enum ProvisionState {
    Loading,
    Loaded(Arc<ModelRegistry>),
    Failed(String),
}

impl ProvisionState {
    pub fn status_message(&self) -> String {
        match self {
            ProvisionState::Loading => STATUS_LOADING.to_string(),
            ProvisionState::Loaded(_) => STATUS_LOADED.to_string(),
            ProvisionState::Failed(msg) => format!("Model loading failed: {msg}"),
        }
    }

    pub fn models(&self) -> Option<Arc<ModelRegistry>> {
        match self {
            ProvisionState::Loaded(models) => Some(Arc::clone(models)),
            _ => None,
        }
    }

    /// Cheap check: loaded sessions and tokenizers look usable.
    pub fn structural_check(&self) -> Result<(), String> {
        let models = self.models().ok_or_else(|| "Models not loaded".to_string())?;
        models.check().map_err(|e| e.to_string())
    }

    /// Expensive check: runs both pipelines on canned inputs.
    pub async fn inference_check(&self) -> Result<(), String> {
        let models = self.models().ok_or_else(|| "Models not loaded".to_string())?;
        tokio::task::spawn_blocking(move || -> Result<(), ModelError> {
            models
                .completion
                .generate("Hello", &GenerationParams { max_new_tokens: 10 })?;
            models.qa.answer(
                "What is AI?",
                "AI stands for Artificial Intelligence.",
            )?;
            Ok(())
        })
        .await
        .map_err(|e| format!("health check task failed: {e}"))?
        .map_err(|e| e.to_string())
    }
}

/// Readiness of one capability as reported by the health endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CapabilityStatus {
    pub name: TaskType,
    pub model: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

pub struct Provisioner {
    loader: Arc<dyn ModelLoader>,
    monitor: Arc<dyn StatsProvider>,
    state: RwLock<ProvisionState>,
    reload_lock: Mutex<()>,
}

impl Provisioner {
    pub fn new(loader: Arc<dyn ModelLoader>, monitor: Arc<dyn StatsProvider>) -> Self {
        Self {
            loader,
            monitor,
            state: RwLock::new(ProvisionState::Loading),
            reload_lock: Mutex::new(()),
        }
    }

    /// Loads both capabilities. On failure neither is ready.
    pub async fn initialize(&self) -> Result<(), ModelError> {
        let _guard = self.reload_lock.lock().await;
        self.provision().await
    }

    /// Tears down the current capabilities and loads fresh ones.
    ///
    /// Safe to call after a failed load. Concurrent reloads run one at a time.
    pub async fn reload(&self) -> Result<(), ModelError> {
        let _guard = self.reload_lock.lock().await;

        let previous = self.swap(ProvisionState::Loading);
        if let ProvisionState::Loaded(models) = previous {
            models.release_caches();
            // In-flight requests keep their own Arc until they finish.
            drop(models);
        }
        info!("Released loaded models, reloading");

        self.provision().await
    }

    async fn provision(&self) -> Result<(), ModelError> {
        self.swap(ProvisionState::Loading);

        let loader = Arc::clone(&self.loader);
        let result = tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap_or_else(|e| Err(ModelError::Inference(format!("model loader panicked: {e}"))));

        let outcome = match result {
            Ok(models) => {
                self.swap(ProvisionState::Loaded(Arc::new(models)));
                info!("{}", STATUS_LOADED);
                Ok(())
            }
            Err(err) => {
                self.swap(ProvisionState::Failed(err.to_string()));
                error!(error = %err, "Model loading failed");
                Err(err)
            }
        };

        let stats = self.monitor.sample();
        match stats.available_gb() {
            Some(gb) => info!(
                available_memory_gb = gb,
                memory_percent = stats.memory_percent,
                "Memory after model load"
            ),
            None => warn!("Available memory is not reported on this platform"),
        }

        outcome
    }

    fn swap(&self, next: ProvisionState) -> ProvisionState {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    pub fn state(&self) -> ProvisionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the loaded pair, if any.
    pub fn models(&self) -> Option<Arc<ModelRegistry>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .models()
    }

    pub fn is_ready(&self) -> bool {
        self.models().is_some()
    }

    pub fn status_message(&self) -> String {
        self.state().status_message()
    }

    pub fn capabilities(&self) -> Vec<CapabilityStatus> {
        self.capabilities_of(&self.state())
    }

    /// Per-capability status for an already taken snapshot.
    pub fn capabilities_of(&self, state: &ProvisionState) -> Vec<CapabilityStatus> {
        let (ready, load_error) = match state {
            ProvisionState::Loaded(_) => (true, None),
            ProvisionState::Loading => (false, None),
            ProvisionState::Failed(msg) => (false, Some(msg.clone())),
        };

        [TaskType::Completion, TaskType::Qa]
            .into_iter()
            .map(|task| CapabilityStatus {
                name: task,
                model: self.loader.model_name(task),
                ready,
                load_error: load_error.clone(),
            })
            .collect()
    }

    pub fn release_caches(&self) {
        if let Some(models) = self.models() {
            models.release_caches();
        }
    }

    pub fn structural_check(&self) -> Result<(), String> {
        self.state().structural_check()
    }

    pub async fn inference_check(&self) -> Result<(), String> {
        self.state().inference_check().await
    }
}
