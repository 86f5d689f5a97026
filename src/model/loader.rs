use crate::config::{ModelsConfig, TaskType};
use crate::error::ModelError;
use crate::model::registry::ModelRegistry;
use std::sync::Arc;

/// Builds a complete [`ModelRegistry`] from scratch.
///
/// `load` either returns both capabilities or an error; there is no partially
/// loaded result.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<ModelRegistry, ModelError>;

    /// Human-readable model name reported by the health endpoint.
    fn model_name(&self, task: TaskType) -> String {
        task.as_str().to_string()
    }
}

/// Picks the loader for the configured models.
pub fn from_config(config: &ModelsConfig) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Arc::new(crate::model::onnx::OnnxLoader::new(config.clone()))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Arc::new(DisabledLoader {
            config: config.clone(),
        })
    }
}

/// Stand-in used when the binary is built without an inference backend.
///
/// Every load fails, which leaves the service running in its not-initialized
/// state with health reporting intact.
pub struct DisabledLoader {
    config: ModelsConfig,
}

impl DisabledLoader {
    pub fn new(config: ModelsConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for DisabledLoader {
    fn load(&self) -> Result<ModelRegistry, ModelError> {
        Err(ModelError::BackendDisabled(
            "pipeserve was built without the `onnx` feature".to_string(),
        ))
    }

    fn model_name(&self, task: TaskType) -> String {
        match task {
            TaskType::Completion => self.config.completion.name.clone(),
            TaskType::Qa => self.config.qa.name.clone(),
        }
    }
}
