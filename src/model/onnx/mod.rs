//! ONNX Runtime backend: GPT-2 style completion and SQuAD style extractive QA.

mod completion;
mod qa;

pub use completion::OnnxCompletion;
pub use qa::OnnxQa;

use ort::session::{
    builder::GraphOptimizationLevel, RunOptions, Session, SessionInputValue, SessionOutputs,
};
use ort::value::Tensor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::{ModelsConfig, TaskType};
use crate::error::ModelError;
use crate::model::loader::ModelLoader;
use crate::model::registry::ModelRegistry;

pub struct OnnxLoader {
    config: ModelsConfig,
}

impl OnnxLoader {
    pub fn new(config: ModelsConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self) -> Result<ModelRegistry, ModelError> {
        let threads = self.config.intra_threads;

        let completion = &self.config.completion;
        info!(model = %completion.name, "Loading completion model");
        let completion = OnnxCompletion::new(
            load_session(&completion.path, threads)?,
            load_tokenizer(&completion.tokenizer_path)?,
        )?;

        let qa = &self.config.qa;
        info!(model = %qa.name, "Loading question answering model");
        let qa = OnnxQa::new(
            load_session(&qa.path, threads)?,
            load_tokenizer(&qa.tokenizer_path)?,
        )?;

        Ok(ModelRegistry::new(Arc::new(completion), Arc::new(qa)))
    }

    fn model_name(&self, task: TaskType) -> String {
        match task {
            TaskType::Completion => self.config.completion.name.clone(),
            TaskType::Qa => self.config.qa.name.clone(),
        }
    }
}

pub(crate) fn runtime_err(e: impl std::fmt::Display) -> ModelError {
    ModelError::Runtime(e.to_string())
}

pub(crate) fn tokenizer_err(e: impl std::fmt::Display) -> ModelError {
    ModelError::Tokenizer(e.to_string())
}

/// Loads an ONNX model from disk and creates an inference session.
pub fn load_session(model_path: impl AsRef<Path>, intra_threads: usize) -> Result<Session, ModelError> {
    let path = model_path.as_ref();
    if !path.exists() {
        return Err(ModelError::ModelNotFound(path.display().to_string()));
    }

    let session = Session::builder()
        .map_err(runtime_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(runtime_err)?
        .with_intra_threads(intra_threads)
        .map_err(runtime_err)?
        .commit_from_file(path)
        .map_err(runtime_err)?;

    info!("Loaded model: {}", path.display());
    for (i, input) in session.inputs.iter().enumerate() {
        debug!("  Input {}: {} ({:?})", i, input.name, input.input_type);
    }

    Ok(session)
}

pub fn load_tokenizer(tokenizer_path: impl AsRef<Path>) -> Result<Tokenizer, ModelError> {
    let path = tokenizer_path.as_ref();
    if !path.exists() {
        return Err(ModelError::TokenizerNotFound(path.display().to_string()));
    }
    let tokenizer = Tokenizer::from_file(path).map_err(tokenizer_err)?;
    debug!("Loaded tokenizer from {}", path.display());
    Ok(tokenizer)
}

/// Token-level inputs for a single sequence.
pub(crate) struct TokenBatch {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub type_ids: Vec<i64>,
}

impl TokenBatch {
    pub fn from_ids(ids: &[u32]) -> Self {
        Self {
            ids: ids.iter().map(|&id| i64::from(id)).collect(),
            attention_mask: vec![1; ids.len()],
            type_ids: vec![0; ids.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

fn tensor_input(values: Vec<i64>) -> Result<SessionInputValue<'static>, ModelError> {
    let shape = vec![1usize, values.len()];
    let tensor = Tensor::from_array((shape, values.into_boxed_slice())).map_err(runtime_err)?;
    Ok(tensor.into())
}

/// Maps the session's declared inputs onto the batch.
///
/// Exports that expect past key/value inputs are rejected: the decoding loop
/// re-runs the whole sequence on every step.
pub(crate) fn session_inputs(
    input_names: &[String],
    batch: &TokenBatch,
) -> Result<Vec<(String, SessionInputValue<'static>)>, ModelError> {
    input_names
        .iter()
        .map(|name| {
            let values = match name.as_str() {
                "input_ids" => batch.ids.clone(),
                "attention_mask" => batch.attention_mask.clone(),
                "token_type_ids" => batch.type_ids.clone(),
                "position_ids" => (0..batch.len() as i64).collect(),
                other => {
                    return Err(ModelError::Unsupported(format!(
                        "model expects input '{other}'"
                    )))
                }
            };
            Ok((name.clone(), tensor_input(values)?))
        })
        .collect()
}

/// A pending request to hand the CPU memory arena back to the allocator.
///
/// ONNX Runtime only shrinks its arena at the end of a run, so a release marks
/// the session and the next run carries the shrink option.
#[derive(Default)]
pub(crate) struct ArenaShrink {
    pending: AtomicBool,
}

impl ArenaShrink {
    pub fn request(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Returns true once per request.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Runs the session, shrinking the memory arena afterwards when a release is
/// pending, and hands the outputs to `extract`.
pub(crate) fn run_session<T>(
    session: &mut Session,
    inputs: Vec<(String, SessionInputValue<'static>)>,
    shrink: &ArenaShrink,
    extract: impl FnOnce(&SessionOutputs) -> Result<T, ModelError>,
) -> Result<T, ModelError> {
    if shrink.take() {
        let mut options = RunOptions::new().map_err(runtime_err)?;
        options
            .add_config_entry("memory.enable_memory_arena_shrinkage", "cpu:0")
            .map_err(runtime_err)?;
        let outputs = session
            .run_with_options(inputs, &options)
            .map_err(runtime_err)?;
        debug!("Shrank CPU memory arena");
        return extract(&outputs);
    }

    let outputs = session.run(inputs).map_err(runtime_err)?;
    extract(&outputs)
}

pub(crate) fn require_inputs(input_names: &[String], required: &[&str]) -> Result<(), ModelError> {
    for name in required {
        if !input_names.iter().any(|n| n == name) {
            return Err(ModelError::Unsupported(format!("model has no '{name}' input")));
        }
    }
    Ok(())
}
