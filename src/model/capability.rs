//! The two inference capabilities the service exposes.
//!
//! Implementations are blocking and CPU-bound; callers run them on the
//! blocking thread pool.

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// Joint probability of the chosen start and end positions.
    pub score: f32,
}

/// Text generation: continues a prompt.
pub trait TextCompletion: Send + Sync {
    /// Returns the prompt followed by its continuation.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError>;

    /// Cheap readiness probe that does not run the model.
    fn check(&self) -> Result<(), ModelError>;

    /// Drops reclaimable buffers. Called under memory pressure.
    fn release_caches(&self) {}
}

/// Extractive question answering over a context passage.
pub trait QuestionAnswering: Send + Sync {
    fn answer(&self, question: &str, context: &str) -> Result<Answer, ModelError>;

    /// Cheap readiness probe that does not run the model.
    fn check(&self) -> Result<(), ModelError>;

    /// Drops reclaimable buffers. Called under memory pressure.
    fn release_caches(&self) {}
}
