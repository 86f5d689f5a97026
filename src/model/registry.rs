use crate::model::capability::{QuestionAnswering, TextCompletion};
use crate::error::ModelError;
use std::sync::Arc;

/// A fully loaded pair of capabilities.
///
/// The pair is built and replaced as a unit: a registry never holds one
/// capability from an older load next to one from a newer load.
#[derive(Clone)]
pub struct ModelRegistry {
    pub completion: Arc<dyn TextCompletion>,
    pub qa: Arc<dyn QuestionAnswering>,
}

impl ModelRegistry {
    pub fn new(completion: Arc<dyn TextCompletion>, qa: Arc<dyn QuestionAnswering>) -> Self {
        Self { completion, qa }
    }

    /// Structural check of both capabilities.
    pub fn check(&self) -> Result<(), ModelError> {
        self.completion.check()?;
        self.qa.check()
    }

    pub fn release_caches(&self) {
        self.completion.release_caches();
        self.qa.release_caches();
    }
}
