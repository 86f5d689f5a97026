//! Test doubles for the model capabilities and process stats.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ModelError;
use crate::model::capability::{Answer, GenerationParams, QuestionAnswering, TextCompletion};
use crate::model::loader::ModelLoader;
use crate::model::registry::ModelRegistry;
use crate::monitor::{ResourceStats, StatsProvider};

/// Reports a fixed memory percentage that tests can change.
pub struct FixedStats {
    memory_bits: AtomicU32,
}

impl FixedStats {
    pub fn new(memory_percent: f32) -> Self {
        Self {
            memory_bits: AtomicU32::new(memory_percent.to_bits()),
        }
    }

    pub fn set_memory(&self, memory_percent: f32) {
        self.memory_bits
            .store(memory_percent.to_bits(), Ordering::SeqCst);
    }
}

impl StatsProvider for FixedStats {
    fn sample(&self) -> ResourceStats {
        ResourceStats {
            cpu_percent: 12.5,
            memory_percent: f32::from_bits(self.memory_bits.load(Ordering::SeqCst)),
            available_bytes: Some(2 * 1024 * 1024 * 1024),
        }
    }
}

#[derive(Default)]
pub struct MockCompletion {
    pub calls: AtomicUsize,
    pub released: AtomicUsize,
    pub broken: AtomicBool,
    pub fail: AtomicBool,
    pub panic_on_release: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub last_call: Mutex<Option<(String, GenerationParams)>>,
}

impl TextCompletion for MockCompletion {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap() = Some((prompt.to_string(), *params));
        if let Some(delay) = *self.delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::Runtime("tensor shape exploded at layer 7".to_string()));
        }
        Ok(format!("{prompt} and then some"))
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ModelError::Tokenizer("tokenizer detached".to_string()));
        }
        Ok(())
    }

    fn release_caches(&self) {
        if self.panic_on_release.load(Ordering::SeqCst) {
            panic!("release exploded");
        }
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockQa {
    pub calls: AtomicUsize,
    pub released: AtomicUsize,
    pub last_call: Mutex<Option<(String, String)>>,
}

impl QuestionAnswering for MockQa {
    fn answer(&self, question: &str, context: &str) -> Result<Answer, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap() = Some((question.to_string(), context.to_string()));
        let answer = context
            .split_whitespace()
            .next()
            .unwrap_or("No answer found")
            .to_string();
        Ok(Answer { answer, score: 0.9 })
    }

    fn check(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn release_caches(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same mock capabilities on every load so tests can inspect them.
#[derive(Default)]
pub struct MockLoader {
    pub completion: Arc<MockCompletion>,
    pub qa: Arc<MockQa>,
    pub loads: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let loader = Self::default();
        loader.fail_with(Some(message));
        loader
    }

    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }
}

impl ModelLoader for MockLoader {
    fn load(&self) -> Result<ModelRegistry, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.failure.lock().unwrap().clone() {
            return Err(ModelError::ModelNotFound(msg));
        }
        Ok(ModelRegistry::new(self.completion.clone(), self.qa.clone()))
    }
}

/// Capability that answers every call with the load generation it came from.
struct Generation(String);

impl TextCompletion for Generation {
    fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, ModelError> {
        Ok(self.0.clone())
    }

    fn check(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

impl QuestionAnswering for Generation {
    fn answer(&self, _question: &str, _context: &str) -> Result<Answer, ModelError> {
        Ok(Answer {
            answer: self.0.clone(),
            score: 1.0,
        })
    }

    fn check(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Builds a fresh, numbered pair of capabilities on every load.
#[derive(Default)]
pub struct GenerationLoader {
    loads: AtomicUsize,
}

impl ModelLoader for GenerationLoader {
    fn load(&self) -> Result<ModelRegistry, ModelError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let label = format!("generation-{n}");
        // Give concurrent readers a chance to run mid-load.
        std::thread::sleep(Duration::from_millis(1));
        Ok(ModelRegistry::new(
            Arc::new(Generation(label.clone())),
            Arc::new(Generation(label)),
        ))
    }
}
