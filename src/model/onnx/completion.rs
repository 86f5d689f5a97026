use ndarray::{ArrayViewD, Axis};
use ort::session::Session;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use super::{
    require_inputs, run_session, runtime_err, session_inputs, tokenizer_err, ArenaShrink,
    TokenBatch,
};
use crate::error::ModelError;
use crate::model::capability::{GenerationParams, TextCompletion};
use crate::model::decode::argmax;

const END_OF_TEXT: &str = "<|endoftext|>";
const CONTEXT_WINDOW: usize = 1024;

/// Greedy causal-LM decoding over an exported GPT-2 graph.
pub struct OnnxCompletion {
    session: Mutex<Session>,
    input_names: Vec<String>,
    tokenizer: Tokenizer,
    eos_id: u32,
    shrink: ArenaShrink,
}

impl OnnxCompletion {
    pub fn new(session: Session, tokenizer: Tokenizer) -> Result<Self, ModelError> {
        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        require_inputs(&input_names, &["input_ids"])?;

        let eos_id = tokenizer.token_to_id(END_OF_TEXT).ok_or_else(|| {
            ModelError::Tokenizer(format!("tokenizer has no '{END_OF_TEXT}' token"))
        })?;

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            tokenizer,
            eos_id,
            shrink: ArenaShrink::default(),
        })
    }

    fn next_token(&self, ids: &[u32]) -> Result<u32, ModelError> {
        let inputs = session_inputs(&self.input_names, &TokenBatch::from_ids(ids))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("completion session lock poisoned".to_string()))?;
        let last = run_session(&mut session, inputs, &self.shrink, |outputs| {
            // logits: [batch, sequence, vocab]
            let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(runtime_err)?;
            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            if dims.len() != 3 || dims[1] == 0 {
                return Err(ModelError::Unsupported(format!(
                    "expected logits of rank 3, got shape {dims:?}"
                )));
            }
            let logits = ArrayViewD::from_shape(dims.as_slice(), data)
                .map_err(|e| ModelError::Inference(e.to_string()))?;
            Ok(logits
                .index_axis(Axis(0), 0)
                .index_axis(Axis(0), dims[1] - 1)
                .to_vec())
        })?;

        argmax(&last)
            .map(|i| i as u32)
            .ok_or_else(|| ModelError::Inference("empty logits".to_string()))
    }
}

impl TextCompletion for OnnxCompletion {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        let encoding = self.tokenizer.encode(prompt, false).map_err(tokenizer_err)?;
        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        if ids.is_empty() {
            ids.push(self.eos_id);
        }

        // Keep the tail of long prompts so the continuation still fits.
        let budget = CONTEXT_WINDOW.saturating_sub(params.max_new_tokens).max(1);
        if ids.len() > budget {
            ids.drain(..ids.len() - budget);
        }

        for _ in 0..params.max_new_tokens {
            let next = self.next_token(&ids)?;
            if next == self.eos_id {
                break;
            }
            ids.push(next);
        }

        self.tokenizer.decode(&ids, true).map_err(tokenizer_err)
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.tokenizer.get_vocab_size(true) == 0 {
            return Err(ModelError::Tokenizer("completion tokenizer is empty".to_string()));
        }
        require_inputs(&self.input_names, &["input_ids"])
    }

    fn release_caches(&self) {
        self.shrink.request();
    }
}
