use ort::session::Session;
use std::sync::Mutex;
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

use super::{
    require_inputs, run_session, runtime_err, session_inputs, tokenizer_err, ArenaShrink,
    TokenBatch,
};
use crate::error::ModelError;
use crate::model::capability::{Answer, QuestionAnswering};
use crate::model::decode::best_span;

const MAX_SEQUENCE_LEN: usize = 384;
const MAX_ANSWER_TOKENS: usize = 30;
const NO_ANSWER: &str = "No answer found";

/// Span extraction over an exported SQuAD-finetuned encoder.
pub struct OnnxQa {
    session: Mutex<Session>,
    input_names: Vec<String>,
    tokenizer: Tokenizer,
    shrink: ArenaShrink,
}

impl OnnxQa {
    pub fn new(session: Session, mut tokenizer: Tokenizer) -> Result<Self, ModelError> {
        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        require_inputs(&input_names, &["input_ids", "attention_mask"])?;

        // Long contexts lose their tail, never the question.
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LEN,
                strategy: TruncationStrategy::OnlySecond,
                ..Default::default()
            }))
            .map_err(tokenizer_err)?;

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            tokenizer,
            shrink: ArenaShrink::default(),
        })
    }

    fn span_logits(&self, batch: &TokenBatch) -> Result<(Vec<f32>, Vec<f32>), ModelError> {
        let inputs = session_inputs(&self.input_names, batch)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("qa session lock poisoned".to_string()))?;
        run_session(&mut session, inputs, &self.shrink, |outputs| {
            // Outputs are (start_logits, end_logits), each [batch, sequence].
            let (_, start) = outputs[0].try_extract_tensor::<f32>().map_err(runtime_err)?;
            let (_, end) = outputs[1].try_extract_tensor::<f32>().map_err(runtime_err)?;
            Ok((start.to_vec(), end.to_vec()))
        })
    }
}

impl QuestionAnswering for OnnxQa {
    fn answer(&self, question: &str, context: &str) -> Result<Answer, ModelError> {
        let encoding = self
            .tokenizer
            .encode((question, context), true)
            .map_err(tokenizer_err)?;

        let batch = TokenBatch {
            ids: encoding.get_ids().iter().map(|&v| i64::from(v)).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&v| i64::from(v))
                .collect(),
            type_ids: encoding.get_type_ids().iter().map(|&v| i64::from(v)).collect(),
        };

        let (start_logits, end_logits) = self.span_logits(&batch)?;
        if start_logits.len() < batch.len() || end_logits.len() < batch.len() {
            return Err(ModelError::Inference(
                "span logits shorter than the input sequence".to_string(),
            ));
        }

        let context_positions: Vec<usize> = encoding
            .get_sequence_ids()
            .iter()
            .enumerate()
            .filter(|(_, seq)| **seq == Some(1))
            .map(|(i, _)| i)
            .collect();

        let offsets = encoding.get_offsets();
        let answer = best_span(&start_logits, &end_logits, &context_positions, MAX_ANSWER_TOKENS)
            .and_then(|span| {
                let text = context.get(offsets[span.start].0..offsets[span.end].1)?;
                let text = text.trim();
                (!text.is_empty()).then(|| Answer {
                    answer: text.to_string(),
                    score: span.score,
                })
            });

        Ok(answer.unwrap_or_else(|| Answer {
            answer: NO_ANSWER.to_string(),
            score: 0.0,
        }))
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.tokenizer.get_vocab_size(true) == 0 {
            return Err(ModelError::Tokenizer("qa tokenizer is empty".to_string()));
        }
        require_inputs(&self.input_names, &["input_ids", "attention_mask"])
    }

    fn release_caches(&self) {
        self.shrink.request();
    }
}
