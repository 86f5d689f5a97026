//! Validation and routing of predict requests.
//!
//! Checks run in a fixed order and stop at the first failure:
//! body and `task_type`, known task, task fields, then model readiness.
//! No capability is touched until all of them pass.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::{LimitsConfig, TaskType};
use crate::error::{ApiError, ModelError};
use crate::model::capability::{GenerationParams, QuestionAnswering, TextCompletion};
use crate::model::provisioner::Provisioner;
use crate::preprocessing::text::bound_input;
use crate::server::types::PredictRequest;

pub const TASK_TYPE_REQUIRED: &str = "task_type required";
pub const INVALID_TASK_TYPE: &str = "invalid task type";

/// Parses a raw request body. Covers everything except model readiness.
pub fn parse_request(body: &[u8]) -> Result<PredictRequest, ApiError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::validation(TASK_TYPE_REQUIRED))?;
    let fields = value
        .as_object()
        .ok_or_else(|| ApiError::validation(TASK_TYPE_REQUIRED))?;

    let task_type = fields
        .get("task_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::validation(TASK_TYPE_REQUIRED))?;
    let task: TaskType = task_type
        .parse()
        .map_err(|_| ApiError::validation(INVALID_TASK_TYPE))?;

    match task {
        TaskType::Completion => {
            let [text] = required_fields(fields, ["text"], task)?;
            Ok(PredictRequest::Completion {
                text,
                max_length: max_length(fields)?,
            })
        }
        TaskType::Qa => {
            let [context, question] = required_fields(fields, ["context", "question"], task)?;
            Ok(PredictRequest::Qa { context, question })
        }
    }
}

fn required_fields<const N: usize>(
    fields: &Map<String, Value>,
    names: [&str; N],
    task: TaskType,
) -> Result<[String; N], ApiError> {
    let missing: Vec<String> = names
        .iter()
        .filter(|name| fields.get(**name).map_or(true, Value::is_null))
        .map(|name| format!("'{name}'"))
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::validation(format!(
            "missing {} for {task}",
            missing.join(", ")
        )));
    }

    let mut values = Vec::with_capacity(N);
    for name in names {
        match fields.get(name).and_then(Value::as_str) {
            Some(s) => values.push(s.to_string()),
            None => return Err(ApiError::validation(format!("'{name}' must be a string"))),
        }
    }
    values
        .try_into()
        .map_err(|_| ApiError::validation(format!("missing fields for {task}")))
}

fn max_length(fields: &Map<String, Value>) -> Result<Option<usize>, ApiError> {
    match fields.get("max_length") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|&n| n > 0)
            .map(|n| Some(usize::try_from(n).unwrap_or(usize::MAX)))
            .ok_or_else(|| ApiError::validation("max_length must be a positive integer")),
    }
}

/// A validated request bound to the capability that will serve it.
pub enum RoutedCall {
    Completion {
        model: Arc<dyn TextCompletion>,
        prompt: String,
        params: GenerationParams,
    },
    Qa {
        model: Arc<dyn QuestionAnswering>,
        question: String,
        context: String,
    },
}

impl RoutedCall {
    pub fn task_type(&self) -> TaskType {
        match self {
            RoutedCall::Completion { .. } => TaskType::Completion,
            RoutedCall::Qa { .. } => TaskType::Qa,
        }
    }

    /// Runs the inference. Blocking.
    pub fn execute(self) -> Result<String, ModelError> {
        match self {
            RoutedCall::Completion {
                model,
                prompt,
                params,
            } => model.generate(&prompt, &params),
            RoutedCall::Qa {
                model,
                question,
                context,
            } => model.answer(&question, &context).map(|a| {
                debug!(score = a.score, "Answer span selected");
                a.answer
            }),
        }
    }
}

/// Binds a parsed request to a loaded capability, bounding its input.
pub fn route(
    request: PredictRequest,
    provisioner: &Provisioner,
    limits: &LimitsConfig,
) -> Result<RoutedCall, ApiError> {
    let task = match &request {
        PredictRequest::Completion { .. } => TaskType::Completion,
        PredictRequest::Qa { .. } => TaskType::Qa,
    };
    let models = provisioner.models().ok_or(ApiError::Unavailable(task))?;

    let bound = |field: &str, text: String| {
        let (text, truncated) =
            bound_input(text, limits.max_input_chars, &limits.truncation_marker);
        if truncated {
            debug!(field, max_chars = limits.max_input_chars, "Truncated oversized input");
        }
        text
    };

    Ok(match request {
        PredictRequest::Completion { text, max_length } => RoutedCall::Completion {
            model: Arc::clone(&models.completion),
            prompt: bound("text", text),
            params: GenerationParams {
                max_new_tokens: max_length
                    .unwrap_or(limits.default_max_length)
                    .min(limits.max_length_ceiling),
            },
        },
        PredictRequest::Qa { context, question } => RoutedCall::Qa {
            model: Arc::clone(&models.qa),
            question,
            context: bound("context", context),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedStats, MockLoader};
    use std::sync::atomic::Ordering;

    fn message(result: Result<PredictRequest, ApiError>) -> String {
        match result {
            Err(ApiError::Validation(msg)) => msg,
            Err(other) => panic!("Expected validation error, got {other}"),
            Ok(request) => panic!("Expected validation error, got {request:?}"),
        }
    }

    #[test]
    fn test_missing_or_unparseable_task_type() {
        assert_eq!(message(parse_request(b"")), TASK_TYPE_REQUIRED);
        assert_eq!(message(parse_request(b"not json")), TASK_TYPE_REQUIRED);
        assert_eq!(message(parse_request(b"[1, 2]")), TASK_TYPE_REQUIRED);
        assert_eq!(message(parse_request(br#"{"text": "hi"}"#)), TASK_TYPE_REQUIRED);
        assert_eq!(message(parse_request(br#"{"task_type": 3}"#)), TASK_TYPE_REQUIRED);
    }

    #[test]
    fn test_unknown_task_type() {
        assert_eq!(
            message(parse_request(br#"{"task_type": "summarize", "text": "hi"}"#)),
            INVALID_TASK_TYPE
        );
    }

    #[test]
    fn test_unknown_task_type_is_reported_before_missing_fields() {
        assert_eq!(
            message(parse_request(br#"{"task_type": "translate"}"#)),
            INVALID_TASK_TYPE
        );
    }

    #[test]
    fn test_completion_requires_text() {
        assert_eq!(
            message(parse_request(br#"{"task_type": "completion"}"#)),
            "missing 'text' for completion"
        );
        assert_eq!(
            message(parse_request(br#"{"task_type": "completion", "text": null}"#)),
            "missing 'text' for completion"
        );
        assert_eq!(
            message(parse_request(br#"{"task_type": "completion", "text": 42}"#)),
            "'text' must be a string"
        );
    }

    #[test]
    fn test_qa_names_each_missing_field() {
        assert_eq!(
            message(parse_request(br#"{"task_type": "qa", "question": "why?"}"#)),
            "missing 'context' for qa"
        );
        assert_eq!(
            message(parse_request(br#"{"task_type": "qa", "context": "because"}"#)),
            "missing 'question' for qa"
        );
        assert_eq!(
            message(parse_request(br#"{"task_type": "qa"}"#)),
            "missing 'context', 'question' for qa"
        );
    }

    #[test]
    fn test_max_length_must_be_positive() {
        for body in [
            br#"{"task_type": "completion", "text": "a", "max_length": 0}"#.as_slice(),
            br#"{"task_type": "completion", "text": "a", "max_length": -4}"#.as_slice(),
            br#"{"task_type": "completion", "text": "a", "max_length": "ten"}"#.as_slice(),
        ] {
            assert_eq!(
                message(parse_request(body)),
                "max_length must be a positive integer"
            );
        }
    }

    #[test]
    fn test_valid_requests_parse() {
        assert_eq!(
            parse_request(br#"{"task_type": "completion", "text": "Once", "max_length": 20}"#)
                .unwrap(),
            PredictRequest::Completion {
                text: "Once".to_string(),
                max_length: Some(20),
            }
        );
        assert_eq!(
            parse_request(br#"{"task_type": "qa", "context": "Paris is in France.", "question": "Where is Paris?"}"#)
                .unwrap(),
            PredictRequest::Qa {
                context: "Paris is in France.".to_string(),
                question: "Where is Paris?".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_route_requires_loaded_models() {
        let loader = Arc::new(MockLoader::failing("no weights"));
        let provisioner = Provisioner::new(loader.clone(), Arc::new(FixedStats::new(10.0)));
        let _ = provisioner.initialize().await;

        let request = PredictRequest::Qa {
            context: "c".to_string(),
            question: "q".to_string(),
        };
        match route(request, &provisioner, &LimitsConfig::default()) {
            Err(ApiError::Unavailable(TaskType::Qa)) => {}
            Err(other) => panic!("Expected Unavailable, got {other}"),
            Ok(_) => panic!("Expected Unavailable"),
        }
    }

    #[tokio::test]
    async fn test_route_truncates_and_clamps() {
        let loader = Arc::new(MockLoader::new());
        let provisioner = Provisioner::new(loader.clone(), Arc::new(FixedStats::new(10.0)));
        provisioner.initialize().await.unwrap();
        let limits = LimitsConfig::default();

        let request = PredictRequest::Completion {
            text: "x".repeat(limits.max_input_chars + 50),
            max_length: Some(10_000),
        };
        let call = route(request, &provisioner, &limits).unwrap();
        assert_eq!(call.task_type(), TaskType::Completion);
        call.execute().unwrap();

        let (prompt, params) = loader.completion.last_call.lock().unwrap().clone().unwrap();
        assert_eq!(prompt, format!("{}...", "x".repeat(limits.max_input_chars)));
        assert_eq!(params.max_new_tokens, limits.max_length_ceiling);
        assert_eq!(loader.qa.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_route_uses_default_max_length() {
        let loader = Arc::new(MockLoader::new());
        let provisioner = Provisioner::new(loader.clone(), Arc::new(FixedStats::new(10.0)));
        provisioner.initialize().await.unwrap();

        let request = PredictRequest::Completion {
            text: "Hello".to_string(),
            max_length: None,
        };
        let output = route(request, &provisioner, &LimitsConfig::default())
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(output, "Hello and then some");

        let (_, params) = loader.completion.last_call.lock().unwrap().clone().unwrap();
        assert_eq!(params.max_new_tokens, 50);
    }

    #[tokio::test]
    async fn test_route_truncates_context_but_not_question() {
        let loader = Arc::new(MockLoader::new());
        let provisioner = Provisioner::new(loader.clone(), Arc::new(FixedStats::new(10.0)));
        provisioner.initialize().await.unwrap();
        let limits = LimitsConfig {
            max_input_chars: 8,
            ..LimitsConfig::default()
        };

        let request = PredictRequest::Qa {
            context: "Rust is a systems language".to_string(),
            question: "What kind of language is Rust?".to_string(),
        };
        let answer = route(request, &provisioner, &limits).unwrap().execute().unwrap();
        assert_eq!(answer, "Rust");

        let (question, context) = loader.qa.last_call.lock().unwrap().clone().unwrap();
        assert_eq!(question, "What kind of language is Rust?");
        assert_eq!(context, "Rust is ...");
    }
}
