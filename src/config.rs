use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub limits: LimitsConfig,
    pub rate_limits: RateLimitConfig,
    pub health: HealthConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ModelsConfig {
    /// Threads ONNX Runtime may use inside a single operator.
    pub intra_threads: usize,
    pub completion: ModelConfig,
    pub qa: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            completion: ModelConfig {
                name: "gpt2".to_string(),
                path: PathBuf::from("models/gpt2/model.onnx"),
                tokenizer_path: PathBuf::from("models/gpt2/tokenizer.json"),
            },
            qa: ModelConfig {
                name: "distilbert-base-cased-distilled-squad".to_string(),
                path: PathBuf::from("models/distilbert-squad/model.onnx"),
                tokenizer_path: PathBuf::from("models/distilbert-squad/tokenizer.json"),
            },
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ModelConfig {
    pub name: String,
    pub path: PathBuf,
    pub tokenizer_path: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LimitsConfig {
    /// Character ceiling for `text` and `context` before truncation kicks in.
    pub max_input_chars: usize,
    pub truncation_marker: String,
    pub default_max_length: usize,
    pub max_length_ceiling: usize,
    pub memory_high_water_percent: f32,
    pub max_concurrent_inferences: usize,
    pub inference_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 1000,
            truncation_marker: "...".to_string(),
            default_max_length: 50,
            max_length_ceiling: 200,
            memory_high_water_percent: 90.0,
            max_concurrent_inferences: 4,
            inference_timeout_secs: 120,
        }
    }
}

impl LimitsConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RateLimitConfig {
    pub predict: Vec<RateWindow>,
    pub reload: Vec<RateWindow>,
    /// How often idle client entries are swept out of the limiter.
    pub prune_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            predict: vec![
                RateWindow::new(5, Duration::from_secs(60)),
                RateWindow::new(50, Duration::from_secs(3600)),
                RateWindow::new(200, Duration::from_secs(86_400)),
            ],
            reload: vec![
                RateWindow::new(2, Duration::from_secs(3600)),
                RateWindow::new(5, Duration::from_secs(86_400)),
            ],
            prune_interval_secs: 300,
        }
    }
}

/// A request ceiling over a fixed window, written as `"N per unit"`.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct RateWindow {
    pub limit: u32,
    pub period: Duration,
}

impl RateWindow {
    pub const fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }
}

impl FromStr for RateWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(count), Some("per"), Some(unit), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("invalid rate limit '{s}', expected 'N per unit'"));
        };

        let limit: u32 = count
            .parse()
            .map_err(|_| format!("invalid request count in rate limit '{s}'"))?;
        if limit == 0 {
            return Err(format!("rate limit '{s}' must allow at least one request"));
        }

        let secs = match unit.trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86_400,
            other => return Err(format!("unknown rate limit unit '{other}'")),
        };

        Ok(Self::new(limit, Duration::from_secs(secs)))
    }
}

impl TryFrom<String> for RateWindow {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            86_400 => "day",
            secs => return write!(f, "{} per {} seconds", self.limit, secs),
        };
        write!(f, "{} per {}", self.limit, unit)
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMode {
    /// Inspect loaded sessions and tokenizers without running them.
    #[default]
    Structural,
    /// Run both pipelines on canned inputs.
    Inference,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct HealthConfig {
    pub check: HealthCheckMode,
}

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Completion,
    Qa,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Completion => "completion",
            TaskType::Qa => "qa",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(TaskType::Completion),
            "qa" => Ok(TaskType::Qa),
            _ => Err(()),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }
}
