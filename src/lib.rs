pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod monitor;
pub mod preprocessing;
pub mod server;

#[cfg(test)]
mod testing;

// Re-export common types
pub use config::{AppConfig, TaskType};
pub use error::{ApiError, ModelError};
