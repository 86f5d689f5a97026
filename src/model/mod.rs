pub mod capability;
pub mod decode;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod provisioner;
pub mod registry;

pub use capability::{Answer, GenerationParams, QuestionAnswering, TextCompletion};
pub use loader::ModelLoader;
pub use provisioner::{CapabilityStatus, ProvisionState, Provisioner};
pub use registry::ModelRegistry;
