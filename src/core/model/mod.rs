pub mod traits;
pub mod config;
pub mod registry;

pub use traits::{Graph, GraphOptimizationLevel, InferenceEngine, SessionOptions, TensorMap};
pub use config::{CaptionLength, ModelConfig, PromptTemplates, SpecialTokens};
pub use registry::{GraphRole, Sessions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u32);

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TokenId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
