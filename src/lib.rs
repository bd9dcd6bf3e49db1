pub mod app;
pub mod core;
pub mod envconfig;
pub mod infra;
pub mod logging;

pub use app::Captioner;
pub use crate::core::{
    AxisRange, BpeTokenizer, CancelToken, DType, EncodedImage, Error, GenerationConfig,
    GenerationOptions, GenerationOutput, Graph, InferenceEngine, MergePolicy, PatchTemplate,
    PixelGrid, PreprocessConfig, Result, SessionOptions, Shape, Tensor, TensorMap, TensorOps,
    TokenId, Tokenizer,
};
pub use crate::core::model::CaptionLength;
pub use envconfig::{EnvConfig, RuntimeConfig};
