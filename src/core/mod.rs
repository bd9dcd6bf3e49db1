pub mod cache;
pub mod error;
pub mod generation;
pub mod model;
pub mod tensor;
pub mod tokenizer;
pub mod vision;

pub use cache::{KVCache, KvCacheWindow};
pub use error::{Error, Result};
pub use generation::{
    CancelToken, EncodedImage, GenerationConfig, GenerationOptions, GenerationOutput, Generator,
    StopReason,
};
pub use model::{Graph, InferenceEngine, SessionOptions, TensorMap, TokenId};
pub use tensor::{AxisRange, DType, Shape, Tensor, TensorOps};
pub use tokenizer::{BpeTokenizer, MergePolicy, Tokenizer};
pub use vision::{PatchTemplate, PixelGrid, PreprocessConfig};
