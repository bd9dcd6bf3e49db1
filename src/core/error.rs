use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure is terminal for the request that raised it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid shape {shape:?}: every dimension must be positive")]
    InvalidShape { shape: Vec<usize> },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("index {index:?} out of range for shape {shape:?}")]
    Index { index: Vec<usize>, shape: Vec<usize> },

    #[error("token {0:?} not in vocabulary and no unknown token configured")]
    UnknownToken(String),

    /// Opaque failure raised by the inference engine, kept as-is.
    #[error("inference engine failure: {0:#}")]
    Engine(anyhow::Error),

    #[error("context window overflow: {needed} positions needed, capacity is {capacity}")]
    ContextOverflow { needed: usize, capacity: usize },

    #[error("generation cancelled")]
    Cancelled,

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid asset {name}: {reason}")]
    Asset { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Error::ShapeMismatch(msg.into())
    }

    pub fn asset(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Asset {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
