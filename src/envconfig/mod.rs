use crate::core::generation::GenerationConfig;
use crate::core::model::SessionOptions;
use crate::core::tokenizer::MergePolicy;
use crate::core::vision::PreprocessConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub struct EnvConfig {
    pub models_dir: PathBuf,
    pub max_context: usize,
    pub max_image_size: Option<u32>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Unparsable
    /// values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            models_dir: expand_home(
                &lookup("MOONDREAM_MODELS").unwrap_or_else(|| "~/.moondream/models".to_string()),
            ),
            max_context: lookup("MOONDREAM_MAX_CONTEXT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| GenerationConfig::default().max_context),
            max_image_size: lookup("MOONDREAM_MAX_IMAGE_SIZE").and_then(|v| v.parse().ok()),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn models_dir() -> PathBuf {
    EnvConfig::from_env().models_dir
}

/// Knobs for one loaded captioner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub preprocess: PreprocessConfig,
    pub generation: GenerationConfig,
    pub session: SessionOptions,
    pub merge_policy: MergePolicy,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_env_config(&EnvConfig::from_env())
    }

    pub fn from_env_config(env: &EnvConfig) -> Self {
        let mut config = Self::default();
        config.preprocess.max_image_size = env.max_image_size;
        config.generation.max_context = env.max_context;
        config
    }

    pub fn from_json(json: &str) -> crate::core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
