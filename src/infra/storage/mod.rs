use crate::core::model::ModelConfig;
use crate::core::tokenizer::TokenizerConfig;
use crate::core::{Error, Result, Tensor};
use crate::infra::archive;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const INITIAL_KV_CACHE_FILE: &str = "initial_kv_cache.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// `initial_kv_cache.json`: flat row-major values plus their shape.
#[derive(Debug, Clone, Deserialize)]
pub struct KvCacheRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl KvCacheRecord {
    pub fn into_tensor(self) -> Result<Tensor> {
        if self.shape.len() != 6 {
            return Err(Error::asset(
                INITIAL_KV_CACHE_FILE,
                format!("expected a rank 6 shape, got {:?}", self.shape),
            ));
        }
        Tensor::new(self.data, self.shape)
    }
}

/// Everything besides the graphs that a model directory provides.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    pub dir: PathBuf,
    pub config: ModelConfig,
    pub initial_kv_cache: Tensor,
    pub tokenizer: TokenizerConfig,
}

fn read_asset(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    fs::read_to_string(&path).map_err(|e| Error::asset(name, format!("{}: {}", path.display(), e)))
}

/// Reads just `tokenizer.json`, for callers that do not need the rest.
pub fn read_tokenizer(dir: impl AsRef<Path>) -> Result<TokenizerConfig> {
    TokenizerConfig::from_json(&read_asset(dir.as_ref(), TOKENIZER_FILE)?)
}

impl ModelAssets {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config = ModelConfig::from_json(&read_asset(dir, CONFIG_FILE)?)?;
        let record: KvCacheRecord = serde_json::from_str(&read_asset(dir, INITIAL_KV_CACHE_FILE)?)?;
        let tokenizer = read_tokenizer(dir)?;
        tracing::debug!(
            "loaded assets from {} (model version {})",
            dir.display(),
            config.model_version
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            initial_kv_cache: record.into_tensor()?,
            tokenizer,
        })
    }

    /// Maps a model path to a directory. A file is taken to be a `MOON`
    /// archive, plain or gzipped, and is unpacked next to itself, once.
    pub fn resolve(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        if !path.exists() {
            return Err(Error::asset(
                path.display().to_string(),
                "model path does not exist",
            ));
        }
        let dest = archive::unpack_dir(path);
        if dest == path {
            return Err(Error::asset(
                path.display().to_string(),
                "archive needs a file extension to derive its unpack directory",
            ));
        }
        if !dest.join(CONFIG_FILE).exists() {
            archive::unpack(path, &dest)?;
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::archive::MoonWriter;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    const CONFIG: &str = r#"{
        "model_version": 1,
        "templates": {"caption": {"short": [1], "normal": [1, 2]}},
        "special_tokens": {"bos": 0, "eos": 3}
    }"#;
    const KV: &str = r#"{"shape": [1, 2, 1, 1, 2, 1], "data": [1, 2, 3, 4]}"#;
    const TOKENIZER: &str = r#"{
        "model": {"vocab": {"a": 0, "b": 1, "ab": 2, "<eos>": 3}, "merges": ["a b"]}
    }"#;

    fn write_bundle(dir: &Path) {
        fs::write(dir.join(CONFIG_FILE), CONFIG).unwrap();
        fs::write(dir.join(INITIAL_KV_CACHE_FILE), KV).unwrap();
        fs::write(dir.join(TOKENIZER_FILE), TOKENIZER).unwrap();
    }

    #[test]
    fn test_load_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let assets = ModelAssets::load(dir.path()).unwrap();
        assert_eq!(assets.config.special_tokens.eos, 3);
        assert_eq!(assets.initial_kv_cache.dims(), &[1, 2, 1, 1, 2, 1]);
        assert_eq!(assets.tokenizer.model.vocab.len(), 4);
    }

    #[test]
    fn test_missing_file_names_the_asset() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), CONFIG).unwrap();
        let err = ModelAssets::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Asset { ref name, .. } if name == INITIAL_KV_CACHE_FILE));
    }

    #[test]
    fn test_kv_record_must_be_rank_six() {
        let record = KvCacheRecord {
            shape: vec![2, 2],
            data: vec![0.0; 4],
        };
        assert!(matches!(record.into_tensor(), Err(Error::Asset { .. })));
    }

    fn archive_bytes() -> Vec<u8> {
        let mut writer = MoonWriter::new(Vec::new()).unwrap();
        writer.add(CONFIG_FILE, CONFIG.as_bytes()).unwrap();
        writer.add(INITIAL_KV_CACHE_FILE, KV.as_bytes()).unwrap();
        writer.add(TOKENIZER_FILE, TOKENIZER.as_bytes()).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_resolve_unpacks_archive_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("tiny.mf");
        fs::write(&archive_path, archive_bytes()).unwrap();

        let resolved = ModelAssets::resolve(&archive_path).unwrap();
        assert_eq!(resolved, dir.path().join("tiny"));
        assert!(ModelAssets::load(&resolved).is_ok());
        assert_eq!(ModelAssets::resolve(&resolved).unwrap(), resolved);
    }

    #[test]
    fn test_resolve_gzipped_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("tiny.mf.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&archive_path).unwrap(), Compression::default());
        std::io::Write::write_all(&mut encoder, &archive_bytes()).unwrap();
        encoder.finish().unwrap();

        let resolved = ModelAssets::resolve(&archive_path).unwrap();
        assert_eq!(resolved, dir.path().join("tiny"));
        assert_eq!(ModelAssets::load(&resolved).unwrap().config.special_tokens.eos, 3);
    }
}
