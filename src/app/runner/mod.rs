use crate::core::generation::{
    self, EncodedImage, GenerationOptions, GenerationOutput, Generator, INPUT_EMBEDS, KV_CACHE,
    NEW_KV_CACHE, OUTPUT,
};
use crate::core::model::traits::{run_graph, take_output};
use crate::core::model::{CaptionLength, GraphRole, InferenceEngine, ModelConfig, Sessions, TensorMap};
use crate::core::tensor::concatenate;
use crate::core::tokenizer::{BpeTokenizer, Tokenizer};
use crate::core::vision::{merge_patch_embeddings, preprocess, PixelGrid};
use crate::core::{Error, Result, Tensor, TokenId};
use crate::envconfig::RuntimeConfig;
use crate::infra::codec;
use crate::infra::storage::ModelAssets;
use std::path::Path;

const INPUT: &str = "input";

/// A loaded caption model. Immutable after loading; every method takes
/// `&self`.
pub struct Captioner {
    sessions: Sessions,
    tokenizer: BpeTokenizer,
    config: ModelConfig,
    initial_kv_cache: Tensor,
    runtime: RuntimeConfig,
}

impl Captioner {
    /// Loads with the runtime settings taken from `MOONDREAM_*` variables.
    pub fn load(model_path: impl AsRef<Path>, engine: &dyn InferenceEngine) -> Result<Self> {
        Self::load_with(model_path, engine, RuntimeConfig::from_env())
    }

    /// Loads from a model directory, or from a `MOON` archive which is
    /// unpacked beside itself first.
    pub fn load_with(
        model_path: impl AsRef<Path>,
        engine: &dyn InferenceEngine,
        runtime: RuntimeConfig,
    ) -> Result<Self> {
        let dir = ModelAssets::resolve(model_path)?;
        tracing::info!("loading model from {}", dir.display());
        let assets = ModelAssets::load(&dir)?;
        let sessions = Sessions::load(engine, &dir, &runtime.session)?;
        Self::from_parts(sessions, assets, runtime)
    }

    pub fn from_parts(sessions: Sessions, assets: ModelAssets, runtime: RuntimeConfig) -> Result<Self> {
        if assets.initial_kv_cache.rank() != 6 {
            return Err(Error::shape_mismatch(format!(
                "initial kv cache must have rank 6, got {:?}",
                assets.initial_kv_cache.dims()
            )));
        }
        let tokenizer = BpeTokenizer::from_config(&assets.tokenizer)?.with_policy(runtime.merge_policy);
        tracing::info!(
            "model ready: version {}, vocabulary of {} tokens, image prefix of {} positions",
            assets.config.model_version,
            tokenizer.vocab_size(),
            assets.initial_kv_cache.dims()[4]
        );
        Ok(Self {
            sessions,
            tokenizer,
            config: assets.config,
            initial_kv_cache: assets.initial_kv_cache,
            runtime,
        })
    }

    pub fn tokenizer(&self) -> &BpeTokenizer {
        &self.tokenizer
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// Decodes `bytes` and conditions a fresh KV cache on the image.
    pub fn encode_image(&self, bytes: &[u8]) -> Result<EncodedImage> {
        self.encode_pixels(&codec::decode(bytes)?)
    }

    pub fn encode_pixels(&self, pixels: &PixelGrid) -> Result<EncodedImage> {
        let image = preprocess(pixels, &self.runtime.preprocess)?;

        let mut out = run_graph(
            self.sessions.graph(GraphRole::VisionEncoder),
            TensorMap::from([(INPUT.to_string(), image.patches)]),
        )?;
        let patch_embeddings = take_output(&mut out, OUTPUT)?;

        let merged = merge_patch_embeddings(&patch_embeddings, image.template)?;
        let (seq_len, width) = (merged.dims()[0], merged.dims()[1]);
        let mut out = run_graph(
            self.sessions.graph(GraphRole::VisionProjection),
            TensorMap::from([(INPUT.to_string(), merged.reshape([1, seq_len, width])?)]),
        )?;
        let projected = take_output(&mut out, OUTPUT)?;

        let mut out = run_graph(
            self.sessions.graph(GraphRole::TextDecoder),
            TensorMap::from([
                (INPUT_EMBEDS.to_string(), projected),
                (KV_CACHE.to_string(), self.initial_kv_cache.clone()),
            ]),
        )?;
        let update = take_output(&mut out, NEW_KV_CACHE)?;
        if update.dims().get(4) != Some(&seq_len) {
            return Err(Error::shape_mismatch(format!(
                "image kv update {:?} does not span {} positions",
                update.dims(),
                seq_len
            )));
        }

        let kv_cache = concatenate(&[self.initial_kv_cache.clone(), update], 4)?;
        tracing::debug!(
            "encoded image with template {} into {} cache positions",
            image.template,
            kv_cache.dims()[4]
        );
        EncodedImage::new(kv_cache)
    }

    pub fn embed_tokens(&self, ids: &[TokenId]) -> Result<Tensor> {
        generation::embed_tokens(&self.sessions, ids)
    }

    fn generator(&self) -> Generator<'_> {
        Generator::new(&self.sessions, &self.tokenizer, self.runtime.generation.clone())
            .with_eos(self.config.eos())
    }

    pub fn generate(&self, prompt: Tensor, image: EncodedImage, max_tokens: usize) -> Result<String> {
        let output = self.generate_with(prompt, image, &GenerationOptions::new(max_tokens), |_, _| {})?;
        Ok(output.text)
    }

    pub fn generate_with(
        &self,
        prompt: Tensor,
        image: EncodedImage,
        options: &GenerationOptions,
        on_token: impl FnMut(TokenId, &str),
    ) -> Result<GenerationOutput> {
        self.generator().run(prompt, image, options, on_token)
    }

    pub fn caption(&self, bytes: &[u8], length: CaptionLength, max_tokens: usize) -> Result<String> {
        let output = self.caption_with(bytes, length, &GenerationOptions::new(max_tokens), |_, _| {})?;
        Ok(output.text)
    }

    /// Streaming [`Captioner::caption`]: `on_token` sees each piece of text
    /// as it is generated.
    pub fn caption_with(
        &self,
        bytes: &[u8],
        length: CaptionLength,
        options: &GenerationOptions,
        on_token: impl FnMut(TokenId, &str),
    ) -> Result<GenerationOutput> {
        let image = self.encode_image(bytes)?;
        let prompt = self.embed_tokens(&self.config.caption_prompt(length))?;
        let output = self.generate_with(prompt, image, options, on_token)?;
        tracing::info!("caption finished after {} steps ({:?})", output.steps, output.stop);
        Ok(output)
    }

    /// Answers `question` about the image using the query template.
    pub fn query(&self, bytes: &[u8], question: &str, max_tokens: usize) -> Result<String> {
        let image = self.encode_image(bytes)?;
        let question = self.tokenizer.encode(question)?;
        let prompt = self.embed_tokens(&self.config.query_prompt(&question)?)?;
        self.generate(prompt, image, max_tokens)
    }
}
