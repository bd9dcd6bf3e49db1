use crate::core::cache::{KVCache, KvCacheWindow};
use crate::core::model::traits::{run_graph, take_output};
use crate::core::model::{GraphRole, Sessions, TensorMap};
use crate::core::tensor::{DType, TensorOps};
use crate::core::tokenizer::Tokenizer;
use crate::core::{Error, Result, Tensor, TokenId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const INPUT_EMBEDS: &str = "input_embeds";
pub const KV_CACHE: &str = "kv_cache";
pub const LOGITS: &str = "logits";
pub const NEW_KV_CACHE: &str = "new_kv_cache";
pub const INPUT_IDS: &str = "input_ids";
pub const OUTPUT: &str = "output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Positions the KV window holds, image prefix included.
    pub max_context: usize,
    pub stop_on_eos: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_context: 2048,
            stop_on_eos: true,
        }
    }
}

/// Cooperative cancellation flag, checked once per decode iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: usize,
    pub cancel: Option<CancelToken>,
}

impl GenerationOptions {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Image-conditioned KV cache, `(layers, 2, batch, heads, seq, head_dim)`.
///
/// Consumed by exactly one generation.
#[derive(Debug)]
pub struct EncodedImage {
    kv_cache: Tensor,
}

impl EncodedImage {
    pub fn new(kv_cache: Tensor) -> Result<Self> {
        if kv_cache.rank() != 6 {
            return Err(Error::shape_mismatch(format!(
                "encoded image cache must have rank 6, got {:?}",
                kv_cache.dims()
            )));
        }
        Ok(Self { kv_cache })
    }

    pub fn kv_cache(&self) -> &Tensor {
        &self.kv_cache
    }

    pub fn seq_len(&self) -> usize {
        self.kv_cache.dims()[4]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxTokens,
    EndOfSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Seeded,
    Decoding { step: usize },
    Done(StopReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub tokens: Vec<TokenId>,
    /// Live cache length when the loop ended.
    pub kv_len: usize,
    /// Cache length contributed by the image before any decoding.
    pub prefix_len: usize,
    /// Decoder invocations.
    pub steps: usize,
    pub stop: StopReason,
}

/// Runs the text encoder on `ids`, returning `(1, n, E)` embeddings.
pub fn embed_tokens(sessions: &Sessions, ids: &[TokenId]) -> Result<Tensor> {
    let values = ids.iter().map(|id| id.0 as f32).collect();
    let input = Tensor::new(values, [1, ids.len()])?.with_dtype(DType::I64);
    let mut outputs = run_graph(
        sessions.graph(GraphRole::TextEncoder),
        TensorMap::from([(INPUT_IDS.to_string(), input)]),
    )?;
    take_output(&mut outputs, OUTPUT)
}

/// Greedy decoder over a KV window seeded with an encoded image.
pub struct Generator<'a> {
    sessions: &'a Sessions,
    tokenizer: &'a dyn Tokenizer,
    config: GenerationConfig,
    eos: Option<TokenId>,
}

impl<'a> Generator<'a> {
    pub fn new(sessions: &'a Sessions, tokenizer: &'a dyn Tokenizer, config: GenerationConfig) -> Self {
        Self {
            sessions,
            tokenizer,
            config,
            eos: None,
        }
    }

    pub fn with_eos(mut self, eos: TokenId) -> Self {
        self.eos = Some(eos);
        self
    }

    fn decode_step(&self, input: Tensor, window: &mut KvCacheWindow) -> Result<TokenId> {
        let n = input.dims()[1];
        let inputs = TensorMap::from([
            (INPUT_EMBEDS.to_string(), input),
            (KV_CACHE.to_string(), window.live()?),
        ]);
        let mut outputs = run_graph(self.sessions.graph(GraphRole::TextDecoder), inputs)?;
        let logits = take_output(&mut outputs, LOGITS)?;
        let update = take_output(&mut outputs, NEW_KV_CACHE)?;

        let span = update.dims().get(window.seq_axis()).copied();
        if span != Some(n) {
            return Err(Error::shape_mismatch(format!(
                "decoder returned a kv update of {:?} for {} input positions",
                update.dims(),
                n
            )));
        }
        window.extend(&update)?;
        Ok(TokenId(logits.argmax_last()? as u32))
    }

    /// Decodes up to `options.max_tokens` tokens after `prompt`, calling
    /// `on_token` with each token and its text as soon as it is chosen.
    pub fn run(
        &self,
        prompt: Tensor,
        image: EncodedImage,
        options: &GenerationOptions,
        mut on_token: impl FnMut(TokenId, &str),
    ) -> Result<GenerationOutput> {
        if prompt.rank() != 3 || prompt.dims()[0] != 1 {
            return Err(Error::shape_mismatch(format!(
                "prompt embeddings must be (1, n, E), got {:?}",
                prompt.dims()
            )));
        }
        let mut window = KvCacheWindow::from_prefix(image.kv_cache(), self.config.max_context)?;
        drop(image);
        let prefix_len = window.len();

        let mut state = GenerationState::Seeded;
        tracing::debug!(?state, prefix_len, max_tokens = options.max_tokens, "generation seeded");

        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut steps = 0;
        let mut input = prompt;

        let stop = if options.max_tokens == 0 {
            StopReason::MaxTokens
        } else {
            loop {
                if options.is_cancelled() {
                    tracing::debug!(steps, "generation cancelled");
                    return Err(Error::Cancelled);
                }
                state = GenerationState::Decoding { step: steps };
                let token = self.decode_step(input, &mut window)?;
                steps += 1;
                tracing::debug!(?state, token = token.0, kv_len = window.len(), "decoded");

                if self.config.stop_on_eos && Some(token) == self.eos {
                    break StopReason::EndOfSequence;
                }
                let piece = self.tokenizer.decode(&[token]);
                text.push_str(&piece);
                tokens.push(token);
                on_token(token, &piece);

                if tokens.len() >= options.max_tokens {
                    break StopReason::MaxTokens;
                }
                input = embed_tokens(self.sessions, &[token])?;
            }
        };

        state = GenerationState::Done(stop);
        tracing::debug!(?state, steps, kv_len = window.len(), "generation finished");

        Ok(GenerationOutput {
            text,
            tokens,
            kv_len: window.len(),
            prefix_len,
            steps,
            stop,
        })
    }
}
