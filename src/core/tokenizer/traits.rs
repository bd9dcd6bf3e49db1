use crate::core::{Result, TokenId};
use serde::{Deserialize, Serialize};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Never fails: unknown ids decode to the unknown token or `<unk>`.
    fn decode(&self, tokens: &[TokenId]) -> String;

    fn vocab_size(&self) -> usize;

    fn token_to_id(&self, token: &str) -> Option<TokenId>;
    fn id_to_token(&self, id: TokenId) -> Option<&str>;
}

/// How adjacent symbols are chosen for merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Merge the leftmost adjacent pair whose concatenation is in the table.
    #[default]
    FirstMatch,
    /// Merge the adjacent pair with the smallest rank (canonical BPE).
    LowestRank,
}
