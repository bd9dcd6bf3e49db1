pub mod traits;
pub mod bpe;

pub use traits::{MergePolicy, Tokenizer};
pub use bpe::BpeTokenizer;

use crate::core::{Error, Result, TokenId};
use serde::Deserialize;
use std::collections::HashMap;

/// Bidirectional token string <-> id mapping. Ids are dense and 0-based.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, TokenId>,
    unk_token: Option<String>,
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>) -> Self {
        let mut ids = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            ids.entry(token.clone()).or_insert(TokenId(i as u32));
        }
        Self {
            tokens,
            ids,
            unk_token: None,
        }
    }

    /// Builds a vocabulary from a `token -> id` map, rejecting gaps and
    /// duplicate ids.
    pub fn from_map(map: &HashMap<String, u32>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (token, &id) in map {
            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                Error::asset(
                    "tokenizer.json",
                    format!("id {} of {:?} leaves a gap in a vocabulary of {}", id, token, map.len()),
                )
            })?;
            if let Some(existing) = slot.replace(token.clone()) {
                return Err(Error::asset(
                    "tokenizer.json",
                    format!("id {} assigned to both {:?} and {:?}", id, existing, token),
                ));
            }
        }
        let tokens = slots.into_iter().flatten().collect();
        Ok(Self::new(tokens))
    }

    pub fn with_unk_token(mut self, token: impl Into<String>) -> Self {
        self.unk_token = Some(token.into());
        self
    }

    pub fn size(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.tokens.get(id.0 as usize).map(|s| s.as_str())
    }

    pub fn id(&self, token: &str) -> Option<TokenId> {
        self.ids.get(token).copied()
    }

    pub fn unk_token(&self) -> Option<&str> {
        self.unk_token.as_deref()
    }

    /// Id of the unknown token, when one is configured and present.
    pub fn unk_id(&self) -> Option<TokenId> {
        self.unk_token.as_deref().and_then(|t| self.id(t))
    }
}

/// Ordered merge list. A lower rank (earlier entry) means higher priority.
#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    pairs: Vec<(String, String)>,
    by_concat: HashMap<String, usize>,
    by_pair: HashMap<(String, String), usize>,
}

impl MergeTable {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        let mut by_concat = HashMap::with_capacity(pairs.len());
        let mut by_pair = HashMap::with_capacity(pairs.len());
        for (rank, (a, b)) in pairs.iter().enumerate() {
            by_concat.entry(format!("{}{}", a, b)).or_insert(rank);
            by_pair.entry((a.clone(), b.clone())).or_insert(rank);
        }
        Self {
            pairs,
            by_concat,
            by_pair,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Rank of the first merge whose concatenation spells `symbol`.
    pub fn concat_rank(&self, symbol: &str) -> Option<usize> {
        self.by_concat.get(symbol).copied()
    }

    pub fn rank(&self, left: &str, right: &str) -> Option<usize> {
        self.by_pair
            .get(&(left.to_string(), right.to_string()))
            .copied()
    }

    /// The two parts `symbol` expands back into.
    pub fn expansion(&self, symbol: &str) -> Option<(&str, &str)> {
        self.concat_rank(symbol)
            .map(|rank| (self.pairs[rank].0.as_str(), self.pairs[rank].1.as_str()))
    }
}

/// `tokenizer.json` as shipped in the model bundle. Only the fields the BPE
/// model reads are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub added_tokens: Vec<AddedToken>,
    pub model: BpeModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddedToken {
    pub id: u32,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BpeModelConfig {
    #[serde(default)]
    pub unk_token: Option<String>,
    pub vocab: HashMap<String, u32>,
    #[serde(default)]
    pub merges: Vec<MergeEntry>,
}

/// Merges appear either as `["a", "b"]` or as the older `"a b"` form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    Pair(String, String),
    Joined(String),
}

impl MergeEntry {
    fn into_pair(self) -> Result<(String, String)> {
        match self {
            MergeEntry::Pair(a, b) => Ok((a, b)),
            MergeEntry::Joined(s) => s
                .split_once(' ')
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .ok_or_else(|| Error::asset("tokenizer.json", format!("malformed merge {:?}", s))),
        }
    }
}

impl TokenizerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn vocabulary(&self) -> Result<Vocabulary> {
        let mut map = self.model.vocab.clone();
        for added in &self.added_tokens {
            map.entry(added.content.clone()).or_insert(added.id);
        }
        let vocab = Vocabulary::from_map(&map)?;
        Ok(match &self.model.unk_token {
            Some(unk) => vocab.with_unk_token(unk.clone()),
            None => vocab,
        })
    }

    pub fn merge_table(&self) -> Result<MergeTable> {
        let pairs = self
            .model
            .merges
            .iter()
            .cloned()
            .map(MergeEntry::into_pair)
            .collect::<Result<Vec<_>>>()?;
        Ok(MergeTable::new(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_from_map() {
        let map: HashMap<String, u32> = [("b", 1), ("a", 0), ("c", 2)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let vocab = Vocabulary::from_map(&map).unwrap();
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.token(TokenId(1)), Some("b"));
        assert_eq!(vocab.id("c"), Some(TokenId(2)));
        assert_eq!(vocab.unk_id(), None);
    }

    #[test]
    fn test_vocabulary_rejects_gaps() {
        let map: HashMap<String, u32> = [("a".to_string(), 0), ("b".to_string(), 5)].into();
        assert!(matches!(Vocabulary::from_map(&map), Err(Error::Asset { .. })));
    }

    #[test]
    fn test_merge_table_ranks() {
        let table = MergeTable::new(vec![
            ("h".into(), "e".into()),
            ("l".into(), "l".into()),
            ("he".into(), "ll".into()),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rank("l", "l"), Some(1));
        assert_eq!(table.concat_rank("hell"), Some(2));
        assert_eq!(table.expansion("hell"), Some(("he", "ll")));
        assert_eq!(table.rank("e", "l"), None);
    }

    #[test]
    fn test_config_accepts_both_merge_forms() {
        let json = r#"{
            "added_tokens": [{"id": 3, "content": "<|endoftext|>", "special": true}],
            "model": {
                "unk_token": null,
                "vocab": {"a": 0, "b": 1, "ab": 2},
                "merges": [["a", "b"], "ab b"]
            }
        }"#;
        let config = TokenizerConfig::from_json(json).unwrap();
        let vocab = config.vocabulary().unwrap();
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.id("<|endoftext|>"), Some(TokenId(3)));
        let merges = config.merge_table().unwrap();
        assert_eq!(merges.rank("a", "b"), Some(0));
        assert_eq!(merges.rank("ab", "b"), Some(1));
    }
}
