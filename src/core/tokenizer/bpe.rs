use super::traits::{MergePolicy, Tokenizer};
use super::{MergeTable, TokenizerConfig, Vocabulary};
use crate::core::{Error, Result, TokenId};
use once_cell::sync::Lazy;
use regex::Regex;

// Runs of ASCII word characters, or any single non-space non-word character.
static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+|[^\sA-Za-z0-9_]").unwrap());

const UNKNOWN_PLACEHOLDER: &str = "<unk>";

pub struct BpeTokenizer {
    vocab: Vocabulary,
    merges: MergeTable,
    policy: MergePolicy,
}

impl BpeTokenizer {
    pub fn new(vocab: Vocabulary, merges: MergeTable) -> Self {
        Self {
            vocab,
            merges,
            policy: MergePolicy::default(),
        }
    }

    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        Ok(Self::new(config.vocabulary()?, config.merge_table()?))
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn split_words(text: &str) -> impl Iterator<Item = &str> {
        WORD_PATTERN.find_iter(text).map(|m| m.as_str())
    }

    /// Splits `word` into characters and merges adjacent symbols under the
    /// configured policy until no pair matches.
    fn bpe(&self, word: &str) -> Vec<String> {
        let mut symbols: Vec<String> = word.chars().map(String::from).collect();
        while symbols.len() > 1 {
            let pick = match self.policy {
                MergePolicy::FirstMatch => self.first_match(&symbols),
                MergePolicy::LowestRank => self.lowest_rank(&symbols),
            };
            let Some(i) = pick else { break };
            let right = symbols.remove(i + 1);
            symbols[i].push_str(&right);
        }
        symbols
    }

    fn first_match(&self, symbols: &[String]) -> Option<usize> {
        let mut joined = String::new();
        symbols.windows(2).position(|pair| {
            joined.clear();
            joined.push_str(&pair[0]);
            joined.push_str(&pair[1]);
            self.merges.concat_rank(&joined).is_some()
        })
    }

    fn lowest_rank(&self, symbols: &[String]) -> Option<usize> {
        symbols
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| self.merges.rank(&pair[0], &pair[1]).map(|rank| (rank, i)))
            .min()
            .map(|(_, i)| i)
    }

    fn lookup(&self, symbol: &str) -> Result<TokenId> {
        self.vocab
            .id(symbol)
            .or_else(|| self.vocab.unk_id())
            .ok_or_else(|| Error::UnknownToken(symbol.to_string()))
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut ids = Vec::new();
        for word in Self::split_words(text) {
            for symbol in self.bpe(word) {
                ids.push(self.lookup(&symbol)?);
            }
        }
        Ok(ids)
    }

    fn decode(&self, tokens: &[TokenId]) -> String {
        tokens
            .iter()
            .map(|&id| {
                self.vocab
                    .token(id)
                    .or_else(|| self.vocab.unk_token())
                    .unwrap_or(UNKNOWN_PLACEHOLDER)
            })
            .collect()
    }

    fn vocab_size(&self) -> usize {
        self.vocab.size()
    }

    fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.vocab.id(token)
    }

    fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.vocab.token(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(tokens: &[&str], merges: &[(&str, &str)]) -> BpeTokenizer {
        let vocab = Vocabulary::new(tokens.iter().map(|t| t.to_string()).collect());
        let merges = MergeTable::new(
            merges
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        );
        BpeTokenizer::new(vocab, merges)
    }

    fn hello_tokenizer() -> BpeTokenizer {
        tokenizer(
            &["h", "e", "l", "o", "w", "r", "d", ",", "!", "he", "ll", "hell", "hello", "wo", "or"],
            &[("h", "e"), ("l", "l"), ("he", "ll"), ("hell", "o"), ("w", "o"), ("o", "r")],
        )
    }

    #[test]
    fn test_split_words_drops_whitespace() {
        let words: Vec<&str> = BpeTokenizer::split_words("Hi, there  you_2!").collect();
        assert_eq!(words, vec!["Hi", ",", "there", "you_2", "!"]);
    }

    #[test]
    fn test_encode_merges_words() {
        let t = hello_tokenizer();
        let ids = t.encode("hello").unwrap();
        assert_eq!(ids, vec![t.token_to_id("hello").unwrap()]);
    }

    #[test]
    fn test_round_trip_base_alphabet() {
        let t = hello_tokenizer();
        let text = "hello,world!";
        let ids = t.encode(text).unwrap();
        assert_eq!(t.decode(&ids), text);
    }

    #[test]
    fn test_unknown_token_without_fallback() {
        let t = hello_tokenizer();
        let err = t.encode("hex").unwrap_err();
        assert!(matches!(err, Error::UnknownToken(ref s) if s == "x"));
    }

    #[test]
    fn test_unknown_token_with_fallback() {
        let vocab = Vocabulary::new(vec!["<unk>".into(), "a".into()]).with_unk_token("<unk>");
        let t = BpeTokenizer::new(vocab, MergeTable::default());
        assert_eq!(t.encode("ab").unwrap(), vec![TokenId(1), TokenId(0)]);
    }

    #[test]
    fn test_decode_fallbacks() {
        let t = hello_tokenizer();
        assert_eq!(t.decode(&[TokenId(0), TokenId(999)]), "h<unk>");

        let vocab = Vocabulary::new(vec!["a".into()]).with_unk_token("[?]");
        let t = BpeTokenizer::new(vocab, MergeTable::default());
        assert_eq!(t.decode(&[TokenId(5), TokenId(0)]), "[?]a");
    }

    // Golden pairs: "abc" with merges [b c, a b] splits differently under
    // the two policies.
    #[test]
    fn test_first_match_vs_lowest_rank() {
        let t = tokenizer(&["a", "b", "c", "ab", "bc"], &[("b", "c"), ("a", "b")]);
        let first = t.encode("abc").unwrap();
        assert_eq!(first, vec![TokenId(3), TokenId(2)]);
        assert_eq!(t.decode(&first), "abc");

        let t = t.with_policy(MergePolicy::LowestRank);
        let lowest = t.encode("abc").unwrap();
        assert_eq!(lowest, vec![TokenId(0), TokenId(4)]);
        assert_eq!(t.decode(&lowest), "abc");
    }

    #[test]
    fn test_first_match_uses_concatenation() {
        // "ab" + "c" spells "abc", which the table knows as a + bc.
        let t = tokenizer(&["a", "b", "c", "ab", "abc"], &[("a", "b"), ("a", "bc")]);
        assert_eq!(t.encode("abc").unwrap(), vec![TokenId(4)]);

        let t = t.with_policy(MergePolicy::LowestRank);
        assert_eq!(t.encode("abc").unwrap(), vec![TokenId(3), TokenId(2)]);
    }
}
