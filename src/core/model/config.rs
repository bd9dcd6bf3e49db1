use super::TokenId;
use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// `config.json` of a model bundle: prompt templates as raw token ids plus
/// the special token ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_version: u32,
    pub templates: PromptTemplates,
    pub special_tokens: SpecialTokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub caption: CaptionTemplates,
    #[serde(default)]
    pub query: Option<AffixTemplate>,
    #[serde(default)]
    pub detect: Option<AffixTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionTemplates {
    pub short: Vec<u32>,
    pub normal: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffixTemplate {
    pub prefix: Vec<u32>,
    pub suffix: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos: u32,
    pub eos: u32,
    #[serde(default)]
    pub coord: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionLength {
    Short,
    #[default]
    Normal,
}

impl FromStr for CaptionLength {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(CaptionLength::Short),
            "normal" => Ok(CaptionLength::Normal),
            other => Err(Error::asset(
                "caption length",
                format!("{:?} is neither \"short\" nor \"normal\"", other),
            )),
        }
    }
}

impl ModelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn caption_prompt(&self, length: CaptionLength) -> Vec<TokenId> {
        let ids = match length {
            CaptionLength::Short => &self.templates.caption.short,
            CaptionLength::Normal => &self.templates.caption.normal,
        };
        ids.iter().copied().map(TokenId).collect()
    }

    /// Wraps already-encoded question tokens in the query template.
    pub fn query_prompt(&self, question: &[TokenId]) -> Result<Vec<TokenId>> {
        let query = self
            .templates
            .query
            .as_ref()
            .ok_or_else(|| Error::asset("config.json", "model has no query template"))?;
        let mut ids: Vec<TokenId> = query.prefix.iter().copied().map(TokenId).collect();
        ids.extend_from_slice(question);
        ids.extend(query.suffix.iter().copied().map(TokenId));
        Ok(ids)
    }

    pub fn eos(&self) -> TokenId {
        TokenId(self.special_tokens.eos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "model_version": 2,
        "templates": {
            "caption": {"short": [1, 2, 3], "normal": [1, 4]},
            "query": {"prefix": [10, 11], "suffix": [12]},
            "detect": null
        },
        "special_tokens": {"bos": 0, "eos": 50256, "coord": 5, "size": 6}
    }"#;

    #[test]
    fn test_parse_config() {
        let config = ModelConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.model_version, 2);
        assert_eq!(config.eos(), TokenId(50256));
        assert_eq!(
            config.caption_prompt(CaptionLength::Short),
            vec![TokenId(1), TokenId(2), TokenId(3)]
        );
        assert!(config.templates.detect.is_none());
    }

    #[test]
    fn test_query_prompt_wraps_question() {
        let config = ModelConfig::from_json(CONFIG).unwrap();
        let ids = config.query_prompt(&[TokenId(7), TokenId(8)]).unwrap();
        assert_eq!(
            ids,
            vec![TokenId(10), TokenId(11), TokenId(7), TokenId(8), TokenId(12)]
        );
    }

    #[test]
    fn test_caption_length_from_str() {
        assert_eq!("Short".parse::<CaptionLength>().unwrap(), CaptionLength::Short);
        assert!("long".parse::<CaptionLength>().is_err());
    }
}
