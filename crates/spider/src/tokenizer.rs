//! Question tokenizers.
//!
//! A closed set of variants sharing one interface: `tokenize`, `detokenize`
//! and `token_to_id`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("failed to load subword tokenizer from {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("subword tokenizer failed: {0}")]
    Subword(String),

    #[error("token '{0}' is not in the vocabulary")]
    UnknownToken(String),
}

fn default_langs() -> Vec<String> {
    vec!["en".to_string()]
}

/// Tokenizer registry, selected by `type` in the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenizerConfig {
    /// Word-level splitting. The first language decides how tokens rejoin.
    Word {
        #[serde(default = "default_langs")]
        langs: Vec<String>,
    },
    /// Subword tokenizer from a Hugging Face `tokenizer.json`.
    Subword { path: PathBuf },
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self::Word {
            langs: default_langs(),
        }
    }
}

pub enum QuestionTokenizer {
    Word { langs: Vec<String> },
    Subword(Box<tokenizers::Tokenizer>),
}

impl std::fmt::Debug for QuestionTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word { langs } => f.debug_struct("Word").field("langs", langs).finish(),
            Self::Subword(_) => f.write_str("Subword"),
        }
    }
}

/// Scripts written without spaces between words.
fn is_unspaced_script(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3000}'..='\u{303F}' // CJK punctuation
        | '\u{FF00}'..='\u{FFEF}')
}

impl QuestionTokenizer {
    pub fn from_config(config: &TokenizerConfig) -> Result<Self, TokenizerError> {
        match config {
            TokenizerConfig::Word { langs } => Ok(Self::Word {
                langs: langs.clone(),
            }),
            TokenizerConfig::Subword { path } => {
                let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
                    TokenizerError::Load {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                })?;
                tracing::info!(path = %path.display(), "Loaded subword tokenizer");
                Ok(Self::Subword(Box::new(inner)))
            }
        }
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<String>, TokenizerError> {
        match self {
            Self::Word { .. } => Ok(split_words(text)),
            Self::Subword(inner) => {
                let encoding = inner
                    .encode(text, false)
                    .map_err(|e| TokenizerError::Subword(e.to_string()))?;
                Ok(encoding.get_tokens().to_vec())
            }
        }
    }

    pub fn detokenize(&self, tokens: &[String]) -> Result<String, TokenizerError> {
        match self {
            Self::Word { langs } => {
                let unspaced = langs
                    .first()
                    .is_some_and(|l| matches!(l.as_str(), "zh" | "ja"));
                Ok(tokens.join(if unspaced { "" } else { " " }))
            }
            Self::Subword(inner) => {
                let ids = tokens
                    .iter()
                    .map(|t| {
                        inner
                            .token_to_id(t)
                            .ok_or_else(|| TokenizerError::UnknownToken(t.clone()))
                    })
                    .collect::<Result<Vec<u32>, _>>()?;
                inner
                    .decode(&ids, true)
                    .map_err(|e| TokenizerError::Subword(e.to_string()))
            }
        }
    }

    /// Vocabulary id; word-level tokenization has no vocabulary.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        match self {
            Self::Word { .. } => None,
            Self::Subword(inner) => inner.token_to_id(token),
        }
    }
}

/// Split on whitespace, detach punctuation, and make every character of an
/// unspaced script its own token.
fn split_words(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if (c.is_alphanumeric() && !is_unspaced_script(c)) || c == '_' {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
