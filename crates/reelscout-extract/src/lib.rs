//! Mention extraction: turning discussion text into candidate titles.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reelscout_core::{MentionCandidate, TextUnit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod generative;
pub mod json_array;
pub mod pattern;
pub mod tagger;

pub use generative::{GenerativeConfig, GenerativeExtractor};
pub use json_array::extract_json_array;
pub use pattern::PatternExtractor;
pub use tagger::{classify, Classification};

pub const CRATE_NAME: &str = "reelscout-extract";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing required credential {0}")]
    MissingCredential(&'static str),
    #[error("credential is not a valid header value: {0}")]
    InvalidCredential(String),
    #[error("unknown extractor strategy {0:?} (expected generative or pattern)")]
    UnknownStrategy(String),
}

/// One strategy for finding title mentions in a slice of text units.
///
/// Failures inside a strategy degrade to fewer candidates; `extract` never errors.
#[async_trait]
pub trait MentionExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, units: &[TextUnit]) -> Vec<MentionCandidate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Generative,
    Pattern,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Generative => "generative",
            ExtractorKind::Pattern => "pattern",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generative" | "ai" | "llm" => Ok(ExtractorKind::Generative),
            "pattern" | "regex" => Ok(ExtractorKind::Pattern),
            other => Err(ExtractError::UnknownStrategy(other.to_string())),
        }
    }
}
