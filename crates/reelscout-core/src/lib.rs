//! Core domain model and provenance types for reelscout.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "reelscout-core";

/// Top-level discussion post as returned by the community listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionThread {
    pub id: String,
    pub title: String,
    pub body: String,
    pub community: String,
    pub score: i64,
    pub reply_count: u32,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionReply {
    pub id: String,
    pub body: String,
    pub score: i64,
    pub author: String,
    pub thread_id: String,
}

/// Provenance pointer carried from the text a mention was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MentionSource {
    pub community: String,
    pub thread_id: String,
    pub thread_title: String,
}

impl MentionSource {
    pub fn for_thread(thread: &DiscussionThread) -> Self {
        Self {
            community: thread.community.clone(),
            thread_id: thread.id.clone(),
            thread_title: thread.title.clone(),
        }
    }
}

/// One fragment of text handed to an extractor, with the score it contributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub text: String,
    pub score: i64,
    pub source: MentionSource,
}

impl TextUnit {
    pub fn from_thread(thread: &DiscussionThread) -> Self {
        let body = thread.body.trim();
        let text = if body.is_empty() {
            thread.title.trim().to_string()
        } else {
            format!("{}\n\n{}", thread.title.trim(), body)
        };
        Self {
            text,
            score: thread.score,
            source: MentionSource::for_thread(thread),
        }
    }

    pub fn from_reply(reply: &DiscussionReply, thread: &DiscussionThread) -> Self {
        Self {
            text: reply.body.trim().to_string(),
            score: reply.score,
            source: MentionSource::for_thread(thread),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Positive is sticky: once either side is positive the combination stays positive.
    pub fn combine(self, other: Sentiment) -> Sentiment {
        if self == Sentiment::Positive || other == Sentiment::Positive {
            Sentiment::Positive
        } else {
            self
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Movie,
    Series,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "series" | "tv" => Ok(MediaKind::Series),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Unvalidated extracted title, alive only for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionCandidate {
    pub title: String,
    pub year: Option<i32>,
    pub context: String,
    pub score: i64,
    pub sentiment: Sentiment,
    pub genres: BTreeSet<String>,
    pub source: MentionSource,
}

/// Aggregation key: lowercased and trimmed title.
pub fn normalize_title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Running totals for one normalized title within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedMention {
    pub key: String,
    pub title: String,
    pub year: Option<i32>,
    pub mention_count: u32,
    pub total_score: i64,
    pub sentiment: Sentiment,
    pub genres: BTreeSet<String>,
    pub source: MentionSource,
}

impl AggregatedMention {
    pub fn rank_score(&self) -> i64 {
        i64::from(self.mention_count).saturating_mul(self.total_score)
    }
}

/// Catalog resolution for a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub catalog_id: i64,
    pub media_kind: MediaKind,
}

/// Persisted recommendation; `title` is the business key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub title: String,
    pub catalog_id: Option<i64>,
    pub media_kind: MediaKind,
    pub community: String,
    pub thread_id: String,
    pub thread_title: String,
    pub mention_count: i64,
    pub total_score: i64,
    pub sentiment: Sentiment,
    pub genres: Vec<String>,
    pub scraped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn from_mention(
        mention: &AggregatedMention,
        catalog: Option<CatalogMatch>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: mention.title.trim().to_string(),
            catalog_id: catalog.map(|c| c.catalog_id),
            media_kind: catalog.map(|c| c.media_kind).unwrap_or_default(),
            community: mention.source.community.clone(),
            thread_id: mention.source.thread_id.clone(),
            thread_title: mention.source.thread_title.clone(),
            mention_count: i64::from(mention.mention_count),
            total_score: mention.total_score,
            sentiment: mention.sentiment,
            genres: mention.genres.iter().cloned().collect(),
            scraped_at: now,
            updated_at: now,
        }
    }
}

/// Singleton record per run kind, used by the cache gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_kind: String,
    pub last_run_at: DateTime<Utc>,
    pub fingerprint: String,
}
