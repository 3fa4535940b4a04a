//! Batch title extraction through a chat-completion endpoint.

use std::collections::HashSet;

use async_trait::async_trait;
use reelscout_core::{normalize_title_key, MentionCandidate, Sentiment, TextUnit};
use reelscout_fetch::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reelscout_fetch::RateLimitedFetcher;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::json_array::extract_json_array;
use crate::{tagger, ExtractError, MentionExtractor};

/// Characters of each fragment sent to the model.
const MAX_FRAGMENT_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct GenerativeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub batch_size: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerativeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: api_key.into(),
            model: "llama-3.1-8b-instant".to_string(),
            batch_size: 50,
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

pub struct GenerativeExtractor {
    fetcher: RateLimitedFetcher,
    config: GenerativeConfig,
    headers: HeaderMap,
}

impl GenerativeExtractor {
    pub fn new(fetcher: RateLimitedFetcher, config: GenerativeConfig) -> Result<Self, ExtractError> {
        let key = config.api_key.trim();
        if key.is_empty() {
            return Err(ExtractError::MissingCredential("GENAI_API_KEY"));
        }
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| ExtractError::InvalidCredential(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(Self {
            fetcher,
            config,
            headers,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    pub fn request_body(&self, prompt: &str) -> JsonValue {
        json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }

    async fn complete(&self, prompt: &str) -> Option<String> {
        let response = self
            .fetcher
            .post_json(&self.completions_url(), &self.headers, &self.request_body(prompt))
            .await?;
        let content = response
            .pointer("/choices/0/message/content")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        if content.is_none() {
            warn!("completion response had no message content");
        }
        content
    }

    async fn extract_batch(&self, batch: &[TextUnit]) -> Vec<MentionCandidate> {
        let prompt = build_prompt(batch);
        let Some(content) = self.complete(&prompt).await else {
            return Vec::new();
        };
        candidates_from_response(&content, batch)
    }
}

fn truncate_to_char_boundary(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One instruction for the whole batch, with the exact output contract and a worked example.
pub fn build_prompt(batch: &[TextUnit]) -> String {
    let fragments = batch
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let text = truncate_to_char_boundary(unit.text.trim(), MAX_FRAGMENT_CHARS);
            format!("[{}] {}", i + 1, text.replace('\n', " "))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Extract every movie or TV series title mentioned in the discussion fragments below.\n\
         Only include real, released movies or TV series. Ignore people, books, games and platforms.\n\
         For each title give the release year if stated and the sentiment the writer expresses \
         toward it (positive, neutral or negative).\n\n\
         Return ONLY a JSON array, no prose. Example:\n\
         [{{\"title\": \"Inception\", \"year\": 2010, \"sentiment\": \"positive\"}}, \
         {{\"title\": \"Dark\", \"year\": null, \"sentiment\": \"neutral\"}}]\n\
         If nothing is mentioned return [].\n\n\
         Fragments:\n{fragments}"
    )
}

fn mean_score(batch: &[TextUnit]) -> i64 {
    if batch.is_empty() {
        return 0;
    }
    batch.iter().map(|u| u.score).sum::<i64>() / batch.len() as i64
}

fn parse_year(value: Option<&JsonValue>) -> Option<i32> {
    match value? {
        JsonValue::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Turn raw completion text into candidates for `batch`.
///
/// Each title is attributed to the first fragment that mentions it (falling back to the first
/// fragment); every candidate carries the batch's mean score.
pub fn candidates_from_response(content: &str, batch: &[TextUnit]) -> Vec<MentionCandidate> {
    let Some(first_unit) = batch.first() else {
        return Vec::new();
    };
    let Some(items) = extract_json_array(content) else {
        warn!(response_chars = content.len(), "completion response was not a json array");
        return Vec::new();
    };

    let score = mean_score(batch);
    let lowered = batch.iter().map(|u| u.text.to_lowercase()).collect::<Vec<_>>();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for item in &items {
        let Some(title) = item.get("title").and_then(JsonValue::as_str).map(str::trim) else {
            debug!(?item, "skipping entry without a string title");
            continue;
        };
        if title.is_empty() || !seen.insert(normalize_title_key(title)) {
            continue;
        }

        let needle = title.to_lowercase();
        let unit = lowered
            .iter()
            .position(|text| text.contains(&needle))
            .map(|i| &batch[i])
            .unwrap_or(first_unit);
        let context = truncate_to_char_boundary(unit.text.trim(), 2 * MAX_FRAGMENT_CHARS / 3);
        let classification = tagger::classify(context);
        let sentiment = item
            .get("sentiment")
            .and_then(JsonValue::as_str)
            .and_then(|s| s.parse::<Sentiment>().ok())
            .unwrap_or(classification.sentiment);

        out.push(MentionCandidate {
            title: title.to_string(),
            year: parse_year(item.get("year")),
            context: context.to_string(),
            score,
            sentiment,
            genres: classification.genres,
            source: unit.source.clone(),
        });
    }
    out
}

#[async_trait]
impl MentionExtractor for GenerativeExtractor {
    fn name(&self) -> &'static str {
        "generative"
    }

    async fn extract(&self, units: &[TextUnit]) -> Vec<MentionCandidate> {
        let batch_size = self.config.batch_size.max(1);
        let batches = units.chunks(batch_size).count();
        let mut candidates = Vec::new();

        for (i, batch) in units.chunks(batch_size).enumerate() {
            let mut found = self.extract_batch(batch).await;
            info!(batch = i + 1, batches, fragments = batch.len(), found = found.len(), "batch extracted");
            candidates.append(&mut found);
        }

        info!(units = units.len(), batches, candidates = candidates.len(), "generative extraction finished");
        candidates
    }
}
