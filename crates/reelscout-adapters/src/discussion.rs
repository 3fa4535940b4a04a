//! Discussion collector over the platform's public JSON listings.

use std::cmp::Reverse;

use async_trait::async_trait;
use reelscout_core::{DiscussionReply, DiscussionThread, TextUnit};
use reelscout_fetch::header::HeaderMap;
use reelscout_fetch::{RateLimitedFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{AdapterError, DiscussionSource};

#[derive(Debug, Clone)]
pub struct DiscussionConfig {
    pub base_url: String,
    pub min_thread_score: i64,
    pub min_reply_score: i64,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            min_thread_score: 10,
            min_reply_score: 3,
        }
    }
}

/// Unauthenticated collector. Pacing comes from the fetcher's rate budget, so every listing
/// and reply request is spaced, including the first request of the next community.
pub struct PublicDiscussionSource {
    fetcher: RateLimitedFetcher,
    config: DiscussionConfig,
}

impl PublicDiscussionSource {
    pub fn new(fetcher: RateLimitedFetcher, config: DiscussionConfig) -> Self {
        Self { fetcher, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub fn listing_url(
        &self,
        community: &str,
        timeframe: &str,
        post_limit: u32,
    ) -> Result<Url, AdapterError> {
        let raw = format!("{}/r/{}/top.json", self.base(), community);
        let limit = post_limit.to_string();
        Url::parse_with_params(&raw, &[("t", timeframe), ("limit", limit.as_str()), ("raw_json", "1")])
            .map_err(|e| AdapterError::Message(format!("bad listing url {raw}: {e}")))
    }

    pub fn replies_url(
        &self,
        community: &str,
        thread_id: &str,
        reply_limit: u32,
    ) -> Result<Url, AdapterError> {
        let raw = format!("{}/r/{}/comments/{}.json", self.base(), community, thread_id);
        let limit = reply_limit.to_string();
        Url::parse_with_params(&raw, &[("limit", limit.as_str()), ("sort", "top"), ("raw_json", "1")])
            .map_err(|e| AdapterError::Message(format!("bad replies url {raw}: {e}")))
    }
}

#[async_trait]
impl DiscussionSource for PublicDiscussionSource {
    async fn collect_for_community(
        &self,
        community: &str,
        timeframe: &str,
        post_limit: u32,
    ) -> Vec<DiscussionThread> {
        let url = match self.listing_url(community, timeframe, post_limit) {
            Ok(url) => url,
            Err(err) => {
                warn!(community, error = %err, "skipping community");
                return Vec::new();
            }
        };
        let Some(payload) = self.fetcher.fetch(url.as_str(), &HeaderMap::new()).await else {
            return Vec::new();
        };

        let threads = match parse_thread_listing(&payload, community, self.base()) {
            Ok(threads) => threads,
            Err(err) => {
                warn!(community, error = %err, "unreadable thread listing");
                return Vec::new();
            }
        };
        let fetched = threads.len();
        let kept = threads
            .into_iter()
            .filter(|t| t.score >= self.config.min_thread_score)
            .collect::<Vec<_>>();
        info!(community, fetched, kept = kept.len(), "threads collected");
        kept
    }

    async fn collect_replies(
        &self,
        community: &str,
        thread_id: &str,
        reply_limit: u32,
    ) -> Vec<DiscussionReply> {
        let url = match self.replies_url(community, thread_id, reply_limit) {
            Ok(url) => url,
            Err(err) => {
                warn!(community, thread_id, error = %err, "skipping replies");
                return Vec::new();
            }
        };
        let Some(payload) = self.fetcher.fetch(url.as_str(), &HeaderMap::new()).await else {
            return Vec::new();
        };

        match parse_reply_listing(&payload, thread_id) {
            Ok(replies) => {
                let fetched = replies.len();
                let kept = replies
                    .into_iter()
                    .filter(|r| r.score >= self.config.min_reply_score)
                    .collect::<Vec<_>>();
                debug!(community, thread_id, fetched, kept = kept.len(), "replies collected");
                kept
            }
            Err(err) => {
                warn!(community, thread_id, error = %err, "unreadable reply listing");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    kind: String,
    data: JsonValue,
}

#[derive(Debug, Deserialize)]
struct ThreadPayload {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    subreddit: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u32,
    #[serde(default)]
    permalink: String,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    author: Option<String>,
}

fn malformed(endpoint: &str, reason: impl ToString) -> AdapterError {
    AdapterError::Malformed {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a community "top" listing into threads; `base_url` makes permalinks absolute.
pub fn parse_thread_listing(
    payload: &JsonValue,
    community: &str,
    base_url: &str,
) -> Result<Vec<DiscussionThread>, AdapterError> {
    let listing: Listing =
        serde_json::from_value(payload.clone()).map_err(|e| malformed("top listing", e))?;

    let mut threads = Vec::new();
    for child in listing.data.children.into_iter().filter(|c| c.kind == "t3") {
        let post: ThreadPayload = match serde_json::from_value(child.data) {
            Ok(post) => post,
            Err(err) => {
                debug!(error = %err, "skipping unreadable thread entry");
                continue;
            }
        };
        let permalink = if post.permalink.starts_with('/') {
            format!("{}{}", base_url.trim_end_matches('/'), post.permalink)
        } else {
            post.permalink
        };
        threads.push(DiscussionThread {
            id: post.id,
            title: post.title,
            body: post.selftext,
            community: post.subreddit.unwrap_or_else(|| community.to_string()),
            score: post.score,
            reply_count: post.num_comments,
            permalink,
        });
    }
    Ok(threads)
}

/// Parse a thread's comment payload (`[thread_listing, reply_listing]`) into top-level replies.
pub fn parse_reply_listing(
    payload: &JsonValue,
    thread_id: &str,
) -> Result<Vec<DiscussionReply>, AdapterError> {
    let second = payload
        .as_array()
        .and_then(|parts| parts.get(1))
        .ok_or_else(|| malformed("comment listing", "expected a two-element array"))?;
    let listing: Listing =
        serde_json::from_value(second.clone()).map_err(|e| malformed("comment listing", e))?;

    let mut replies = Vec::new();
    for child in listing.data.children.into_iter().filter(|c| c.kind == "t1") {
        let Ok(reply) = serde_json::from_value::<ReplyPayload>(child.data) else {
            continue;
        };
        let body = reply.body.trim();
        if body.is_empty() || body == "[deleted]" || body == "[removed]" {
            continue;
        }
        replies.push(DiscussionReply {
            id: reply.id,
            body: body.to_string(),
            score: reply.score,
            author: reply.author.unwrap_or_else(|| "[deleted]".to_string()),
            thread_id: thread_id.to_string(),
        });
    }
    Ok(replies)
}

/// The `n` threads with the most replies, ties kept in listing order.
pub fn select_deep_threads(threads: &[DiscussionThread], n: usize) -> Vec<&DiscussionThread> {
    let mut ranked = threads.iter().collect::<Vec<_>>();
    ranked.sort_by_key(|t| Reverse(t.reply_count));
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone)]
pub struct HarvestPlan {
    pub timeframe: String,
    pub post_limit: u32,
    pub reply_limit: u32,
    pub deep_threads: usize,
}

impl Default for HarvestPlan {
    fn default() -> Self {
        Self {
            timeframe: "month".to_string(),
            post_limit: 50,
            reply_limit: 50,
            deep_threads: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommunityHarvest {
    pub community: String,
    pub threads: Vec<DiscussionThread>,
    pub replies: Vec<DiscussionReply>,
}

impl CommunityHarvest {
    /// Threads first, then replies attributed to their owning thread.
    pub fn text_units(&self) -> Vec<TextUnit> {
        let mut units = self
            .threads
            .iter()
            .map(TextUnit::from_thread)
            .collect::<Vec<_>>();
        for reply in &self.replies {
            if let Some(thread) = self.threads.iter().find(|t| t.id == reply.thread_id) {
                units.push(TextUnit::from_reply(reply, thread));
            }
        }
        units
    }
}

/// Top threads for one community plus replies of its most-discussed threads, one call at a time.
pub async fn harvest_community(
    source: &dyn DiscussionSource,
    community: &str,
    plan: &HarvestPlan,
) -> CommunityHarvest {
    let threads = source
        .collect_for_community(community, &plan.timeframe, plan.post_limit)
        .await;

    let deep_ids = select_deep_threads(&threads, plan.deep_threads)
        .into_iter()
        .map(|t| t.id.clone())
        .collect::<Vec<_>>();

    let mut replies = Vec::new();
    for thread_id in &deep_ids {
        let mut batch = source
            .collect_replies(community, thread_id, plan.reply_limit)
            .await;
        replies.append(&mut batch);
    }

    info!(
        community,
        threads = threads.len(),
        deep_threads = deep_ids.len(),
        replies = replies.len(),
        "community harvested"
    );

    CommunityHarvest {
        community: community.to_string(),
        threads,
        replies,
    }
}
