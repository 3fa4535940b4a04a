//! Collaborator adapter contracts: the discussion platform and the media catalog.

use async_trait::async_trait;
use reelscout_core::{CatalogMatch, DiscussionReply, DiscussionThread};
use thiserror::Error;

pub mod catalog;
pub mod discussion;

pub use catalog::{CatalogConfig, KeyedCatalogSearch};
pub use discussion::{
    harvest_community, select_deep_threads, CommunityHarvest, DiscussionConfig, HarvestPlan,
    PublicDiscussionSource,
};

pub const CRATE_NAME: &str = "reelscout-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("malformed payload from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
    #[error(transparent)]
    Fetch(#[from] reelscout_fetch::FetchError),
}

/// Read-only access to a discussion platform.
///
/// Implementations apply their configured score floors; callers receive already-filtered items.
#[async_trait]
pub trait DiscussionSource: Send + Sync {
    async fn collect_for_community(
        &self,
        community: &str,
        timeframe: &str,
        post_limit: u32,
    ) -> Vec<DiscussionThread>;

    async fn collect_replies(
        &self,
        community: &str,
        thread_id: &str,
        reply_limit: u32,
    ) -> Vec<DiscussionReply>;
}

/// Title lookup against an authoritative media catalog.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// `false` when credentials or base url are missing; `resolve` then always returns `None`.
    fn is_configured(&self) -> bool;

    async fn resolve(&self, title: &str, year: Option<i32>) -> Option<CatalogMatch>;
}
