//! Catalog validator over a keyed search-by-title API (movie and tv search endpoints).

use async_trait::async_trait;
use reelscout_core::{CatalogMatch, MediaKind};
use reelscout_fetch::header::HeaderMap;
use reelscout_fetch::{RateLimitedFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{AdapterError, CatalogSearch};

#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

pub struct KeyedCatalogSearch {
    fetcher: RateLimitedFetcher,
    config: CatalogConfig,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: i64,
}

impl KeyedCatalogSearch {
    pub fn new(fetcher: RateLimitedFetcher, config: CatalogConfig) -> Self {
        Self { fetcher, config }
    }

    fn endpoint(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Movie => "search/movie",
            MediaKind::Series => "search/tv",
        }
    }

    pub fn search_url(
        &self,
        kind: MediaKind,
        title: &str,
        year: Option<i32>,
    ) -> Result<Url, AdapterError> {
        let (Some(base), Some(key)) = (&self.config.base_url, &self.config.api_key) else {
            return Err(AdapterError::Message("catalog is not configured".to_string()));
        };
        let raw = format!("{}/{}", base.trim_end_matches('/'), Self::endpoint(kind));
        let mut params = vec![
            ("api_key", key.clone()),
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let (MediaKind::Movie, Some(year)) = (kind, year) {
            params.push(("year", year.to_string()));
        }
        Url::parse_with_params(&raw, &params)
            .map_err(|e| AdapterError::Message(format!("bad catalog url {raw}: {e}")))
    }

    /// `Ok(None)` means the search answered with zero hits.
    async fn search(
        &self,
        kind: MediaKind,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<i64>, AdapterError> {
        let url = self.search_url(kind, title, year)?;
        let payload = self.fetcher.try_fetch(url.as_str(), &HeaderMap::new()).await?;
        first_result_id(Self::endpoint(kind), payload)
    }
}

fn first_result_id(endpoint: &str, payload: JsonValue) -> Result<Option<i64>, AdapterError> {
    let page: SearchPage =
        serde_json::from_value(payload).map_err(|err| AdapterError::Malformed {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;
    Ok(page.results.first().map(|hit| hit.id))
}

#[async_trait]
impl CatalogSearch for KeyedCatalogSearch {
    fn is_configured(&self) -> bool {
        self.config.base_url.as_deref().is_some_and(|b| !b.trim().is_empty())
            && self.config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Movie search first (year-filtered when known), series search on zero hits.
    async fn resolve(&self, title: &str, year: Option<i32>) -> Option<CatalogMatch> {
        if !self.is_configured() {
            return None;
        }

        for kind in [MediaKind::Movie, MediaKind::Series] {
            match self.search(kind, title, year).await {
                Ok(Some(catalog_id)) => {
                    debug!(title, catalog_id, kind = %kind, "catalog match");
                    return Some(CatalogMatch {
                        catalog_id,
                        media_kind: kind,
                    });
                }
                Ok(None) => continue,
                // A failed search says nothing about the other kind.
                Err(err) => {
                    warn!(title, kind = %kind, error = %err, "catalog search failed");
                    return None;
                }
            }
        }
        debug!(title, "no catalog match");
        None
    }
}
