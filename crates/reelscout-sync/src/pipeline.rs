//! One discovery run: gate, harvest, extract, aggregate, validate, persist, report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reelscout_adapters::{
    harvest_community, CatalogConfig, CatalogSearch, DiscussionConfig, DiscussionSource, HarvestPlan,
    KeyedCatalogSearch, PublicDiscussionSource,
};
use reelscout_core::{AggregatedMention, CatalogMatch, MediaKind, Recommendation, Sentiment, TextUnit};
use reelscout_extract::{
    ExtractorKind, GenerativeConfig, GenerativeExtractor, MentionExtractor, PatternExtractor,
};
use reelscout_fetch::{BackoffPolicy, FetcherConfig, RateBudget, RateLimitedFetcher};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::MentionAccumulator;
use crate::cache_gate::{self, GateDecision};
use crate::config::{ConfigError, SyncConfig};
use crate::reports;
use crate::store::RecommendationStore;

pub const RUN_KIND: &str = "discussion-recommendations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Validated,
    Unresolved,
    /// Catalog not configured; persisted without a catalog id.
    Unchecked,
}

/// One ranked mention as it left the run, with its validation and persistence result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMention {
    pub rank: usize,
    pub title: String,
    pub year: Option<i32>,
    pub mention_count: u32,
    pub total_score: i64,
    pub rank_score: i64,
    pub sentiment: Sentiment,
    pub genres: Vec<String>,
    pub community: String,
    pub thread_id: String,
    pub outcome: ValidationOutcome,
    pub catalog_id: Option<i64>,
    pub media_kind: Option<MediaKind>,
    pub persisted: bool,
}

impl RankedMention {
    fn new(
        rank: usize,
        mention: &AggregatedMention,
        outcome: ValidationOutcome,
        matched: Option<CatalogMatch>,
    ) -> Self {
        Self {
            rank,
            title: mention.title.clone(),
            year: mention.year,
            mention_count: mention.mention_count,
            total_score: mention.total_score,
            rank_score: mention.rank_score(),
            sentiment: mention.sentiment,
            genres: mention.genres.iter().cloned().collect(),
            community: mention.source.community.clone(),
            thread_id: mention.source.thread_id.clone(),
            outcome,
            catalog_id: matched.map(|m| m.catalog_id),
            media_kind: matched.map(|m| m.media_kind),
            persisted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_kind: String,
    pub fingerprint: String,
    pub decision: GateDecision,
    pub reason: String,
    pub extractor: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub communities: usize,
    pub threads: usize,
    pub replies: usize,
    pub text_units: usize,
    pub candidates: usize,
    pub unique_titles: usize,
    pub ranked: usize,
    pub validated: usize,
    pub saved: usize,
    pub failed: usize,
    /// Whether titles were checked against the catalog at all.
    #[serde(default)]
    pub catalog_consulted: bool,
    pub reports_dir: Option<String>,
}

impl RunSummary {
    fn new(
        run_id: Uuid,
        fingerprint: String,
        decision: GateDecision,
        extractor: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            run_kind: RUN_KIND.to_string(),
            fingerprint,
            decision,
            reason: decision.reason().to_string(),
            extractor: extractor.to_string(),
            started_at,
            finished_at: started_at,
            elapsed_ms: 0,
            communities: 0,
            threads: 0,
            replies: 0,
            text_units: 0,
            candidates: 0,
            unique_titles: 0,
            ranked: 0,
            validated: 0,
            saved: 0,
            failed: 0,
            catalog_consulted: false,
            reports_dir: None,
        }
    }

    pub fn skipped(&self) -> bool {
        !self.decision.should_run()
    }

    /// Share of ranked mentions the catalog resolved, when it was consulted.
    pub fn hit_rate(&self) -> Option<f64> {
        (self.catalog_consulted && self.ranked > 0)
            .then(|| self.validated as f64 / self.ranked as f64)
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    discussion: Box<dyn DiscussionSource>,
    extractor: Box<dyn MentionExtractor>,
    catalog: Box<dyn CatalogSearch>,
    store: Arc<dyn RecommendationStore>,
    reports_dir: Option<PathBuf>,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        discussion: Box<dyn DiscussionSource>,
        extractor: Box<dyn MentionExtractor>,
        catalog: Box<dyn CatalogSearch>,
        store: Arc<dyn RecommendationStore>,
    ) -> Self {
        let reports_dir = Some(config.reports_dir.clone());
        Self {
            config,
            discussion,
            extractor,
            catalog,
            store,
            reports_dir,
        }
    }

    /// Where run reports go; `None` disables them.
    pub fn with_reports_dir(mut self, reports_dir: Option<PathBuf>) -> Self {
        self.reports_dir = reports_dir;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self, force: bool) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, extractor = self.extractor.name());
        self.run_inner(run_id, force).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, force: bool) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let fingerprint = self.config.fingerprint();

        let prior = match self.store.run_metadata(RUN_KIND).await {
            Ok(prior) => prior,
            Err(err) => {
                warn!(error = %err, "could not read run metadata; treating as no prior run");
                None
            }
        };
        let decision = cache_gate::evaluate(
            prior.as_ref(),
            &fingerprint,
            self.config.cache_ttl(),
            started_at,
            force,
        );
        let mut summary = RunSummary::new(
            run_id,
            fingerprint.clone(),
            decision,
            self.extractor.name(),
            started_at,
        );

        if !decision.should_run() {
            info!(reason = decision.reason(), "cache is fresh; skipping run");
            summary.finished_at = Utc::now();
            return Ok(summary);
        }
        info!(reason = decision.reason(), "cache gate passed");

        let units = self.harvest(&mut summary).await;

        let candidates = self.extractor.extract(&units).await;
        summary.candidates = candidates.len();

        let mut accumulator = MentionAccumulator::new();
        accumulator.merge(candidates);
        summary.unique_titles = accumulator.len();
        let top = accumulator.top_k(self.config.top_k);
        summary.ranked = top.len();
        info!(
            candidates = summary.candidates,
            unique_titles = summary.unique_titles,
            ranked = summary.ranked,
            "mentions aggregated"
        );

        let ranked = self.validate_and_persist(&top, &mut summary).await;

        if let Err(err) = self
            .store
            .record_run_metadata(RUN_KIND, &fingerprint, Utc::now())
            .await
        {
            warn!(error = %err, "failed to record run metadata");
        }

        summary.finished_at = Utc::now();
        summary.elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Some(root) = &self.reports_dir {
            match reports::write_run_report(root, &summary, &ranked).await {
                Ok(dir) => summary.reports_dir = Some(dir.display().to_string()),
                Err(err) => warn!(error = %format!("{err:#}"), "failed to write run report"),
            }
        }

        info!(
            saved = summary.saved,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "run complete"
        );
        Ok(summary)
    }

    async fn harvest(&self, summary: &mut RunSummary) -> Vec<TextUnit> {
        let plan = HarvestPlan {
            timeframe: self.config.timeframe.clone(),
            post_limit: self.config.posts_per_community,
            reply_limit: self.config.replies_per_thread,
            deep_threads: self.config.deep_threads,
        };

        let mut units = Vec::new();
        for community in &self.config.communities {
            let harvest = harvest_community(self.discussion.as_ref(), community, &plan).await;
            summary.communities += 1;
            summary.threads += harvest.threads.len();
            summary.replies += harvest.replies.len();
            units.extend(harvest.text_units());
        }
        summary.text_units = units.len();
        info!(
            communities = summary.communities,
            threads = summary.threads,
            replies = summary.replies,
            text_units = summary.text_units,
            "discussion harvested"
        );
        units
    }

    async fn validate_and_persist(
        &self,
        top: &[AggregatedMention],
        summary: &mut RunSummary,
    ) -> Vec<RankedMention> {
        let catalog_configured = self.catalog.is_configured();
        summary.catalog_consulted = catalog_configured;
        if !catalog_configured {
            warn!("catalog is not configured; persisting mentions without catalog ids");
        }

        let mut ranked = Vec::with_capacity(top.len());
        for (i, mention) in top.iter().enumerate() {
            let (outcome, matched) = if catalog_configured {
                match self.catalog.resolve(&mention.title, mention.year).await {
                    Some(m) => (ValidationOutcome::Validated, Some(m)),
                    None => (ValidationOutcome::Unresolved, None),
                }
            } else {
                (ValidationOutcome::Unchecked, None)
            };

            let mut entry = RankedMention::new(i + 1, mention, outcome, matched);
            if outcome == ValidationOutcome::Validated {
                summary.validated += 1;
            }
            if outcome != ValidationOutcome::Unresolved {
                let rec = Recommendation::from_mention(mention, matched, Utc::now());
                match self.store.upsert_recommendation(&rec).await {
                    Ok(()) => {
                        summary.saved += 1;
                        entry.persisted = true;
                    }
                    Err(err) => {
                        summary.failed += 1;
                        warn!(title = %rec.title, error = %err, "failed to persist recommendation");
                    }
                }
            }
            ranked.push(entry);
        }

        if catalog_configured {
            let hit_rate = if top.is_empty() {
                0.0
            } else {
                summary.validated as f64 / top.len() as f64
            };
            info!(
                checked = top.len(),
                validated = summary.validated,
                hit_rate = %format!("{:.1}%", hit_rate * 100.0),
                "catalog validation finished"
            );
        }
        ranked
    }
}

fn fetcher(
    config: &SyncConfig,
    name: &str,
    backoff: BackoffPolicy,
    budget: RateBudget,
) -> Result<RateLimitedFetcher> {
    let mut fetcher_config = FetcherConfig::new(name);
    fetcher_config.timeout = config.http_timeout();
    fetcher_config.user_agent = Some(config.user_agent.clone());
    fetcher_config.backoff = backoff;
    fetcher_config.budget = Some(budget);
    RateLimitedFetcher::new(fetcher_config).with_context(|| format!("building {name} http client"))
}

/// Live collaborators for `config`, each behind its own rate budget.
pub fn build_pipeline(config: SyncConfig, store: Arc<dyn RecommendationStore>) -> Result<SyncPipeline> {
    let discussion = PublicDiscussionSource::new(
        fetcher(
            &config,
            "discussion",
            BackoffPolicy::linear(Duration::from_secs(2)),
            RateBudget::spaced(Duration::from_secs(2)),
        )?,
        DiscussionConfig {
            base_url: config.discussion_base_url.clone(),
            min_thread_score: config.min_thread_score,
            min_reply_score: config.min_reply_score,
        },
    );

    let extractor: Box<dyn MentionExtractor> = match config.extractor {
        ExtractorKind::Generative => {
            let api_key = config
                .genai_api_key
                .clone()
                .ok_or(ConfigError::MissingCredential("GENAI_API_KEY"))?;
            let mut genai = GenerativeConfig::new(api_key);
            genai.base_url = config.genai_base_url.clone();
            genai.model = config.genai_model.clone();
            genai.batch_size = config.batch_size;
            Box::new(GenerativeExtractor::new(
                fetcher(
                    &config,
                    "completion",
                    BackoffPolicy::exponential(Duration::from_secs(2)),
                    RateBudget::per_minute(30),
                )?,
                genai,
            )?)
        }
        ExtractorKind::Pattern => Box::new(PatternExtractor),
    };

    let catalog = KeyedCatalogSearch::new(
        fetcher(
            &config,
            "catalog",
            BackoffPolicy::linear(Duration::from_secs(1)),
            RateBudget::spaced(Duration::from_millis(250)),
        )?,
        CatalogConfig {
            base_url: config.catalog_base_url.clone(),
            api_key: config.catalog_api_key.clone(),
        },
    );

    Ok(SyncPipeline::new(
        config,
        Box::new(discussion),
        extractor,
        Box::new(catalog),
        store,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelscout_core::MentionSource;
    use std::collections::BTreeSet;

    fn mention(title: &str, count: u32, score: i64) -> AggregatedMention {
        AggregatedMention {
            key: title.to_lowercase(),
            title: title.to_string(),
            year: None,
            mention_count: count,
            total_score: score,
            sentiment: Sentiment::Positive,
            genres: BTreeSet::from(["drama".to_string()]),
            source: MentionSource::default(),
        }
    }

    #[test]
    fn ranked_mention_carries_match() {
        let matched = CatalogMatch {
            catalog_id: 95396,
            media_kind: MediaKind::Series,
        };
        let entry = RankedMention::new(
            1,
            &mention("Severance", 3, 40),
            ValidationOutcome::Validated,
            Some(matched),
        );
        assert_eq!(entry.rank_score, 120);
        assert_eq!(entry.catalog_id, Some(95396));
        assert_eq!(entry.media_kind, Some(MediaKind::Series));
        assert!(!entry.persisted);
    }

    #[test]
    fn skipped_summary_reports_gate_reason() {
        let decision = GateDecision::Skip(cache_gate::CacheState::Fresh);
        let summary = RunSummary::new(Uuid::new_v4(), "v1:x".into(), decision, "pattern", Utc::now());
        assert!(summary.skipped());
        assert_eq!(summary.reason, "last run is within the cache ttl");
        assert_eq!(summary.hit_rate(), None);
    }

    #[test]
    fn hit_rate_needs_a_consulted_catalog() {
        let decision = GateDecision::Forced;
        let mut summary = RunSummary::new(Uuid::new_v4(), "v1:x".into(), decision, "pattern", Utc::now());
        summary.ranked = 4;
        assert_eq!(summary.hit_rate(), None);

        summary.catalog_consulted = true;
        summary.validated = 3;
        assert_eq!(summary.hit_rate(), Some(0.75));
    }

    #[test]
    fn generative_build_requires_key() {
        let config = SyncConfig::default();
        let store: Arc<dyn RecommendationStore> = Arc::new(crate::store::MemoryRecommendationStore::new());
        let err = build_pipeline(config, store).err().expect("missing key");
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn pattern_build_needs_no_credentials() {
        let config = SyncConfig {
            extractor: ExtractorKind::Pattern,
            ..SyncConfig::default()
        };
        let store: Arc<dyn RecommendationStore> = Arc::new(crate::store::MemoryRecommendationStore::new());
        let pipeline = build_pipeline(config, store).unwrap();
        assert_eq!(pipeline.extractor.name(), "pattern");
        assert!(!pipeline.catalog.is_configured());
    }
}
