use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelscout_adapters::{CatalogSearch, DiscussionSource};
use reelscout_core::{
    CatalogMatch, DiscussionReply, DiscussionThread, MediaKind, Recommendation, RunMetadata,
    Sentiment,
};
use reelscout_extract::{ExtractorKind, GenerativeConfig, GenerativeExtractor, PatternExtractor};
use reelscout_fetch::{BackoffPolicy, FetcherConfig, RateLimitedFetcher};
use reelscout_sync::{
    CacheState, GateDecision, MemoryRecommendationStore, RecommendationStore, StoreError,
    SyncConfig, SyncPipeline, RUN_KIND,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakeDiscussion {
    threads: HashMap<String, Vec<DiscussionThread>>,
    replies: HashMap<String, Vec<DiscussionReply>>,
    calls: Arc<AtomicUsize>,
}

impl FakeDiscussion {
    fn thread(
        mut self,
        community: &str,
        id: &str,
        title: &str,
        body: &str,
        score: i64,
        reply_count: u32,
    ) -> Self {
        self.threads
            .entry(community.to_string())
            .or_default()
            .push(DiscussionThread {
                id: id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                community: community.to_string(),
                score,
                reply_count,
                permalink: format!("https://discussion.test/r/{community}/comments/{id}"),
            });
        self
    }

    fn reply(mut self, thread_id: &str, id: &str, body: &str, score: i64) -> Self {
        self.replies
            .entry(thread_id.to_string())
            .or_default()
            .push(DiscussionReply {
                id: id.to_string(),
                body: body.to_string(),
                score,
                author: "viewer".to_string(),
                thread_id: thread_id.to_string(),
            });
        self
    }
}

#[async_trait]
impl DiscussionSource for FakeDiscussion {
    async fn collect_for_community(
        &self,
        community: &str,
        _timeframe: &str,
        _post_limit: u32,
    ) -> Vec<DiscussionThread> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.threads.get(community).cloned().unwrap_or_default()
    }

    async fn collect_replies(
        &self,
        _community: &str,
        thread_id: &str,
        _reply_limit: u32,
    ) -> Vec<DiscussionReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies.get(thread_id).cloned().unwrap_or_default()
    }
}

struct FakeCatalog {
    configured: bool,
    known: HashMap<String, CatalogMatch>,
    lookups: Arc<AtomicUsize>,
}

impl FakeCatalog {
    fn unconfigured() -> Self {
        Self {
            configured: false,
            known: HashMap::new(),
            lookups: Arc::default(),
        }
    }

    fn knowing(entries: &[(&str, i64, MediaKind)]) -> Self {
        Self {
            configured: true,
            known: entries
                .iter()
                .map(|(title, id, kind)| {
                    (
                        title.to_lowercase(),
                        CatalogMatch {
                            catalog_id: *id,
                            media_kind: *kind,
                        },
                    )
                })
                .collect(),
            lookups: Arc::default(),
        }
    }
}

#[async_trait]
impl CatalogSearch for FakeCatalog {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn resolve(&self, title: &str, _year: Option<i32>) -> Option<CatalogMatch> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.known.get(&title.to_lowercase()).copied()
    }
}

/// Fails every upsert for one title and delegates the rest.
struct FlakyStore {
    inner: MemoryRecommendationStore,
    poisoned: String,
}

#[async_trait]
impl RecommendationStore for FlakyStore {
    async fn run_metadata(&self, run_kind: &str) -> Result<Option<RunMetadata>, StoreError> {
        self.inner.run_metadata(run_kind).await
    }

    async fn upsert_recommendation(&self, rec: &Recommendation) -> Result<(), StoreError> {
        if rec.title == self.poisoned {
            return Err(StoreError::InvalidRow(format!("rejected {}", rec.title)));
        }
        self.inner.upsert_recommendation(rec).await
    }

    async fn record_run_metadata(
        &self,
        run_kind: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.record_run_metadata(run_kind, fingerprint, now).await
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        communities: vec!["movies".into(), "MovieSuggestions".into()],
        extractor: ExtractorKind::Pattern,
        ..SyncConfig::default()
    }
}

fn discussion() -> FakeDiscussion {
    FakeDiscussion::default()
        .thread(
            "movies",
            "a1",
            "Best heist films?",
            "Inception (2010) is a masterpiece",
            50,
            12,
        )
        .thread(
            "MovieSuggestions",
            "b1",
            "Something mind-bending",
            "Watch **Inception** tonight",
            30,
            4,
        )
        .reply("a1", "c1", "I prefer *Heat* honestly", 5)
}

fn pipeline(
    discussion: FakeDiscussion,
    catalog: FakeCatalog,
    store: Arc<dyn RecommendationStore>,
) -> SyncPipeline {
    SyncPipeline::new(
        config(),
        Box::new(discussion),
        Box::new(PatternExtractor),
        Box::new(catalog),
        store,
    )
    .with_reports_dir(None)
}

#[tokio::test]
async fn mentions_across_threads_merge_and_unresolved_titles_are_dropped() {
    let store = Arc::new(MemoryRecommendationStore::new());
    let catalog = FakeCatalog::knowing(&[("Inception", 27205, MediaKind::Movie)]);
    let lookups = catalog.lookups.clone();

    let summary = pipeline(discussion(), catalog, store.clone())
        .run_once(false)
        .await
        .unwrap();

    assert_eq!(summary.decision, GateDecision::Proceed(CacheState::NoPriorRun));
    assert_eq!(summary.communities, 2);
    assert_eq!(summary.threads, 2);
    assert_eq!(summary.replies, 1);
    assert_eq!(summary.text_units, 3);
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.unique_titles, 2);
    assert_eq!(summary.ranked, 2);
    assert_eq!(summary.validated, 1);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(lookups.load(Ordering::SeqCst), 2);

    let inception = store.get("inception").await.expect("persisted");
    assert_eq!(inception.mention_count, 2);
    assert_eq!(inception.total_score, 80);
    assert_eq!(inception.catalog_id, Some(27205));
    assert_eq!(inception.sentiment, Sentiment::Positive);
    assert_eq!(inception.community, "movies");
    assert!(store.get("heat").await.is_none());

    let meta = store.run_metadata(RUN_KIND).await.unwrap().expect("metadata");
    assert_eq!(meta.fingerprint, config().fingerprint());
}

#[tokio::test]
async fn unconfigured_catalog_persists_everything_without_ids() {
    let store = Arc::new(MemoryRecommendationStore::new());
    let catalog = FakeCatalog::unconfigured();
    let lookups = catalog.lookups.clone();

    let summary = pipeline(discussion(), catalog, store.clone())
        .run_once(false)
        .await
        .unwrap();

    assert_eq!(summary.saved, 2);
    assert_eq!(summary.validated, 0);
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    let heat = store.get("Heat").await.expect("persisted");
    assert_eq!(heat.catalog_id, None);
    assert_eq!(heat.media_kind, MediaKind::Movie);
    assert_eq!(heat.thread_id, "a1");
}

#[tokio::test]
async fn fresh_cache_skips_without_touching_collaborators() {
    let prior = RunMetadata {
        run_kind: RUN_KIND.to_string(),
        last_run_at: Utc::now() - chrono::Duration::hours(10),
        fingerprint: config().fingerprint(),
    };
    let store = Arc::new(MemoryRecommendationStore::with_run_metadata(prior.clone()));
    let source = discussion();
    let calls = source.calls.clone();

    let pipeline = SyncPipeline::new(
        config(),
        Box::new(source),
        Box::new(PatternExtractor),
        Box::new(FakeCatalog::unconfigured()),
        store.clone(),
    )
    .with_reports_dir(None);
    let summary = pipeline.run_once(false).await.unwrap();

    assert_eq!(summary.decision, GateDecision::Skip(CacheState::Fresh));
    assert!(summary.skipped());
    assert_eq!(summary.threads, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.len().await, 0);
    assert_eq!(store.run_metadata(RUN_KIND).await.unwrap(), Some(prior));
}

#[tokio::test]
async fn changed_community_list_reruns_inside_ttl() {
    let mut previous = config();
    previous.communities = vec!["movies".into()];
    let store = Arc::new(MemoryRecommendationStore::with_run_metadata(RunMetadata {
        run_kind: RUN_KIND.to_string(),
        last_run_at: Utc::now() - chrono::Duration::hours(10),
        fingerprint: previous.fingerprint(),
    }));

    let summary = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .run_once(false)
        .await
        .unwrap();

    assert_eq!(summary.decision, GateDecision::Proceed(CacheState::ConfigChanged));
    assert_eq!(summary.saved, 2);
    let meta = store.run_metadata(RUN_KIND).await.unwrap().unwrap();
    assert_eq!(meta.fingerprint, config().fingerprint());
}

#[tokio::test]
async fn forced_reruns_are_idempotent() {
    let store = Arc::new(MemoryRecommendationStore::new());
    let first = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .run_once(false)
        .await
        .unwrap();
    assert_eq!(first.saved, 2);

    let skipped = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .run_once(false)
        .await
        .unwrap();
    assert!(skipped.skipped());

    let forced = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .run_once(true)
        .await
        .unwrap();
    assert_eq!(forced.decision, GateDecision::Forced);
    assert_eq!(forced.saved, 2);

    assert_eq!(store.len().await, 2);
    let inception = store.get("Inception").await.unwrap();
    assert_eq!(inception.mention_count, 2);
    assert_eq!(inception.total_score, 80);
}

#[tokio::test]
async fn one_failing_row_does_not_abort_the_batch() {
    let store = Arc::new(FlakyStore {
        inner: MemoryRecommendationStore::new(),
        poisoned: "Inception".to_string(),
    });

    let summary = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .run_once(false)
        .await
        .unwrap();

    assert_eq!(summary.saved, 1);
    assert_eq!(summary.failed, 1);
    assert!(store.inner.get("Heat").await.is_some());
    assert!(store.inner.run_metadata(RUN_KIND).await.unwrap().is_some());
}

#[tokio::test]
async fn run_report_is_written_for_completed_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRecommendationStore::new());
    let catalog = FakeCatalog::knowing(&[("Inception", 27205, MediaKind::Movie)]);

    let summary = pipeline(discussion(), catalog, store)
        .with_reports_dir(Some(dir.path().to_path_buf()))
        .run_once(false)
        .await
        .unwrap();

    let run_dir = dir.path().join(summary.run_id.to_string());
    assert_eq!(summary.reports_dir, Some(run_dir.display().to_string()));

    let ranked: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("ranked_mentions.json")).unwrap())
            .unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0]["title"], "Inception");
    assert_eq!(ranked[0]["outcome"], "validated");
    assert_eq!(ranked[1]["outcome"], "unresolved");
    assert_eq!(ranked[1]["persisted"], false);

    let brief = std::fs::read_to_string(run_dir.join("brief.md")).unwrap();
    assert!(brief.contains("1. Inception"));
    assert!(run_dir.join("summary.json").is_file());

    let digest = reelscout_sync::reports::report_markdown(3, dir.path()).unwrap();
    assert!(digest.contains(&summary.run_id.to_string()));
}

#[tokio::test]
async fn unwritable_reports_dir_does_not_fail_a_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let store = Arc::new(MemoryRecommendationStore::new());

    let summary = pipeline(discussion(), FakeCatalog::unconfigured(), store.clone())
        .with_reports_dir(Some(blocker.join("reports")))
        .run_once(false)
        .await
        .expect("report failure is not fatal");

    assert_eq!(summary.saved, 2);
    assert_eq!(summary.reports_dir, None);
    assert!(!summary.catalog_consulted);
    assert_eq!(summary.hit_rate(), None);
    assert!(store.run_metadata(RUN_KIND).await.unwrap().is_some());
}

#[tokio::test]
async fn generative_strategy_feeds_the_same_pipeline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content":
                "```json\n[{\"title\": \"Inception\", \"year\": 2010, \"sentiment\": \"positive\"},]\n```"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut fetcher_config = FetcherConfig::new("completion");
    fetcher_config.backoff = BackoffPolicy::exponential(Duration::from_millis(5));
    let mut genai = GenerativeConfig::new("sk-test");
    genai.base_url = server.uri();
    let extractor =
        GenerativeExtractor::new(RateLimitedFetcher::new(fetcher_config).unwrap(), genai).unwrap();

    let store = Arc::new(MemoryRecommendationStore::new());
    let config = SyncConfig {
        extractor: ExtractorKind::Generative,
        genai_api_key: Some("sk-test".into()),
        ..config()
    };
    let summary = SyncPipeline::new(
        config,
        Box::new(discussion()),
        Box::new(extractor),
        Box::new(FakeCatalog::unconfigured()),
        store.clone(),
    )
    .with_reports_dir(None)
    .run_once(false)
    .await
    .unwrap();

    assert_eq!(summary.extractor, "generative");
    assert_eq!(summary.candidates, 1);
    let inception = store.get("inception").await.unwrap();
    assert_eq!(inception.mention_count, 1);
    assert_eq!(inception.sentiment, Sentiment::Positive);
    assert_eq!(inception.thread_id, "a1");
}
