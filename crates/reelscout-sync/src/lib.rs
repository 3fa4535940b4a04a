//! Discovery run orchestration: configuration, aggregation, cache gate, persistence and reports.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod aggregate;
pub mod cache_gate;
pub mod config;
pub mod pipeline;
pub mod reports;
pub mod store;

pub use aggregate::MentionAccumulator;
pub use cache_gate::{CacheState, GateDecision};
pub use config::{ConfigError, SyncConfig};
pub use pipeline::{
    build_pipeline, RankedMention, RunSummary, SyncPipeline, ValidationOutcome, RUN_KIND,
};
pub use store::{
    merge_recommendation, MemoryRecommendationStore, PgRecommendationStore, RecommendationStore,
    StoreError,
};

pub const CRATE_NAME: &str = "reelscout-sync";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Bypass the cache gate.
    pub force: bool,
    /// Use the in-memory store instead of the database.
    pub dry_run: bool,
}

pub async fn run_sync_once_from_env(options: RunOptions) -> Result<RunSummary> {
    let config = SyncConfig::from_env()?;
    let store: Arc<dyn RecommendationStore> = if options.dry_run {
        info!("dry run: results stay in memory");
        Arc::new(MemoryRecommendationStore::new())
    } else {
        Arc::new(
            PgRecommendationStore::connect(&config.database_url)
                .await
                .context("connecting to the recommendations database")?,
        )
    };
    let pipeline = build_pipeline(config, store)?;
    pipeline.run_once(options.force).await
}

pub async fn migrate_from_env() -> Result<()> {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| SyncConfig::default().database_url);
    let store = PgRecommendationStore::connect(&database_url)
        .await
        .context("connecting to the recommendations database")?;
    store.migrate().await.context("applying migrations")?;
    info!("migrations applied");
    Ok(())
}

pub fn report_from_env(runs: usize) -> Result<String> {
    let reports_dir = std::env::var("REELSCOUT_REPORTS_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| SyncConfig::default().reports_dir);
    reports::report_markdown(runs, &reports_dir)
}
