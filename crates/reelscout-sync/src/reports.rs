//! Per-run report files and the multi-run markdown digest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::pipeline::{RankedMention, RunSummary, ValidationOutcome};

pub const SUMMARY_FILE: &str = "summary.json";
pub const RANKED_FILE: &str = "ranked_mentions.json";
pub const BRIEF_FILE: &str = "brief.md";

const BRIEF_TOP: usize = 20;

/// Write `summary.json`, `ranked_mentions.json` and `brief.md` under `<root>/<run_id>/`.
pub async fn write_run_report(
    root: &Path,
    summary: &RunSummary,
    ranked: &[RankedMention],
) -> Result<PathBuf> {
    let run_dir = root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let mut summary = summary.clone();
    summary.reports_dir = Some(run_dir.display().to_string());

    let bytes = serde_json::to_vec_pretty(&summary).context("serializing run summary")?;
    fs::write(run_dir.join(SUMMARY_FILE), bytes)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;

    let bytes = serde_json::to_vec_pretty(ranked).context("serializing ranked mentions")?;
    fs::write(run_dir.join(RANKED_FILE), bytes)
        .await
        .with_context(|| format!("writing {RANKED_FILE}"))?;

    fs::write(run_dir.join(BRIEF_FILE), brief_markdown(&summary, ranked))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    Ok(run_dir)
}

fn outcome_label(entry: &RankedMention) -> String {
    match (entry.outcome, entry.catalog_id, entry.media_kind) {
        (ValidationOutcome::Validated, Some(id), Some(kind)) => format!("{kind} #{id}"),
        (ValidationOutcome::Validated, _, _) => "validated".to_string(),
        (ValidationOutcome::Unresolved, _, _) => "unresolved".to_string(),
        (ValidationOutcome::Unchecked, _, _) => "unchecked".to_string(),
    }
}

pub fn brief_markdown(summary: &RunSummary, ranked: &[RankedMention]) -> String {
    let mut lines = vec![
        "# Reelscout Run Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {} ({} ms)", summary.finished_at, summary.elapsed_ms),
        format!("- Gate: {}", summary.reason),
        format!("- Extractor: {}", summary.extractor),
        format!(
            "- Harvest: {} communities, {} threads, {} replies, {} text units",
            summary.communities, summary.threads, summary.replies, summary.text_units
        ),
        format!(
            "- Mentions: {} candidates, {} unique titles, {} ranked",
            summary.candidates, summary.unique_titles, summary.ranked
        ),
        format!(
            "- Persisted: {} saved, {} failed, {} validated",
            summary.saved, summary.failed, summary.validated
        ),
        String::new(),
        "## Top Mentions".to_string(),
    ];

    if ranked.is_empty() {
        lines.push("_none_".to_string());
    }
    for entry in ranked.iter().take(BRIEF_TOP) {
        let year = entry.year.map(|y| format!(" ({y})")).unwrap_or_default();
        lines.push(format!(
            "{}. {}{} - {} mentions, score {}, {}, {} [r/{}]",
            entry.rank,
            entry.title,
            year,
            entry.mention_count,
            entry.total_score,
            entry.sentiment,
            outcome_label(entry),
            entry.community,
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Markdown digest of the `runs` most recent runs found under `reports_root`.
pub fn report_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut summaries = Vec::new();
    let entries = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path().join(SUMMARY_FILE);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let summary: RunSummary = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        summaries.push((entry.path(), summary));
    }
    summaries.sort_by(|a, b| b.1.started_at.cmp(&a.1.started_at));
    summaries.truncate(runs.max(1));

    let mut lines = vec!["# Reelscout Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("_no runs recorded_".to_string());
    }
    for (dir, summary) in summaries {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!("- gate: {}", summary.reason));
        lines.push(format!(
            "- titles: {} unique, {} ranked, {} validated",
            summary.unique_titles, summary.ranked, summary.validated
        ));
        lines.push(format!("- saved: {} (failed {})", summary.saved, summary.failed));
        if let Some(rate) = summary.hit_rate() {
            lines.push(format!("- validation hit rate: {:.1}%", rate * 100.0));
        }
        let brief = dir.join(BRIEF_FILE);
        if brief.exists() {
            lines.push(format!("- brief: `{}`", brief.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
