//! Run-scoped mention accumulator and ranking.

use std::collections::HashMap;

use reelscout_core::{normalize_title_key, AggregatedMention, MentionCandidate};

/// Aggregated mentions keyed by normalized title, kept in first-seen order.
#[derive(Debug, Default)]
pub struct MentionAccumulator {
    entries: Vec<AggregatedMention>,
    index: HashMap<String, usize>,
}

impl MentionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, title: &str) -> Option<&AggregatedMention> {
        self.index
            .get(&normalize_title_key(title))
            .map(|&i| &self.entries[i])
    }

    pub fn add(&mut self, candidate: MentionCandidate) {
        let key = normalize_title_key(&candidate.title);
        if key.is_empty() {
            return;
        }

        if let Some(&i) = self.index.get(&key) {
            let entry = &mut self.entries[i];
            entry.mention_count = entry.mention_count.saturating_add(1);
            entry.total_score = entry.total_score.saturating_add(candidate.score);
            entry.sentiment = entry.sentiment.combine(candidate.sentiment);
            entry.genres.extend(candidate.genres);
            if entry.year.is_none() {
                entry.year = candidate.year;
            }
            return;
        }

        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(AggregatedMention {
            key,
            title: candidate.title.trim().to_string(),
            year: candidate.year,
            mention_count: 1,
            total_score: candidate.score,
            sentiment: candidate.sentiment,
            genres: candidate.genres,
            source: candidate.source,
        });
    }

    pub fn merge<I>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = MentionCandidate>,
    {
        for candidate in candidates {
            self.add(candidate);
        }
    }

    /// All mentions by `count * score` descending; equal products keep first-seen order.
    pub fn ranked(&self) -> Vec<AggregatedMention> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.rank_score().cmp(&a.rank_score()));
        ranked
    }

    pub fn top_k(&self, k: usize) -> Vec<AggregatedMention> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }
}
