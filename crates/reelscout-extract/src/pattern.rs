//! Deterministic title detection with regular expressions.

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reelscout_core::{normalize_title_key, MentionCandidate, TextUnit};
use tracing::info;

use crate::{tagger, MentionExtractor};

/// Forum vocabulary that looks like a title to the patterns but never is one. A candidate is
/// rejected when it equals an entry or starts with one (case-insensitive).
pub const FALSE_POSITIVE_LEXICON: &[&str] = &[
    "edit",
    "update",
    "spoiler",
    "reddit",
    "subreddit",
    "tl;dr",
    "tldr",
    "imo",
    "imho",
    "eta:",
    "ps:",
    "p.s.",
    "nsfw",
    "thanks",
    "thank you",
    "upvote",
    "downvote",
    "removed",
    "deleted",
    "netflix",
    "hulu",
    "amazon",
    "prime video",
    "disney+",
    "hbo",
    "youtube",
    "imdb",
    "rotten tomatoes",
    "letterboxd",
    "crunchyroll",
    "peacock",
    "paramount+",
    "apple tv",
];

/// Leading words a capitalized run picks up at sentence start ("Also Heat (1995)").
const LEADING_NOISE: &[&str] = &[
    "also", "and", "but", "try", "watch", "watched", "rewatch", "check", "see", "maybe",
    "definitely", "honestly", "loved", "love", "recommend", "i", "my", "if", "then", "or",
];

const CONTEXT_RADIUS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    YearSuffixed,
    Emphasized,
    Quoted,
}

struct TitlePattern {
    kind: PatternKind,
    regex: Regex,
    /// Single-star emphasis: a match touching another `*` belongs to `**bold**` and is rejected.
    lone_star: bool,
}

impl TitlePattern {
    fn captures<'t>(&self, text: &'t str) -> Vec<Captures<'t>> {
        if !self.lone_star {
            return self.regex.captures_iter(text).collect();
        }
        let mut out = Vec::new();
        let mut at = 0;
        while let Some(caps) = self.regex.captures_at(text, at) {
            let Some(whole) = caps.get(0) else {
                break;
            };
            let before = text[..whole.start()].chars().next_back();
            let after = text[whole.end()..].chars().next();
            if before == Some('*') || after == Some('*') {
                at = whole.start() + 1;
            } else {
                at = whole.end();
                out.push(caps);
            }
        }
        out
    }
}

static PATTERNS: Lazy<Vec<TitlePattern>> = Lazy::new(|| {
    let specs = [
        (
            PatternKind::YearSuffixed,
            r"(?P<title>[A-Z0-9][\w'’&:!.\-]*(?:\s+(?:[A-Z0-9][\w'’&:!.\-]*|of|the|and|a|an|in|on|to|for|with|at|from|vs\.?|&))*)\s*\((?P<year>(?:19|20)\d{2})\)",
        ),
        (
            PatternKind::Emphasized,
            r"\*\*(?P<title>[^*\s](?:[^*\n]{0,98}?[^*\s])?)\*\*",
        ),
        (
            PatternKind::Emphasized,
            r"__(?P<title>[^_\s](?:[^_\n]{0,98}?[^_\s])?)__",
        ),
        (
            PatternKind::Emphasized,
            r"\*(?P<title>[^*\s](?:[^*\n]{0,98}?[^*\s])?)\*",
        ),
        (PatternKind::Quoted, r#""(?P<title>[A-Z0-9][^"\n]{1,80}?)""#),
        (PatternKind::Quoted, r"“(?P<title>[A-Z0-9][^”\n]{1,80}?)”"),
    ];
    specs
        .into_iter()
        .map(|(kind, pattern)| TitlePattern {
            kind,
            lone_star: pattern.starts_with(r"\*("),
            regex: Regex::new(pattern).expect("title pattern compiles"),
        })
        .collect()
});

static YEAR_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<title>.+?)\s*\((?P<year>(?:19|20)\d{2})\)$").expect("year suffix compiles"));

pub fn is_false_positive(title: &str) -> bool {
    let lower = title.trim().to_lowercase();
    FALSE_POSITIVE_LEXICON
        .iter()
        .any(|entry| lower == *entry || lower.starts_with(entry))
}

fn strip_leading_noise(title: &str) -> &str {
    let mut rest = title.trim();
    loop {
        let Some((first, tail)) = rest.split_once(char::is_whitespace) else {
            return rest;
        };
        if LEADING_NOISE.contains(&first.to_lowercase().as_str()) {
            rest = tail.trim_start();
        } else {
            return rest;
        }
    }
}

fn clean_title(raw: &str) -> (String, Option<i32>) {
    let trimmed = raw
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ':' | ';'))
        .trim();
    if let Some(caps) = YEAR_SUFFIX.captures(trimmed) {
        let year = caps["year"].parse().ok();
        return (caps["title"].trim().to_string(), year);
    }
    (trimmed.to_string(), None)
}

/// Up to `radius` characters either side of `start..end`.
pub fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[from..to].trim()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    /// All candidates in one unit of text; a title seen earlier in the same text is skipped.
    pub fn extract_from_unit(&self, unit: &TextUnit) -> Vec<MentionCandidate> {
        let text = unit.text.as_str();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for pattern in PATTERNS.iter() {
            for caps in pattern.captures(text) {
                let Some(m) = caps.name("title") else {
                    continue;
                };
                let (mut title, mut year) = clean_title(m.as_str());
                if pattern.kind == PatternKind::YearSuffixed {
                    title = strip_leading_noise(&title).to_string();
                    year = caps.name("year").and_then(|y| y.as_str().parse().ok());
                }

                if title.chars().count() < 2 || is_false_positive(&title) {
                    continue;
                }
                if !seen.insert(normalize_title_key(&title)) {
                    continue;
                }

                let whole = caps.get(0).map(|w| (w.start(), w.end())).unwrap_or((m.start(), m.end()));
                let context = context_window(text, whole.0, whole.1, CONTEXT_RADIUS);
                let classification = tagger::classify(context);

                out.push(MentionCandidate {
                    title,
                    year,
                    context: context.to_string(),
                    score: unit.score,
                    sentiment: classification.sentiment,
                    genres: classification.genres,
                    source: unit.source.clone(),
                });
            }
        }
        out
    }
}

#[async_trait]
impl MentionExtractor for PatternExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn extract(&self, units: &[TextUnit]) -> Vec<MentionCandidate> {
        let candidates = units
            .iter()
            .flat_map(|unit| self.extract_from_unit(unit))
            .collect::<Vec<_>>();
        info!(units = units.len(), candidates = candidates.len(), "pattern extraction finished");
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelscout_core::{MentionSource, Sentiment};

    fn unit(text: &str, score: i64) -> TextUnit {
        TextUnit {
            text: text.to_string(),
            score,
            source: MentionSource {
                community: "MovieSuggestions".into(),
                thread_id: "t1".into(),
                thread_title: "Need something tense".into(),
            },
        }
    }

    fn titles(candidates: &[MentionCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn lexicon_entries_rejected_exactly_and_as_prefix() {
        for entry in FALSE_POSITIVE_LEXICON {
            assert!(is_false_positive(entry), "{entry}");
            assert!(is_false_positive(&entry.to_uppercase()), "{entry}");
            assert!(is_false_positive(&format!("{entry} something")), "{entry}");
        }
        assert!(is_false_positive("Spoiler Alert"));
        assert!(!is_false_positive("Sicario"));
    }

    #[test]
    fn year_suffixed_titles_carry_year() {
        let found = PatternExtractor.extract_from_unit(&unit(
            "You should see The Lord of the Rings (2001) and Also Heat (1995).",
            12,
        ));
        assert_eq!(titles(&found), vec!["The Lord of the Rings", "Heat"]);
        assert_eq!(found[0].year, Some(2001));
        assert_eq!(found[1].year, Some(1995));
        assert_eq!(found[0].score, 12);
    }

    #[test]
    fn adjacent_single_star_titles_are_both_found() {
        let found = PatternExtractor.extract_from_unit(&unit("*Heat* *Thief* and **Ronin**", 3));
        assert_eq!(titles(&found), vec!["Ronin", "Heat", "Thief"]);
    }

    #[test]
    fn emphasized_and_quoted_titles_are_found() {
        let found = PatternExtractor.extract_from_unit(&unit(
            "Try **Prisoners** or *Zodiac*, and \"Memories of Murder\" is great.",
            5,
        ));
        assert_eq!(titles(&found), vec!["Prisoners", "Zodiac", "Memories of Murder"]);
        assert!(found.iter().all(|c| c.year.is_none()));
    }

    #[test]
    fn first_match_wins_within_one_text() {
        let found = PatternExtractor.extract_from_unit(&unit(
            "**Inception (2010)** is wild. Inception (2010) again, \"Inception\" forever",
            3,
        ));
        assert_eq!(titles(&found), vec!["Inception"]);
        assert_eq!(found[0].year, Some(2010));
    }

    #[test]
    fn forum_noise_and_short_titles_are_dropped() {
        let found = PatternExtractor.extract_from_unit(&unit(
            "**Edit:** thanks all! **Spoiler alert** and **X** then **Netflix** has **Dark**",
            3,
        ));
        assert_eq!(titles(&found), vec!["Dark"]);
    }

    #[test]
    fn context_is_bounded_and_tags_sentiment() {
        let padding = "x".repeat(300);
        let text = format!("{padding} I loved **Arrival**, a masterpiece of sci-fi. {padding}");
        let found = PatternExtractor.extract_from_unit(&unit(&text, 1));
        assert_eq!(found.len(), 1);
        assert!(found[0].context.chars().count() <= 2 * CONTEXT_RADIUS + "**Arrival**".len());
        assert_eq!(found[0].sentiment, Sentiment::Positive);
        assert!(found[0].genres.contains("science fiction"));
    }

    #[test]
    fn context_window_respects_char_boundaries() {
        let text = "ééééé **Amélie** ééééé";
        let start = text.find("**").unwrap();
        let end = start + "**Amélie**".len();
        assert_eq!(context_window(text, start, end, 2), "é **Amélie** é");
    }

    #[tokio::test]
    async fn extract_spans_units_independently() {
        let units = vec![unit("Inception (2010) rules", 10), unit("**Inception** rules", 20)];
        let found = PatternExtractor.extract(&units).await;
        assert_eq!(titles(&found), vec!["Inception", "Inception"]);
        assert_eq!(found[1].score, 20);
    }
}
