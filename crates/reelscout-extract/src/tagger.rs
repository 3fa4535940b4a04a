//! Keyword-lexicon sentiment and genre tagging.

use std::collections::BTreeSet;

use reelscout_core::Sentiment;

pub const POSITIVE_PHRASES: &[&str] = &[
    "love",
    "amazing",
    "masterpiece",
    "great",
    "excellent",
    "fantastic",
    "favorite",
    "favourite",
    "highly recommend",
    "must watch",
    "must-watch",
    "brilliant",
    "incredible",
    "awesome",
    "beautiful",
    "perfect",
    "underrated",
    "hidden gem",
    "enjoyed",
    "best",
];

pub const NEGATIVE_PHRASES: &[&str] = &[
    "hate",
    "terrible",
    "awful",
    "boring",
    "worst",
    "overrated",
    "disappoint",
    "waste of time",
    "mediocre",
    "didn't like",
    "did not like",
    "not good",
    "unwatchable",
    "fell flat",
];

/// `(keyword, genre)`; several spellings fold into one genre name.
pub const GENRE_KEYWORDS: &[(&str, &str)] = &[
    ("action", "action"),
    ("adventure", "adventure"),
    ("animated", "animation"),
    ("animation", "animation"),
    ("anime", "animation"),
    ("comedy", "comedy"),
    ("comedies", "comedy"),
    ("crime", "crime"),
    ("documentary", "documentary"),
    ("documentaries", "documentary"),
    ("drama", "drama"),
    ("family", "family"),
    ("fantasy", "fantasy"),
    ("horror", "horror"),
    ("mystery", "mystery"),
    ("romance", "romance"),
    ("romantic", "romance"),
    ("rom-com", "romance"),
    ("sci-fi", "science fiction"),
    ("scifi", "science fiction"),
    ("science fiction", "science fiction"),
    ("thriller", "thriller"),
    ("war film", "war"),
    ("war movie", "war"),
    ("western", "western"),
    ("musical", "musical"),
    ("noir", "noir"),
    ("superhero", "superhero"),
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub genres: BTreeSet<String>,
}

fn count_hits(haystack: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| haystack.contains(*p)).count()
}

pub fn classify_sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let positive = count_hits(&lower, POSITIVE_PHRASES);
    let negative = count_hits(&lower, NEGATIVE_PHRASES);
    if positive > negative && positive >= 1 {
        Sentiment::Positive
    } else if negative > positive && negative >= 1 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

pub fn detect_genres(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    GENRE_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, genre)| genre.to_string())
        .collect()
}

pub fn classify(text: &str) -> Classification {
    Classification {
        sentiment: classify_sentiment(text),
        genres: detect_genres(text),
    }
}
