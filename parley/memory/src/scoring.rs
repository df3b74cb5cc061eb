//! Importance, topic and relevance scoring for memory entries.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::{entry::MemoryEntry, geo::Coordinates};

/// Words that raise a turn's importance by [`KEYWORD_INCREMENT`] each.
pub const IMPORTANCE_KEYWORDS: [&str; 10] = [
    "problem",
    "solution",
    "help",
    "important",
    "critical",
    "urgent",
    "remember",
    "community",
    "local",
    "nearby",
];

/// Starting importance of every turn.
pub const BASE_IMPORTANCE: f32 = 0.5;
/// Increment per matched keyword.
pub const KEYWORD_INCREMENT: f32 = 0.1;
/// Response lengths (in characters) that each add [`KEYWORD_INCREMENT`].
pub const RESPONSE_LENGTH_THRESHOLDS: [usize; 2] = [500, 1000];
/// Bonus for a memory recorded at the current location; decays to zero at the radius.
pub const MAX_PROXIMITY_BONUS: f64 = 0.3;

const TOPIC_TABLE: [(&str, &[&str]); 6] = [
    (
        "technical",
        &["code", "programming", "system", "technical", "algorithm", "software"],
    ),
    (
        "creative",
        &["creative", "art", "design", "innovation", "artistic"],
    ),
    (
        "financial",
        &["financial", "money", "budget", "economic", "investment"],
    ),
    (
        "spiritual",
        &["spiritual", "community", "values", "ethics", "wisdom"],
    ),
    ("heritage", &["heritage", "history", "historical", "tradition"]),
    (
        "local",
        &["local", "nearby", "near me", "around here", "in my area"],
    ),
];

/// Importance of a turn: base plus keyword and length increments, clamped to `[0, 1]`.
#[must_use]
pub fn importance(message: &str, response: &str) -> f32 {
    let text = format!("{message} {response}").to_lowercase();
    let keyword_hits = IMPORTANCE_KEYWORDS
        .iter()
        .filter(|keyword| text.contains(*keyword))
        .count();
    let length = response.chars().count();
    let length_hits = RESPONSE_LENGTH_THRESHOLDS
        .iter()
        .filter(|threshold| length > **threshold)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let score = BASE_IMPORTANCE + (keyword_hits + length_hits) as f32 * KEYWORD_INCREMENT;
    score.clamp(0.0, 1.0)
}

/// Topics whose keywords occur in `text`, in table order.
#[must_use]
pub fn extract_topics(text: &str) -> IndexSet<String> {
    let lower = text.to_lowercase();
    TOPIC_TABLE
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(*k)))
        .map(|(topic, _)| (*topic).to_string())
        .collect()
}

fn significant_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| word.chars().count() > 3)
        .collect()
}

/// Jaccard similarity between the entry's text and `current`, over words longer than three characters.
#[must_use]
pub fn text_overlap(entry: &MemoryEntry, current: &str) -> f64 {
    let stored = significant_words(&format!("{} {}", entry.message, entry.response));
    let incoming = significant_words(current);
    let union = stored.union(&incoming).count();
    if union == 0 {
        return 0.0;
    }
    let shared = stored.intersection(&incoming).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = shared as f64 / union as f64;
    ratio
}

/// Linear bonus: [`MAX_PROXIMITY_BONUS`] at distance zero, zero at or beyond `radius_miles`.
#[must_use]
pub fn proximity_bonus(distance_miles: f64, radius_miles: f64) -> f64 {
    if radius_miles <= 0.0 || !distance_miles.is_finite() || distance_miles >= radius_miles {
        return 0.0;
    }
    MAX_PROXIMITY_BONUS * (1.0 - distance_miles.max(0.0) / radius_miles)
}

/// Relevance of `entry` to the current turn.
#[must_use]
pub fn relevance(
    entry: &MemoryEntry,
    current_message: &str,
    current_location: Option<&Coordinates>,
    radius_miles: f64,
) -> f64 {
    let overlap = text_overlap(entry, current_message);
    let bonus = match (entry.location.as_ref(), current_location) {
        (Some(stored), Some(current)) => {
            proximity_bonus(stored.distance_miles(current), radius_miles)
        }
        _ => 0.0,
    };
    overlap + bonus
}
