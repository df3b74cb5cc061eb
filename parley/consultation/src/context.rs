//! Prompt context plus the document and location ports.

use std::collections::HashSet;

use async_trait::async_trait;
use parley_memory::{Coordinates, ScoredMemory};

/// Characters of a stored response quoted in memory context.
pub const MEMORY_RESPONSE_PREVIEW: usize = 160;

/// Context shared by every specialist prompt of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Rendered memory context.
    pub memory: String,
    /// Document snippets relevant to the query.
    pub documents: Vec<String>,
}

/// One line per retrieved memory, most relevant first.
#[must_use]
pub fn render_memory_context(memories: &[ScoredMemory]) -> String {
    memories
        .iter()
        .map(|scored| {
            let entry = &scored.entry;
            let preview: String = entry.response.chars().take(MEMORY_RESPONSE_PREVIEW).collect();
            let ellipsis = if entry.response.chars().count() > MEMORY_RESPONSE_PREVIEW {
                "..."
            } else {
                ""
            };
            let mut line = format!("Prev: \"{}\" -> \"{preview}{ellipsis}\"", entry.message);
            if let Some(location) = &entry.location {
                line.push_str(&format!(" (Loc: {:.4}, {:.4})", location.lat, location.lng));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Supplies short text snippets relevant to a query.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Returns at most `limit` snippets, best first.
    async fn retrieve(&self, query: &str, limit: usize) -> Vec<String>;
}

/// Maps a free-text location hint to coordinates.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// Coordinates for `hint`, if it names a known place.
    async fn resolve(&self, hint: &str) -> Option<Coordinates>;
}

/// In-memory documents split into paragraphs and scored by query word hits.
#[derive(Debug, Clone, Default)]
pub struct ParagraphRetriever {
    paragraphs: Vec<(String, String)>,
}

impl ParagraphRetriever {
    /// Creates an empty retriever.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document; blank-line separated blocks become paragraphs.
    #[must_use]
    pub fn with_document(mut self, title: impl Into<String>, body: &str) -> Self {
        let title = title.into();
        let mut current = Vec::new();
        for line in body.lines().chain(std::iter::once("")) {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    self.paragraphs.push((title.clone(), current.join("\n")));
                    current.clear();
                }
            } else {
                current.push(line.trim_end());
            }
        }
        self
    }

    /// Number of indexed paragraphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    /// True when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    fn rank(&self, query: &str, limit: usize) -> Vec<String> {
        let words: HashSet<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.chars().count() > 3)
            .collect();
        if words.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, usize)> = self
            .paragraphs
            .iter()
            .enumerate()
            .filter_map(|(idx, (_, text))| {
                let lower = text.to_lowercase();
                let hits = words.iter().filter(|w| lower.contains(w.as_str())).count();
                (hits > 0).then_some((idx, hits))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(limit)
            .map(|(idx, _)| {
                let (title, text) = &self.paragraphs[idx];
                format!("[{title}] {text}")
            })
            .collect()
    }
}

#[async_trait]
impl DocumentRetriever for ParagraphRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Vec<String> {
        self.rank(query, limit)
    }
}

/// Resolves place names mentioned in the hint against a fixed gazetteer.
#[derive(Debug, Clone, Default)]
pub struct GazetteerResolver {
    places: Vec<(String, Coordinates)>,
}

impl GazetteerResolver {
    /// Creates an empty gazetteer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a place name.
    #[must_use]
    pub fn with_place(mut self, name: impl Into<String>, location: Coordinates) -> Self {
        self.places.push((name.into().to_lowercase(), location));
        self
    }
}

#[async_trait]
impl LocationResolver for GazetteerResolver {
    async fn resolve(&self, hint: &str) -> Option<Coordinates> {
        let lower = hint.to_lowercase();
        // Longest name first so "south charleston" beats "charleston".
        self.places
            .iter()
            .filter(|(name, _)| lower.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, location)| *location)
    }
}
