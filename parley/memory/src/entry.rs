use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinates;

/// Retention tier holding a memory entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Most recent turns.
    Working,
    /// Turns rotated out of working memory.
    ShortTerm,
    /// Important turns rotated out of short-term memory.
    LongTerm,
}

impl MemoryTier {
    /// Stable label used in telemetry.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

/// One recorded conversational turn. Never edited after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Owner of the turn.
    pub user_id: String,
    /// User message.
    pub message: String,
    /// Reply given for the message.
    pub response: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Store-wide capture order; breaks timestamp ties.
    pub sequence: u64,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Topics detected in message and response.
    pub topics: IndexSet<String>,
    /// Where the turn happened, when known.
    pub location: Option<Coordinates>,
}

/// Annotation attached to an entry after the fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feedback {
    /// Whether the reply helped.
    pub useful: bool,
    /// Optional free-form note.
    pub note: Option<String>,
    /// When the annotation was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Feedback {
    /// Creates an annotation stamped now.
    #[must_use]
    pub fn new(useful: bool, note: Option<String>) -> Self {
        Self {
            useful,
            note,
            recorded_at: Utc::now(),
        }
    }
}

/// Entry returned by retrieval together with its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    /// The retrieved entry.
    pub entry: MemoryEntry,
    /// Tier the entry lived in at retrieval time.
    pub tier: MemoryTier,
    /// Text overlap plus proximity bonus.
    pub relevance: f64,
}

/// Per-user tier occupancy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryStats {
    /// Entries in working memory.
    pub working: usize,
    /// Entries in short-term memory.
    pub short_term: usize,
    /// Entries in long-term memory.
    pub long_term: usize,
    /// Occupied spatial index cells, across all users.
    pub location_cells: usize,
    /// Sum of the three tiers.
    pub total: usize,
}
