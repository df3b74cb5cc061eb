//! Tiered memory store: per-user tiers plus a location index shared across users.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    config::{MemoryConfig, MemoryError},
    entry::{Feedback, MemoryEntry, MemoryStats, MemoryTier, ScoredMemory},
    geo::{Coordinates, GridKey},
    scoring::{extract_topics, importance, relevance},
    telemetry::MemoryTelemetry,
    tiers::BoundedTier,
};

#[derive(Debug)]
struct UserMemory {
    working: BoundedTier,
    short_term: BoundedTier,
    long_term: BoundedTier,
    topics: HashMap<String, Vec<Uuid>>,
}

impl UserMemory {
    fn new(config: &MemoryConfig) -> Self {
        Self {
            working: BoundedTier::new(config.working_capacity),
            short_term: BoundedTier::new(config.short_term_capacity),
            long_term: BoundedTier::new(config.long_term_capacity),
            topics: HashMap::new(),
        }
    }

    fn tier(&self, tier: MemoryTier) -> &BoundedTier {
        match tier {
            MemoryTier::Working => &self.working,
            MemoryTier::ShortTerm => &self.short_term,
            MemoryTier::LongTerm => &self.long_term,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (MemoryTier, &MemoryEntry)> + '_ {
        [MemoryTier::Working, MemoryTier::ShortTerm, MemoryTier::LongTerm]
            .into_iter()
            .flat_map(move |tier| self.tier(tier).iter().map(move |entry| (tier, entry)))
    }

    fn locate(&self, id: &Uuid) -> Option<(MemoryTier, &MemoryEntry)> {
        [MemoryTier::Working, MemoryTier::ShortTerm, MemoryTier::LongTerm]
            .into_iter()
            .find_map(|tier| self.tier(tier).get(id).map(|entry| (tier, entry)))
    }

    /// Moves a working-tier overflow into short-term; short-term overflow goes on to
    /// long-term only above the promotion threshold.
    fn promote(
        &mut self,
        entry: MemoryEntry,
        config: &MemoryConfig,
        moves: &mut Vec<Movement>,
        discarded: &mut Vec<(MemoryTier, MemoryEntry)>,
    ) {
        moves.push(Movement::Promoted {
            id: entry.id,
            to: MemoryTier::ShortTerm,
        });
        let Some(overflow) = self.short_term.push(entry) else {
            return;
        };
        if overflow.importance > config.promotion_threshold {
            moves.push(Movement::Promoted {
                id: overflow.id,
                to: MemoryTier::LongTerm,
            });
            if let Some(evicted) = self.long_term.push(overflow) {
                discarded.push((MemoryTier::LongTerm, evicted));
            }
        } else {
            discarded.push((MemoryTier::ShortTerm, overflow));
        }
    }

    fn forget_topics(&mut self, entry: &MemoryEntry) {
        for topic in &entry.topics {
            if let Some(ids) = self.topics.get_mut(topic) {
                ids.retain(|id| *id != entry.id);
                if ids.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct EntryRef {
    user_id: String,
    id: Uuid,
}

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<String, UserMemory>,
    spatial: HashMap<GridKey, Vec<EntryRef>>,
    annotations: HashMap<Uuid, Vec<Feedback>>,
}

#[derive(Debug, Clone, Copy)]
enum Movement {
    Promoted { id: Uuid, to: MemoryTier },
    Evicted { id: Uuid, from: MemoryTier },
}

impl StoreState {
    fn insert(&mut self, entry: MemoryEntry, config: &MemoryConfig) -> Vec<Movement> {
        let Self {
            users,
            spatial,
            annotations,
        } = self;
        if let Some(location) = entry.location {
            spatial
                .entry(location.grid_key())
                .or_default()
                .push(EntryRef {
                    user_id: entry.user_id.clone(),
                    id: entry.id,
                });
        }
        let user = users
            .entry(entry.user_id.clone())
            .or_insert_with(|| UserMemory::new(config));
        for topic in &entry.topics {
            user.topics.entry(topic.clone()).or_default().push(entry.id);
        }

        let mut moves = Vec::new();
        let mut discarded = Vec::new();
        if let Some(overflow) = user.working.push(entry) {
            user.promote(overflow, config, &mut moves, &mut discarded);
        }

        for (from, entry) in discarded {
            user.forget_topics(&entry);
            annotations.remove(&entry.id);
            if let Some(location) = entry.location {
                let key = location.grid_key();
                if let Some(refs) = spatial.get_mut(&key) {
                    refs.retain(|r| r.id != entry.id);
                    if refs.is_empty() {
                        spatial.remove(&key);
                    }
                }
            }
            moves.push(Movement::Evicted { id: entry.id, from });
        }
        moves
    }
}

/// Per-user tiered conversation memory.
#[derive(Debug)]
pub struct TieredMemoryStore {
    config: MemoryConfig,
    state: RwLock<StoreState>,
    sequence: AtomicU64,
    telemetry: Option<MemoryTelemetry>,
}

impl TieredMemoryStore {
    /// Creates an empty store after validating `config`.
    pub fn new(config: MemoryConfig) -> Result<Self, MemoryError> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(StoreState::default()),
            sequence: AtomicU64::new(0),
            telemetry: None,
        })
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: MemoryTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Records one turn in the user's working tier, rotating older turns down.
    pub fn store(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        location: Option<Coordinates>,
    ) -> MemoryEntry {
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            importance: importance(message, response),
            topics: extract_topics(&format!("{message} {response}")),
            location,
        };
        let moves = self.state.write().insert(entry.clone(), &self.config);
        self.report(&entry, &moves);
        entry
    }

    fn report(&self, entry: &MemoryEntry, moves: &[Movement]) {
        let Some(tel) = &self.telemetry else {
            return;
        };
        let _ = tel.log(
            LogLevel::Info,
            "memory.stored",
            json!({
                "user_id": entry.user_id,
                "id": entry.id,
                "importance": entry.importance,
                "topics": entry.topics,
            }),
        );
        let _ = tel.event(
            "memory.stored",
            json!({ "user_id": entry.user_id, "id": entry.id }),
        );
        for movement in moves {
            let (event, payload) = match movement {
                Movement::Promoted { id, to } => {
                    ("memory.promoted", json!({ "id": id, "to": to.label() }))
                }
                Movement::Evicted { id, from } => {
                    ("memory.evicted", json!({ "id": id, "from": from.label() }))
                }
            };
            let _ = tel.log(LogLevel::Debug, event, payload.clone());
            let _ = tel.event(event, payload);
        }
    }

    /// Top `limit` memories for the current turn, most relevant first.
    ///
    /// Candidates are every tier of `user_id` plus, when a location is given, turns
    /// indexed in the surrounding grid cells. Ties on relevance go to the newer turn.
    #[must_use]
    pub fn retrieve(
        &self,
        user_id: &str,
        current_message: &str,
        current_location: Option<&Coordinates>,
        limit: usize,
    ) -> Vec<ScoredMemory> {
        if limit == 0 {
            return Vec::new();
        }
        let radius = self.config.proximity_radius_miles;
        let state = self.state.read();
        let mut seen = HashSet::new();
        let mut scored = Vec::new();
        let mut consider = |tier: MemoryTier, entry: &MemoryEntry| {
            if seen.insert(entry.id) {
                scored.push(ScoredMemory {
                    relevance: relevance(entry, current_message, current_location, radius),
                    tier,
                    entry: entry.clone(),
                });
            }
        };

        if let Some(user) = state.users.get(user_id) {
            for (tier, entry) in user.iter() {
                consider(tier, entry);
            }
        }
        if let Some(location) = current_location {
            for cell in location.grid_key().neighbourhood() {
                for entry_ref in state.spatial.get(&cell).into_iter().flatten() {
                    if !self.config.share_location_index && entry_ref.user_id != user_id {
                        continue;
                    }
                    if let Some((tier, entry)) = state
                        .users
                        .get(&entry_ref.user_id)
                        .and_then(|user| user.locate(&entry_ref.id))
                    {
                        consider(tier, entry);
                    }
                }
            }
        }
        drop(state);

        scored.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
                .then_with(|| b.entry.sequence.cmp(&a.entry.sequence))
        });
        scored.truncate(limit);
        scored
    }

    /// Tier currently holding the entry, if it is still live.
    #[must_use]
    pub fn tier_of(&self, user_id: &str, id: &Uuid) -> Option<MemoryTier> {
        self.state
            .read()
            .users
            .get(user_id)
            .and_then(|user| user.locate(id))
            .map(|(tier, _)| tier)
    }

    /// Contents of one tier, oldest first.
    #[must_use]
    pub fn snapshot(&self, user_id: &str, tier: MemoryTier) -> Vec<MemoryEntry> {
        self.state
            .read()
            .users
            .get(user_id)
            .map(|user| user.tier(tier).snapshot())
            .unwrap_or_default()
    }

    /// Occupancy of the user's tiers.
    #[must_use]
    pub fn stats(&self, user_id: &str) -> MemoryStats {
        let state = self.state.read();
        let location_cells = state.spatial.len();
        state.users.get(user_id).map_or(
            MemoryStats {
                location_cells,
                ..MemoryStats::default()
            },
            |user| {
                let working = user.working.len();
                let short_term = user.short_term.len();
                let long_term = user.long_term.len();
                MemoryStats {
                    working,
                    short_term,
                    long_term,
                    location_cells,
                    total: working + short_term + long_term,
                }
            },
        )
    }

    /// Live entries tagged with `topic`, in capture order.
    #[must_use]
    pub fn entries_with_topic(&self, user_id: &str, topic: &str) -> Vec<MemoryEntry> {
        let state = self.state.read();
        let Some(user) = state.users.get(user_id) else {
            return Vec::new();
        };
        user.topics
            .get(topic)
            .into_iter()
            .flatten()
            .filter_map(|id| user.locate(id).map(|(_, entry)| entry.clone()))
            .collect()
    }

    /// Attaches feedback to a live entry without modifying it.
    pub fn annotate(&self, user_id: &str, id: Uuid, feedback: Feedback) -> Result<(), MemoryError> {
        let mut state = self.state.write();
        let live = state
            .users
            .get(user_id)
            .is_some_and(|user| user.locate(&id).is_some());
        if !live {
            return Err(MemoryError::UnknownEntry(id));
        }
        state.annotations.entry(id).or_default().push(feedback);
        Ok(())
    }

    /// Feedback recorded for an entry, oldest first.
    #[must_use]
    pub fn annotations(&self, id: &Uuid) -> Vec<Feedback> {
        self.state
            .read()
            .annotations
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}
