//! Conversation runtime: memory recall, consultation, final reply, memory write-back,
//! fusion feedback and the completed-conversation side channel.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_memory::{Coordinates, MemoryStats, TieredMemoryStore};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::LogLevel;
use tokio::{
    task::JoinHandle,
    time::{timeout, Instant},
};
use uuid::Uuid;

use crate::{
    cache::Fingerprint,
    config::ParleyConfig,
    context::{render_memory_context, DocumentRetriever, LocationResolver},
    dispatcher::elapsed_ms,
    error::ConsultationError,
    fusion::FusedOutput,
    inference::TextInferenceClient,
    pipeline::{ConsultationOutcome, ConsultationPipeline},
    request::ConsultationRequest,
    specialist::{ResultStatus, SpecialistResult},
    telemetry::ConsultationTelemetry,
};

/// First line of every final reply prompt.
pub const REPLY_ROLE: &str =
    "You are Parley, a local guide giving accurate, helpful answers for the user's location.";

/// Reply used when the final generation fails.
pub const FALLBACK_REPLY: &str = "I'm having a little trouble right now. If you can share your \
location or the town you're asking about, I'll tailor the answer to your spot on the map.";

/// Source name on side-channel events.
pub const EVENT_SOURCE: &str = "parley";

/// Everything produced by one conversational turn.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationReply {
    /// Identifier of this turn.
    pub consultation_id: Uuid,
    /// Text returned to the user.
    pub reply: String,
    /// Whether the reply was generated or the fallback.
    pub reply_status: ResultStatus,
    /// Directive the reply was written from.
    pub directive: String,
    /// Whether the consultation came from the cache.
    pub cache_hit: bool,
    /// Fusion domain of the query.
    pub domain: String,
    /// Cache slot of the consultation.
    pub fingerprint: Fingerprint,
    /// Specialist results in routing order.
    pub specialists: Vec<SpecialistResult>,
    /// Fused specialist output.
    pub fused: FusedOutput,
    /// Location used for the turn, given or resolved.
    pub location: Option<Coordinates>,
    /// Memory entry recording the turn.
    pub memory_entry: Uuid,
    /// The user's tier occupancy after the turn.
    pub memory_stats: MemoryStats,
    /// Wall time of the whole turn.
    pub elapsed_ms: u64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// Runs conversational turns end to end.
pub struct ConversationRuntime {
    pipeline: ConsultationPipeline,
    memory: Arc<TieredMemoryStore>,
    client: Arc<dyn TextInferenceClient>,
    resolver: Option<Arc<dyn LocationResolver>>,
    sink: Option<Arc<dyn EventPublisher>>,
    reply_timeout: Duration,
    memory_context_limit: usize,
    telemetry: Option<ConsultationTelemetry>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl ConversationRuntime {
    /// Validates `config` and wires a pipeline and memory store around `client`.
    pub fn new(
        client: Arc<dyn TextInferenceClient>,
        config: &ParleyConfig,
    ) -> Result<Self, ConsultationError> {
        config.validate()?;
        let memory = Arc::new(TieredMemoryStore::new(config.memory.clone())?);
        Ok(Self {
            pipeline: ConsultationPipeline::new(Arc::clone(&client), &config.consultation),
            memory,
            client,
            resolver: None,
            sink: None,
            reply_timeout: config.consultation.reply_timeout(),
            memory_context_limit: config.consultation.memory_context_limit,
            telemetry: None,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Shares an existing memory store.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<TieredMemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    /// Resolves locations from the query when none is given.
    #[must_use]
    pub fn with_location_resolver(mut self, resolver: Arc<dyn LocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Adds document snippets to specialist prompts.
    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentRetriever>) -> Self {
        self.pipeline = self.pipeline.with_documents(documents);
        self
    }

    /// Publishes `conversation.completed` records to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventPublisher>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attaches telemetry to the runtime and its pipeline.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ConsultationTelemetry) -> Self {
        self.pipeline = self.pipeline.with_telemetry(telemetry.clone());
        self.telemetry = Some(telemetry);
        self
    }

    /// Consultation pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &ConsultationPipeline {
        &self.pipeline
    }

    /// Memory store.
    #[must_use]
    pub const fn memory(&self) -> &Arc<TieredMemoryStore> {
        &self.memory
    }

    /// Waits for side-channel deliveries still in flight.
    pub async fn flush_events(&self) {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for handle in pending {
            let _ = handle.await;
        }
    }

    /// Runs one turn for `user_id`. Only caller-input errors are returned.
    pub async fn converse(
        &self,
        user_id: &str,
        query: &str,
        location: Option<Coordinates>,
    ) -> Result<ConversationReply, ConsultationError> {
        let start = Instant::now();
        if query.trim().is_empty() {
            return Err(ConsultationError::EmptyQuery);
        }
        let location = match (location, &self.resolver) {
            (Some(location), _) => Some(Coordinates::new(location.lat, location.lng)?),
            (None, Some(resolver)) => resolver.resolve(query).await,
            (None, None) => None,
        };
        let request = ConsultationRequest::classified(query, location)?;

        let memories = self
            .memory
            .retrieve(user_id, query, location.as_ref(), self.memory_context_limit);
        let memory_context = render_memory_context(&memories);
        let outcome = self.pipeline.consult(&request, &memory_context).await;

        let (reply, reply_status) = self
            .final_reply(&request, &outcome.payload.synthesis.directive)
            .await;
        let entry = self.memory.store(user_id, query, &reply, location);
        if !outcome.cache_hit {
            self.record_feedback(&outcome);
        }

        let payload = &outcome.payload;
        let result = ConversationReply {
            consultation_id: Uuid::new_v4(),
            reply,
            reply_status,
            directive: payload.synthesis.directive.clone(),
            cache_hit: outcome.cache_hit,
            domain: payload.domain.clone(),
            fingerprint: payload.fingerprint.clone(),
            specialists: payload.specialists.clone(),
            fused: payload.fused.clone(),
            location,
            memory_entry: entry.id,
            memory_stats: self.memory.stats(user_id),
            elapsed_ms: elapsed_ms(start),
            completed_at: Utc::now(),
        };
        self.publish(user_id, query, &result);
        Ok(result)
    }

    async fn final_reply(&self, request: &ConsultationRequest, directive: &str) -> (String, ResultStatus) {
        let prompt = render_reply_prompt(request, directive);
        match timeout(self.reply_timeout, self.client.generate(&prompt, self.reply_timeout)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => (text, ResultStatus::Success),
            Ok(Ok(_) | Err(_)) | Err(_) => {
                if let Some(tel) = &self.telemetry {
                    let _ = tel.log(
                        LogLevel::Warn,
                        "conversation.reply.fallback",
                        json!({ "domain": request.domain() }),
                    );
                }
                (FALLBACK_REPLY.to_string(), ResultStatus::Fallback)
            }
        }
    }

    /// A specialist was useful when its own call and the synthesis both succeeded.
    fn record_feedback(&self, outcome: &ConsultationOutcome) {
        let payload = &outcome.payload;
        let synthesized = payload.synthesis.succeeded();
        let weights = self.pipeline.weights();
        for result in &payload.specialists {
            weights.record(
                &payload.domain,
                result.specialist.name(),
                synthesized && result.succeeded(),
            );
        }
    }

    fn publish(&self, user_id: &str, query: &str, reply: &ConversationReply) {
        let payload = json!({
            "consultation_id": reply.consultation_id,
            "user_id": user_id,
            "message": query,
            "reply": reply.reply,
            "domain": reply.domain,
            "cache_hit": reply.cache_hit,
            "reply_status": reply.reply_status,
            "specialists": reply
                .specialists
                .iter()
                .map(|r| r.specialist.name())
                .collect::<Vec<_>>(),
            "location": reply.location,
            "elapsed_ms": reply.elapsed_ms,
            "completed_at": reply.completed_at.to_rfc3339(),
        });
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(LogLevel::Info, "conversation.completed", payload.clone());
        }
        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let record = EventRecord::new(EVENT_SOURCE, "conversation.completed", payload);
            let handle = tokio::spawn(async move {
                let _ = sink.publish(record).await;
            });
            let mut pending = self.pending.lock();
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}

/// Renders the final reply prompt from the synthesis directive.
#[must_use]
pub fn render_reply_prompt(request: &ConsultationRequest, directive: &str) -> String {
    let location = request.location().map_or_else(
        || "USER LOCATION: not available".to_string(),
        |location| format!("USER LOCATION: {:.4}, {:.4}", location.lat, location.lng),
    );
    format!(
        "{REPLY_ROLE}\n\nUSER QUERY: \"{}\"\n\n{location}\n\nRESPONSE STRATEGY:\n{directive}\n\n\
         INSTRUCTIONS:\nBe precise to the user's location.\nReference local landmarks and resources.\n\
         200-400 words, focused, location-specific.",
        request.query()
    )
}
