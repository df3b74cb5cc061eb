//! Cache check, dispatch, fusion, synthesis and cache store for one request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::time::Instant;

use crate::{
    cache::{Fingerprint, FingerprintCache},
    config::ConsultationSettings,
    context::{DocumentRetriever, PromptContext},
    dispatcher::{elapsed_ms, SpecialistDispatcher},
    fusion::{AdaptiveFusionWeights, FusedOutput, FusionCandidate},
    inference::TextInferenceClient,
    request::ConsultationRequest,
    specialist::SpecialistResult,
    synthesis::{SynthesisResult, SynthesisStage},
    telemetry::ConsultationTelemetry,
};

/// States of one consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Looking up the fingerprint.
    CacheCheck,
    /// Consulting specialists.
    Dispatch,
    /// Ordering specialist output by weight.
    Fuse,
    /// Producing the directive.
    Synthesize,
    /// A stage degraded to its fallback value.
    ErrorFallback,
    /// Writing the payload to the cache.
    CacheStore,
    /// Terminal state.
    Done,
}

/// Everything a consultation produces; what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationPayload {
    /// Cache slot of the payload.
    pub fingerprint: Fingerprint,
    /// Fusion domain.
    pub domain: String,
    /// Specialist results in routing order.
    pub specialists: Vec<SpecialistResult>,
    /// Fused specialist output.
    pub fused: FusedOutput,
    /// Directive built from the fused output.
    pub synthesis: SynthesisResult,
}

/// Result of [`ConsultationPipeline::consult`].
#[derive(Debug, Clone)]
pub struct ConsultationOutcome {
    /// Cached or freshly computed payload.
    pub payload: Arc<ConsultationPayload>,
    /// Whether the payload was served from the cache.
    pub cache_hit: bool,
    /// States visited, ending in [`PipelineStage::Done`].
    pub stages: Vec<PipelineStage>,
    /// Wall time of the consultation.
    pub elapsed_ms: u64,
}

/// Runs consultations against shared cache and fusion state.
pub struct ConsultationPipeline {
    cache: Arc<FingerprintCache>,
    weights: Arc<AdaptiveFusionWeights>,
    dispatcher: SpecialistDispatcher,
    synthesis: SynthesisStage,
    documents: Option<Arc<dyn DocumentRetriever>>,
    document_limit: usize,
    grid_precision: u32,
    telemetry: Option<ConsultationTelemetry>,
}

impl ConsultationPipeline {
    /// Builds a pipeline with a fresh cache and fusion ledger.
    #[must_use]
    pub fn new(client: Arc<dyn TextInferenceClient>, settings: &ConsultationSettings) -> Self {
        let weights = if settings.adaptive_weights {
            AdaptiveFusionWeights::adaptive()
        } else {
            AdaptiveFusionWeights::new()
        };
        Self {
            cache: Arc::new(FingerprintCache::new(settings.cache_ttl())),
            weights: Arc::new(weights),
            dispatcher: SpecialistDispatcher::new(
                Arc::clone(&client),
                settings.specialist_timeout(),
                settings.max_concurrency,
            ),
            synthesis: SynthesisStage::new(client, settings.synthesis_timeout()),
            documents: None,
            document_limit: settings.document_limit,
            grid_precision: settings.location_grid_precision,
            telemetry: None,
        }
    }

    /// Shares an existing cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Shares an existing fusion ledger.
    #[must_use]
    pub fn with_weights(mut self, weights: Arc<AdaptiveFusionWeights>) -> Self {
        self.weights = weights;
        self
    }

    /// Adds document snippets to specialist prompts.
    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentRetriever>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Attaches telemetry to every stage.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ConsultationTelemetry) -> Self {
        self.dispatcher = self.dispatcher.with_telemetry(Some(telemetry.clone()));
        self.synthesis = self.synthesis.with_telemetry(Some(telemetry.clone()));
        self.telemetry = Some(telemetry);
        self
    }

    /// Payload cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Fusion ledger.
    #[must_use]
    pub const fn weights(&self) -> &Arc<AdaptiveFusionWeights> {
        &self.weights
    }

    /// Cache slot for `request`.
    #[must_use]
    pub fn fingerprint(&self, request: &ConsultationRequest) -> Fingerprint {
        Fingerprint::compute(request.query(), request.location(), self.grid_precision)
    }

    /// Runs the request to completion. Never fails: stage failures become fallbacks.
    pub async fn consult(
        &self,
        request: &ConsultationRequest,
        memory_context: &str,
    ) -> ConsultationOutcome {
        let start = Instant::now();
        let fingerprint = self.fingerprint(request);
        let mut stages = vec![PipelineStage::CacheCheck];

        if let Some(payload) = self.cache.get(&fingerprint) {
            stages.push(PipelineStage::Done);
            self.emit(
                LogLevel::Debug,
                "consultation.cache.hit",
                json!({ "fingerprint": fingerprint }),
            );
            return ConsultationOutcome {
                payload,
                cache_hit: true,
                stages,
                elapsed_ms: elapsed_ms(start),
            };
        }
        self.emit(
            LogLevel::Debug,
            "consultation.cache.miss",
            json!({ "fingerprint": fingerprint }),
        );

        stages.push(PipelineStage::Dispatch);
        let documents = match &self.documents {
            Some(retriever) if self.document_limit > 0 => {
                retriever.retrieve(request.query(), self.document_limit).await
            }
            _ => Vec::new(),
        };
        let context = PromptContext {
            memory: memory_context.to_string(),
            documents,
        };
        let mut results = self.dispatcher.dispatch(request, &context).await;
        let specialists: Vec<SpecialistResult> = request
            .routing()
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();
        if specialists.iter().any(|result| !result.succeeded()) {
            stages.push(PipelineStage::ErrorFallback);
        }

        stages.push(PipelineStage::Fuse);
        let fused = self.weights.fuse(
            request.domain(),
            specialists.iter().map(FusionCandidate::from).collect(),
        );

        stages.push(PipelineStage::Synthesize);
        let synthesis = self.synthesis.synthesize(request, &fused, memory_context).await;
        if !synthesis.succeeded() {
            stages.push(PipelineStage::ErrorFallback);
        }

        stages.push(PipelineStage::CacheStore);
        let payload = Arc::new(ConsultationPayload {
            fingerprint: fingerprint.clone(),
            domain: request.domain().to_string(),
            specialists,
            fused,
            synthesis,
        });
        self.cache.put(fingerprint, Arc::clone(&payload));
        stages.push(PipelineStage::Done);

        let elapsed_ms = elapsed_ms(start);
        let fallbacks = payload
            .specialists
            .iter()
            .filter(|result| !result.succeeded())
            .count();
        self.emit(
            LogLevel::Info,
            "consultation.completed",
            json!({
                "fingerprint": payload.fingerprint,
                "domain": payload.domain,
                "specialists": payload.specialists.len(),
                "fallbacks": fallbacks,
                "synthesis": payload.synthesis.status,
                "elapsed_ms": elapsed_ms,
            }),
        );
        ConsultationOutcome {
            payload,
            cache_hit: false,
            stages,
            elapsed_ms,
        }
    }

    fn emit(&self, level: LogLevel, event: &str, payload: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, event, payload.clone());
            let _ = tel.event(event, payload);
        }
    }
}
