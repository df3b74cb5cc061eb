use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{stream, StreamExt};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::time::{timeout, Instant};

use crate::{
    context::PromptContext,
    error::{InferenceError, StageFailure},
    inference::TextInferenceClient,
    request::ConsultationRequest,
    specialist::{render_prompt, SpecialistId, SpecialistResult},
    telemetry::ConsultationTelemetry,
};

/// Default bound on one specialist call.
pub const DEFAULT_SPECIALIST_TIMEOUT: Duration = Duration::from_millis(35_000);

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Fans a request out to its routed specialists.
pub struct SpecialistDispatcher {
    client: Arc<dyn TextInferenceClient>,
    timeout: Duration,
    max_concurrency: usize,
    telemetry: Option<ConsultationTelemetry>,
}

impl SpecialistDispatcher {
    /// Creates a dispatcher; concurrency below one is raised to one.
    #[must_use]
    pub fn new(client: Arc<dyn TextInferenceClient>, timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            client,
            timeout,
            max_concurrency: max_concurrency.max(1),
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<ConsultationTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Per-specialist bound.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One result per routed specialist. Failures and timeouts become fallback results.
    pub async fn dispatch(
        &self,
        request: &ConsultationRequest,
        context: &PromptContext,
    ) -> HashMap<SpecialistId, SpecialistResult> {
        if request.routing().is_empty() {
            return HashMap::new();
        }
        stream::iter(request.routing().iter().copied())
            .map(|specialist| {
                let prompt = render_prompt(specialist, request, context);
                async move { (specialist, self.consult(specialist, prompt).await) }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }

    async fn consult(&self, specialist: SpecialistId, prompt: String) -> SpecialistResult {
        let start = Instant::now();
        let outcome = match timeout(self.timeout, self.client.generate(&prompt, self.timeout)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Err(InferenceError::EmptyCompletion),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(InferenceError::Timeout {
                elapsed_ms: elapsed_ms(start),
            }),
        };
        let latency_ms = elapsed_ms(start);
        match outcome {
            Ok(text) => {
                self.emit(
                    "consultation.specialist.completed",
                    json!({ "specialist": specialist, "latency_ms": latency_ms }),
                );
                SpecialistResult::success(specialist, text, latency_ms)
            }
            Err(err) => {
                let failure = StageFailure::specialist(&err);
                self.emit(
                    "consultation.specialist.fallback",
                    json!({
                        "specialist": specialist,
                        "latency_ms": latency_ms,
                        "failure": failure,
                        "error": err.to_string(),
                    }),
                );
                SpecialistResult::fallback(specialist, failure, latency_ms)
            }
        }
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let level = if event.ends_with("fallback") {
                LogLevel::Warn
            } else {
                LogLevel::Debug
            };
            let _ = tel.log(level, event, payload.clone());
            let _ = tel.event(event, payload);
        }
    }
}
