use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::time::{timeout, Instant};

use crate::{
    dispatcher::elapsed_ms,
    error::{InferenceError, StageFailure},
    fusion::FusedOutput,
    inference::TextInferenceClient,
    request::ConsultationRequest,
    specialist::ResultStatus,
    telemetry::ConsultationTelemetry,
};

/// Default bound on the synthesis call.
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_millis(45_000);

/// First line of every synthesis prompt.
pub const SYNTHESIS_ROLE: &str = "Synthesis judge for a panel of specialists";

/// Directive returned whenever synthesis cannot run or fails.
pub const FALLBACK_DIRECTIVE: &str = "PRIMARY_FOCUS: Location-specific guidance\n\
KEY_MESSAGE_1: Address user's question with geographic precision\n\
KEY_MESSAGE_2: Use local resources\n\
DELIVERY_STYLE: Local, precise\n\
AVOID: Generic advice";

/// Directive produced from the fused specialist output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Response strategy handed to the final reply.
    pub directive: String,
    /// Success or fallback.
    pub status: ResultStatus,
    /// Reason for a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    /// Wall time spent on the call.
    pub latency_ms: u64,
}

impl SynthesisResult {
    /// The fixed fallback directive.
    #[must_use]
    pub fn fallback(failure: StageFailure, latency_ms: u64) -> Self {
        Self {
            directive: FALLBACK_DIRECTIVE.to_string(),
            status: ResultStatus::Fallback,
            failure: Some(failure),
            latency_ms,
        }
    }

    /// True when the directive came from the model.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Renders the synthesis prompt.
#[must_use]
pub fn render_prompt(request: &ConsultationRequest, fused: &FusedOutput, memory_context: &str) -> String {
    let location = request.location().map_or_else(
        || "USER LOCATION: not available".to_string(),
        |location| format!("USER LOCATION: {:.4}, {:.4}", location.lat, location.lng),
    );
    let mut prompt = format!(
        "{SYNTHESIS_ROLE}\n\
         Synthesize into a location-precise plan with PRIMARY_FOCUS, KEY_MESSAGE_1..3, \
         DELIVERY_STYLE, LOCAL_RESOURCES, AVOID.\n\n{location}\n\nUSER QUERY: \"{}\"\n",
        request.query()
    );
    if !memory_context.is_empty() {
        prompt.push_str(&format!("\nMEMORY CONTEXT:\n{memory_context}\n"));
    }
    prompt.push_str(&format!(
        "\nSPECIALIST INPUTS (FUSED, CONFIDENCE-WEIGHTED):\n{}\n\n\
         Synthesize into ONE response strategy. Strongest inputs first.",
        fused.render()
    ));
    prompt
}

/// Turns fused specialist output into one directive.
pub struct SynthesisStage {
    client: Arc<dyn TextInferenceClient>,
    timeout: Duration,
    telemetry: Option<ConsultationTelemetry>,
}

impl SynthesisStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(client: Arc<dyn TextInferenceClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<ConsultationTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// One bounded call, no retries. Empty fused input skips the call.
    pub async fn synthesize(
        &self,
        request: &ConsultationRequest,
        fused: &FusedOutput,
        memory_context: &str,
    ) -> SynthesisResult {
        if fused.is_empty() {
            let result = SynthesisResult::fallback(StageFailure::NoSpecialistInput, 0);
            self.emit(&result, None);
            return result;
        }
        let prompt = render_prompt(request, fused, memory_context);
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
        let (result, error) = match outcome {
            Ok(directive) => (
                SynthesisResult {
                    directive,
                    status: ResultStatus::Success,
                    failure: None,
                    latency_ms,
                },
                None,
            ),
            Err(err) => (
                SynthesisResult::fallback(StageFailure::synthesis(&err), latency_ms),
                Some(err),
            ),
        };
        self.emit(&result, error.as_ref());
        result
    }

    fn emit(&self, result: &SynthesisResult, error: Option<&InferenceError>) {
        let Some(tel) = &self.telemetry else {
            return;
        };
        let (event, level) = if result.succeeded() {
            ("consultation.synthesis.completed", LogLevel::Debug)
        } else {
            ("consultation.synthesis.fallback", LogLevel::Warn)
        };
        let payload = json!({
            "latency_ms": result.latency_ms,
            "failure": result.failure,
            "error": error.map(ToString::to_string),
        });
        let _ = tel.log(level, event, payload.clone());
        let _ = tel.event(event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fusion::{AdaptiveFusionWeights, FusionCandidate},
        specialist::{SpecialistId, SpecialistResult},
        testing::ScriptedClient,
    };

    fn fused() -> FusedOutput {
        let result = SpecialistResult::success(SpecialistId::Creative, "host a porch concert".into(), 3);
        AdaptiveFusionWeights::new().fuse("general", vec![FusionCandidate::from(&result)])
    }

    fn request() -> ConsultationRequest {
        ConsultationRequest::new("Ideas for a block party?", None, [SpecialistId::Creative]).unwrap()
    }

    #[tokio::test]
    async fn directive_comes_from_one_call() {
        let client = Arc::new(ScriptedClient::new().respond(SYNTHESIS_ROLE, "PRIMARY_FOCUS: music"));
        let stage = SynthesisStage::new(client.clone(), DEFAULT_SYNTHESIS_TIMEOUT);
        let result = stage.synthesize(&request(), &fused(), "Prev: \"bbq\"").await;
        assert!(result.succeeded());
        assert_eq!(result.directive, "PRIMARY_FOCUS: music");
        assert_eq!(client.calls(), 1);
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("CREATIVE (w=0.75):\nhost a porch concert"));
        assert!(prompt.contains("MEMORY CONTEXT:\nPrev: \"bbq\""));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_fixed_directive() {
        let client = Arc::new(
            ScriptedClient::new().delay(SYNTHESIS_ROLE, Duration::from_secs(90)),
        );
        let stage = SynthesisStage::new(client.clone(), DEFAULT_SYNTHESIS_TIMEOUT);
        let result = stage.synthesize(&request(), &fused(), "").await;
        assert_eq!(result.directive, FALLBACK_DIRECTIVE);
        assert_eq!(result.failure, Some(StageFailure::SynthesisTimeout));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_yields_fixed_directive() {
        let client = Arc::new(
            ScriptedClient::new().fail(SYNTHESIS_ROLE, InferenceError::Transport("reset".into())),
        );
        let stage = SynthesisStage::new(client, DEFAULT_SYNTHESIS_TIMEOUT);
        let result = stage.synthesize(&request(), &fused(), "").await;
        assert_eq!(result.failure, Some(StageFailure::SynthesisTransportError));
        assert_eq!(result.status, ResultStatus::Fallback);
    }

    #[tokio::test]
    async fn empty_input_skips_the_model() {
        let client = Arc::new(ScriptedClient::new());
        let stage = SynthesisStage::new(client.clone(), DEFAULT_SYNTHESIS_TIMEOUT);
        let result = stage
            .synthesize(&request(), &FusedOutput::default(), "")
            .await;
        assert_eq!(result.directive, FALLBACK_DIRECTIVE);
        assert_eq!(result.failure, Some(StageFailure::NoSpecialistInput));
        assert_eq!(client.calls(), 0);
    }
}
