#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Location-aware consultation: a panel of specialists answers in parallel, their
//! output is fused by confidence and a judge turns it into one response strategy.

/// Fingerprint cache for completed consultations.
pub mod cache;
/// TOML configuration.
pub mod config;
/// Prompt context: memory lines, documents, location hints.
pub mod context;
/// Concurrent, bounded specialist calls.
pub mod dispatcher;
/// Error and failure types.
pub mod error;
/// Confidence-weighted fusion and feedback.
pub mod fusion;
/// Text-generation backends.
pub mod inference;
/// Cache, dispatch, fusion, synthesis.
pub mod pipeline;
/// Validated consultation requests.
pub mod request;
/// Keyword routing into reasoning categories.
pub mod routing;
/// The specialist panel.
pub mod specialist;
/// Synthesis judge.
pub mod synthesis;

#[cfg(test)]
mod testing;

/// Telemetry helpers for the consultation pipeline.
#[path = "../telemetry.rs"]
pub mod telemetry;

#[path = "../main.rs"]
pub mod orchestration_entry;

pub use cache::{Fingerprint, FingerprintCache};
pub use config::{ConsultationSettings, EventsConfig, InferenceConfig, ParleyConfig};
pub use context::{
    DocumentRetriever, GazetteerResolver, LocationResolver, ParagraphRetriever, PromptContext,
};
pub use dispatcher::SpecialistDispatcher;
pub use error::{ConsultationError, InferenceError, StageFailure};
pub use fusion::{AdaptiveFusionWeights, FusedEntry, FusedOutput, FusionCandidate, FusionWeightRecord};
pub use inference::{HttpInferenceClient, TextInferenceClient};
pub use orchestration_entry::{ConversationReply, ConversationRuntime};
pub use pipeline::{ConsultationOutcome, ConsultationPayload, ConsultationPipeline, PipelineStage};
pub use request::ConsultationRequest;
pub use routing::{classify, Classification, ReasoningMode};
pub use specialist::{DepthTag, ResultStatus, SpecialistId, SpecialistResult};
pub use synthesis::{SynthesisResult, SynthesisStage};
pub use telemetry::{ConsultationTelemetry, ConsultationTelemetryBuilder};
