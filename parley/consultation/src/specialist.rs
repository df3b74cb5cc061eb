//! Closed specialist roster, depth tags and prompt rendering.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{context::PromptContext, error::StageFailure, request::ConsultationRequest};

/// Reasoning depth attached to a specialist; scales its fusion weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthTag {
    /// Deep domain expertise.
    Expert,
    /// Advanced multi-step reasoning.
    Advanced,
    /// Numeric and quantitative analysis.
    Quantitative,
    /// Nuanced, values-oriented reasoning.
    Nuanced,
    /// Anything else.
    Basic,
}

impl DepthTag {
    /// Fusion quality multiplier.
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            Self::Expert => 4.0,
            Self::Advanced | Self::Quantitative => 3.0,
            Self::Nuanced => 2.0,
            Self::Basic => 1.0,
        }
    }

    /// Lower-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Expert => "expert",
            Self::Advanced => "advanced",
            Self::Quantitative => "quantitative",
            Self::Nuanced => "nuanced",
            Self::Basic => "basic",
        }
    }

    /// Parses a label; unknown labels are [`DepthTag::Basic`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "expert" => Self::Expert,
            "advanced" => Self::Advanced,
            "quantitative" => Self::Quantitative,
            "nuanced" => Self::Nuanced,
            _ => Self::Basic,
        }
    }
}

/// Specialists that can be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialistId {
    /// Creative, place-aware ideas.
    Creative,
    /// Technical and geodetic precision.
    Technical,
    /// Community values and place-based wisdom.
    Spiritual,
    /// Local economics and money.
    Financial,
}

impl SpecialistId {
    /// Every specialist, in declaration order.
    pub const ALL: [Self; 4] = [Self::Creative, Self::Technical, Self::Spiritual, Self::Financial];

    /// Lower-case name used as the fusion key.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Creative => "creative",
            Self::Technical => "technical",
            Self::Spiritual => "spiritual",
            Self::Financial => "financial",
        }
    }

    /// Weight before the depth multiplier.
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::Creative | Self::Financial => 0.25,
            Self::Technical => 0.30,
            Self::Spiritual => 0.20,
        }
    }

    /// Depth tag of this specialist.
    #[must_use]
    pub const fn depth(self) -> DepthTag {
        match self {
            Self::Creative => DepthTag::Advanced,
            Self::Technical => DepthTag::Expert,
            Self::Spiritual => DepthTag::Nuanced,
            Self::Financial => DepthTag::Quantitative,
        }
    }

    /// Role line opening the specialist's prompt.
    #[must_use]
    pub const fn role(self) -> &'static str {
        match self {
            Self::Creative => "Creative specialist with location-aware reasoning",
            Self::Technical => "Technical specialist with geodetic precision",
            Self::Spiritual => "Community and values specialist with place-based wisdom",
            Self::Financial => "Financial specialist with local economic analysis",
        }
    }

    const fn instruction(self) -> &'static str {
        match self {
            Self::Creative => "Provide 2-3 location-aware creative insights.",
            Self::Technical => "Provide 2-3 precise technical insights.",
            Self::Spiritual => "Provide 2-3 place-based insights about people and values.",
            Self::Financial => "Provide 2-3 geographically informed financial insights.",
        }
    }

    /// Static text substituted when the specialist's call fails.
    #[must_use]
    pub fn fallback_text(self) -> String {
        format!("{}: location-aware fallback guidance.", self.role())
    }
}

impl fmt::Display for SpecialistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpecialistId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown specialist '{s}'"))
    }
}

/// Whether a stage produced generated text or a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Generated by the model.
    Success,
    /// Substituted after a timeout or failure.
    Fallback,
}

/// Output of one specialist for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistResult {
    /// Producing specialist.
    pub specialist: SpecialistId,
    /// Generated or fallback text.
    pub text: String,
    /// Weight before depth scaling.
    pub base_weight: f64,
    /// Success or fallback.
    pub status: ResultStatus,
    /// Wall time spent on the call.
    pub latency_ms: u64,
    /// Reason for a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl SpecialistResult {
    /// Result carrying generated text.
    #[must_use]
    pub fn success(specialist: SpecialistId, text: String, latency_ms: u64) -> Self {
        Self {
            specialist,
            text,
            base_weight: specialist.base_weight(),
            status: ResultStatus::Success,
            latency_ms,
            failure: None,
        }
    }

    /// Result carrying the specialist's static fallback text.
    #[must_use]
    pub fn fallback(specialist: SpecialistId, failure: StageFailure, latency_ms: u64) -> Self {
        Self {
            specialist,
            text: specialist.fallback_text(),
            base_weight: specialist.base_weight(),
            status: ResultStatus::Fallback,
            latency_ms,
            failure: Some(failure),
        }
    }

    /// True when the text came from the model.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Renders the prompt sent to `specialist`.
#[must_use]
pub fn render_prompt(
    specialist: SpecialistId,
    request: &ConsultationRequest,
    context: &PromptContext,
) -> String {
    let mut prompt = format!(
        "{}\n{}\n\nREASONING MODE: {}\n",
        specialist.role(),
        specialist.instruction(),
        request.mode().label()
    );
    match request.location() {
        Some(location) => prompt.push_str(&format!(
            "USER LOCATION: {:.4}, {:.4}\nProvide location-precise reasoning.\n",
            location.lat, location.lng
        )),
        None => prompt.push_str("USER LOCATION: not available\n"),
    }
    if !context.documents.is_empty() {
        prompt.push_str("\nREFERENCE DOCUMENTS:\n");
        prompt.push_str(&context.documents.join("\n\n---\n\n"));
        prompt.push('\n');
    }
    if !context.memory.is_empty() {
        prompt.push_str("\nMEMORY CONTEXT:\n");
        prompt.push_str(&context.memory);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nUSER QUERY: {}\n\nProvide 2-3 focused insights that hold for the user's location.",
        request.query()
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_memory::Coordinates;

    #[test]
    fn roster_weights_and_depths() {
        assert!((SpecialistId::Technical.base_weight() - 0.30).abs() < f64::EPSILON);
        assert_eq!(SpecialistId::Financial.depth(), DepthTag::Quantitative);
        assert!((DepthTag::Expert.multiplier() - 4.0).abs() < f64::EPSILON);
        assert!((DepthTag::from_label("intermediate").multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_names() {
        assert_eq!("Spiritual".parse::<SpecialistId>(), Ok(SpecialistId::Spiritual));
        assert!("judge".parse::<SpecialistId>().is_err());
    }

    #[test]
    fn fallback_is_tagged() {
        let result = SpecialistResult::fallback(
            SpecialistId::Creative,
            StageFailure::SpecialistTimeout,
            35_000,
        );
        assert!(!result.succeeded());
        assert!(result.text.ends_with("fallback guidance."));
        assert_eq!(result.failure, Some(StageFailure::SpecialistTimeout));
    }

    #[test]
    fn prompt_carries_query_location_and_context() {
        let request = ConsultationRequest::new(
            "Where can I volunteer?",
            Some(Coordinates::new(38.35, -81.63).unwrap()),
            [SpecialistId::Spiritual],
        )
        .unwrap();
        let context = PromptContext {
            memory: "Prev: \"food bank hours\"".into(),
            documents: vec!["[volunteering] Saturday shifts".into()],
        };
        let prompt = render_prompt(SpecialistId::Spiritual, &request, &context);
        assert!(prompt.starts_with(SpecialistId::Spiritual.role()));
        assert!(prompt.contains("USER LOCATION: 38.3500, -81.6300"));
        assert!(prompt.contains("Saturday shifts"));
        assert!(prompt.contains("food bank hours"));
        assert!(prompt.contains("USER QUERY: Where can I volunteer?"));
    }
}
