use indexmap::IndexSet;
use parley_memory::Coordinates;
use serde::Serialize;

use crate::{
    error::ConsultationError,
    routing::{classify, ReasoningMode, GENERAL_DOMAIN},
    specialist::SpecialistId,
};

/// Validated query with its routing. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultationRequest {
    query: String,
    location: Option<Coordinates>,
    routing: IndexSet<SpecialistId>,
    domain: String,
    mode: ReasoningMode,
}

impl ConsultationRequest {
    /// Builds a request for an explicit routing in the general domain.
    pub fn new(
        query: impl Into<String>,
        location: Option<Coordinates>,
        routing: impl IntoIterator<Item = SpecialistId>,
    ) -> Result<Self, ConsultationError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ConsultationError::EmptyQuery);
        }
        if let Some(location) = location {
            Coordinates::new(location.lat, location.lng)?;
        }
        Ok(Self {
            query,
            location,
            routing: routing.into_iter().collect(),
            domain: GENERAL_DOMAIN.to_string(),
            mode: ReasoningMode::MultiPerspective,
        })
    }

    /// Builds a request routed by keyword classification of the query.
    pub fn classified(
        query: impl Into<String>,
        location: Option<Coordinates>,
    ) -> Result<Self, ConsultationError> {
        let query = query.into();
        let classification = classify(&query);
        Ok(Self::new(query, location, classification.routing)?
            .in_domain(classification.domain)
            .with_mode(classification.mode))
    }

    /// Moves the request into another fusion domain.
    #[must_use]
    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the reasoning mode used in prompts.
    #[must_use]
    pub fn with_mode(mut self, mode: ReasoningMode) -> Self {
        self.mode = mode;
        self
    }

    /// Raw query text.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Location the query refers to.
    #[must_use]
    pub const fn location(&self) -> Option<&Coordinates> {
        self.location.as_ref()
    }

    /// Specialists to consult, in routing order.
    #[must_use]
    pub const fn routing(&self) -> &IndexSet<SpecialistId> {
        &self.routing
    }

    /// Fusion domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Reasoning mode.
    #[must_use]
    pub const fn mode(&self) -> ReasoningMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_query_is_rejected() {
        let err = ConsultationRequest::new("   ", None, SpecialistId::ALL).unwrap_err();
        assert!(matches!(err, ConsultationError::EmptyQuery));
    }

    #[test]
    fn bad_coordinates_are_rejected() {
        let location = Coordinates { lat: 123.0, lng: 0.0 };
        let err = ConsultationRequest::new("hi", Some(location), [SpecialistId::Creative]).unwrap_err();
        assert!(matches!(err, ConsultationError::InvalidLocation(_)));
    }

    #[test]
    fn routing_dedupes_in_order() {
        let request = ConsultationRequest::new(
            "hi",
            None,
            [
                SpecialistId::Financial,
                SpecialistId::Creative,
                SpecialistId::Financial,
            ],
        )
        .unwrap();
        let routing: Vec<_> = request.routing().iter().copied().collect();
        assert_eq!(routing, vec![SpecialistId::Financial, SpecialistId::Creative]);
        assert_eq!(request.domain(), GENERAL_DOMAIN);
    }

    #[test]
    fn classified_request_takes_category_domain() {
        let request = ConsultationRequest::classified("Any events nearby?", None).unwrap();
        assert_eq!(request.domain(), "local_information");
        assert_eq!(request.routing().len(), 4);
    }
}
