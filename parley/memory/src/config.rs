use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the memory store.
#[derive(Debug, Error, PartialEq)]
pub enum MemoryError {
    /// No live entry with this id for the user.
    #[error("unknown memory entry {0}")]
    UnknownEntry(Uuid),
    /// Configuration rejected on validation.
    #[error("invalid memory config: {0}")]
    InvalidConfig(String),
}

/// Capacities and scoring parameters of the tiered store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Working tier capacity.
    pub working_capacity: usize,
    /// Short-term tier capacity.
    pub short_term_capacity: usize,
    /// Long-term tier capacity.
    pub long_term_capacity: usize,
    /// Entries leaving short-term memory above this importance move to long-term.
    pub promotion_threshold: f32,
    /// Distance at which the proximity bonus reaches zero.
    pub proximity_radius_miles: f64,
    /// Whether location recall may surface other users' turns recorded nearby.
    pub share_location_index: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 10,
            short_term_capacity: 50,
            long_term_capacity: 500,
            promotion_threshold: 0.7,
            proximity_radius_miles: 10.0,
            share_location_index: true,
        }
    }
}

impl MemoryConfig {
    /// Rejects zero capacities and out-of-range scoring parameters.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.working_capacity == 0
            || self.short_term_capacity == 0
            || self.long_term_capacity == 0
        {
            return Err(MemoryError::InvalidConfig(
                "tier capacities must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.promotion_threshold) {
            return Err(MemoryError::InvalidConfig(format!(
                "promotion_threshold {} outside [0, 1]",
                self.promotion_threshold
            )));
        }
        if !self.proximity_radius_miles.is_finite() || self.proximity_radius_miles <= 0.0 {
            return Err(MemoryError::InvalidConfig(
                "proximity_radius_miles must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tier_sizes() {
        let config = MemoryConfig::default();
        assert_eq!(
            (
                config.working_capacity,
                config.short_term_capacity,
                config.long_term_capacity
            ),
            (10, 50, 500)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let zero = MemoryConfig {
            working_capacity: 0,
            ..MemoryConfig::default()
        };
        assert!(zero.validate().is_err());
        let threshold = MemoryConfig {
            promotion_threshold: 1.5,
            ..MemoryConfig::default()
        };
        assert!(threshold.validate().is_err());
        let radius = MemoryConfig {
            proximity_radius_miles: 0.0,
            ..MemoryConfig::default()
        };
        assert!(radius.validate().is_err());
    }
}
