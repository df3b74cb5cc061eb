//! Keyword classification of queries into reasoning categories.

use serde::{Deserialize, Serialize};

use crate::specialist::{
    DepthTag,
    SpecialistId::{self, Creative, Financial, Spiritual, Technical},
};

/// Fusion domain used when no category matches.
pub const GENERAL_DOMAIN: &str = "general";

/// How specialists are asked to reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Linear chain of thought.
    ChainOfThought,
    /// Numbered steps.
    StepByStep,
    /// Causes and effects.
    CausalAnalysis,
    /// Several viewpoints side by side.
    MultiPerspective,
}

impl ReasoningMode {
    /// Label placed in prompts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ChainOfThought => "chain of thought",
            Self::StepByStep => "step by step",
            Self::CausalAnalysis => "causal analysis",
            Self::MultiPerspective => "multi-perspective",
        }
    }
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningCategory {
    /// Category name; doubles as the fusion domain.
    pub name: &'static str,
    /// Lower-case trigger phrases.
    pub keywords: &'static [&'static str],
    /// Specialists consulted, in routing order.
    pub routing: &'static [SpecialistId],
    /// Reasoning mode for the prompts.
    pub mode: ReasoningMode,
    /// Depth requested from the specialists.
    pub depth: DepthTag,
    /// Whether answers depend on the user's location.
    pub requires_location: bool,
}

/// Routing table, checked in order.
pub const CATEGORIES: [ReasoningCategory; 6] = [
    ReasoningCategory {
        name: "historical",
        keywords: &[
            "historical", "stories", "history", "heritage", "coal", "mining", "sites",
        ],
        routing: &[Creative, Spiritual],
        mode: ReasoningMode::ChainOfThought,
        depth: DepthTag::Nuanced,
        requires_location: true,
    },
    ReasoningCategory {
        name: "local_information",
        keywords: &["near me", "local", "nearby", "around here", "in my area", "close by"],
        routing: &[Creative, Technical, Spiritual, Financial],
        mode: ReasoningMode::MultiPerspective,
        depth: DepthTag::Advanced,
        requires_location: true,
    },
    ReasoningCategory {
        name: "coding",
        keywords: &[
            "solidity", "smart contract", "python", "javascript", "rust", "api", "algorithm",
            "code", "function",
        ],
        routing: &[Technical, Creative, Financial],
        mode: ReasoningMode::StepByStep,
        depth: DepthTag::Expert,
        requires_location: false,
    },
    ReasoningCategory {
        name: "ai_systems",
        keywords: &["machine learning", "artificial", "intelligence", "reasoning", "analysis"],
        routing: &[Technical, Creative, Spiritual, Financial],
        mode: ReasoningMode::MultiPerspective,
        depth: DepthTag::Expert,
        requires_location: false,
    },
    ReasoningCategory {
        name: "community_planning",
        keywords: &[
            "community", "planning", "development", "sustainability", "cultural", "economic",
            "social",
        ],
        routing: &[Creative, Spiritual, Financial, Technical],
        mode: ReasoningMode::CausalAnalysis,
        depth: DepthTag::Advanced,
        requires_location: true,
    },
    ReasoningCategory {
        name: "problem_solving",
        keywords: &[
            "problem", "challenge", "issue", "solution", "analyze", "resolve", "fix", "improve",
        ],
        routing: &[Creative, Technical, Spiritual, Financial],
        mode: ReasoningMode::ChainOfThought,
        depth: DepthTag::Advanced,
        requires_location: false,
    },
];

/// Routing decided for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Fusion domain.
    pub domain: &'static str,
    /// Specialists to consult, in order.
    pub routing: Vec<SpecialistId>,
    /// Reasoning mode.
    pub mode: ReasoningMode,
    /// Requested depth.
    pub depth: DepthTag,
    /// Whether location matters for the answer.
    pub requires_location: bool,
}

impl From<&ReasoningCategory> for Classification {
    fn from(category: &ReasoningCategory) -> Self {
        Self {
            domain: category.name,
            routing: category.routing.to_vec(),
            mode: category.mode,
            depth: category.depth,
            requires_location: category.requires_location,
        }
    }
}

/// First category with a keyword in the lower-cased query, else the general route.
#[must_use]
pub fn classify(query: &str) -> Classification {
    let lower = query.to_lowercase();
    CATEGORIES
        .iter()
        .find(|category| category.keywords.iter().any(|k| lower.contains(*k)))
        .map_or_else(
            || Classification {
                domain: GENERAL_DOMAIN,
                routing: vec![Creative, Financial, Spiritual, Technical],
                mode: ReasoningMode::MultiPerspective,
                depth: DepthTag::Advanced,
                requires_location: true,
            },
            Classification::from,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_category_wins() {
        // "history" and "near me" both match; historical comes first.
        let c = classify("Coal history near me");
        assert_eq!(c.domain, "historical");
        assert_eq!(c.routing, vec![Creative, Spiritual]);
    }

    #[test]
    fn coding_routes_technical_first() {
        let c = classify("How do I write a Python function?");
        assert_eq!(c.domain, "coding");
        assert_eq!(c.routing[0], Technical);
        assert_eq!(c.mode, ReasoningMode::StepByStep);
    }

    #[test]
    fn unmatched_query_goes_to_everyone() {
        let c = classify("good morning");
        assert_eq!(c.domain, GENERAL_DOMAIN);
        assert_eq!(c.routing.len(), 4);
    }
}
