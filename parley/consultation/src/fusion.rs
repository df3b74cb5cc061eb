//! Depth-weighted fusion of specialist outputs and the per-domain feedback ledger.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::specialist::{DepthTag, ResultStatus, SpecialistResult};

/// Separator between fused entries in rendered text.
pub const FUSED_SEPARATOR: &str = "\n\n---\n\n";

/// One specialist output entering fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionCandidate {
    /// Specialist label; also the feedback key.
    pub specialist: String,
    /// Output text.
    pub text: String,
    /// Weight before depth scaling.
    pub base_weight: f64,
    /// Depth tag selecting the multiplier.
    pub depth: DepthTag,
    /// Success or fallback.
    pub status: ResultStatus,
}

impl From<&SpecialistResult> for FusionCandidate {
    fn from(result: &SpecialistResult) -> Self {
        // Fallback text carries no specialist depth.
        let depth = if result.succeeded() {
            result.specialist.depth()
        } else {
            DepthTag::Basic
        };
        Self {
            specialist: result.specialist.name().to_string(),
            text: result.text.clone(),
            base_weight: result.base_weight,
            depth,
            status: result.status,
        }
    }
}

/// A fused candidate with its effective weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEntry {
    /// Specialist label.
    pub specialist: String,
    /// Output text.
    pub text: String,
    /// Base weight times depth multiplier.
    pub effective_weight: f64,
    /// Success or fallback.
    pub status: ResultStatus,
}

/// Candidates ordered by non-increasing effective weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusedOutput {
    entries: Vec<FusedEntry>,
}

impl FusedOutput {
    /// Fused entries, strongest first.
    #[must_use]
    pub fn entries(&self) -> &[FusedEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was fused.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `NAME (w=0.00):\ntext` blocks joined by [`FUSED_SEPARATOR`].
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{} (w={:.2}):\n{}",
                    entry.specialist.to_uppercase(),
                    entry.effective_weight,
                    entry.text
                )
            })
            .collect::<Vec<_>>()
            .join(FUSED_SEPARATOR)
    }
}

/// Feedback counters for one `(domain, specialist)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionWeightRecord {
    /// Fusion domain.
    pub domain: String,
    /// Specialist label.
    pub specialist: String,
    /// Consultations where the specialist was useful.
    pub success_count: u64,
    /// All recorded consultations.
    pub total_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    success: u64,
    total: u64,
}

impl Counts {
    #[allow(clippy::cast_precision_loss)]
    fn smoothed_ratio(self) -> f64 {
        (self.success as f64 + 1.0) / (self.total as f64 + 2.0)
    }
}

/// Fusion service holding process-lifetime feedback counters.
#[derive(Debug, Default)]
pub struct AdaptiveFusionWeights {
    adaptive: bool,
    records: RwLock<IndexMap<(String, String), Counts>>,
}

impl AdaptiveFusionWeights {
    /// Counters are recorded but never change weights.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scales base weights by the smoothed success ratio `(s + 1) / (t + 2)`.
    #[must_use]
    pub fn adaptive() -> Self {
        Self {
            adaptive: true,
            records: RwLock::default(),
        }
    }

    /// Whether recorded feedback changes weights.
    #[must_use]
    pub const fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Weights and orders candidates; equal weights keep their input order.
    #[must_use]
    pub fn fuse(&self, domain: &str, candidates: Vec<FusionCandidate>) -> FusedOutput {
        let records = self.records.read();
        let mut entries: Vec<FusedEntry> = candidates
            .into_iter()
            .map(|candidate| {
                let mut base = candidate.base_weight;
                if self.adaptive {
                    let counts = records
                        .get(&(domain.to_string(), candidate.specialist.clone()))
                        .copied()
                        .unwrap_or_default();
                    base *= counts.smoothed_ratio();
                }
                FusedEntry {
                    effective_weight: base * candidate.depth.multiplier(),
                    specialist: candidate.specialist,
                    text: candidate.text,
                    status: candidate.status,
                }
            })
            .collect();
        drop(records);
        entries.sort_by(|a, b| b.effective_weight.total_cmp(&a.effective_weight));
        FusedOutput { entries }
    }

    /// Counts one consultation outcome for the pair.
    pub fn record(&self, domain: &str, specialist: &str, was_useful: bool) {
        let mut records = self.records.write();
        let counts = records
            .entry((domain.to_string(), specialist.to_string()))
            .or_default();
        counts.total += 1;
        if was_useful {
            counts.success += 1;
        }
    }

    /// Counters for one pair.
    #[must_use]
    pub fn record_for(&self, domain: &str, specialist: &str) -> Option<FusionWeightRecord> {
        self.records
            .read()
            .get(&(domain.to_string(), specialist.to_string()))
            .map(|counts| FusionWeightRecord {
                domain: domain.to_string(),
                specialist: specialist.to_string(),
                success_count: counts.success,
                total_count: counts.total,
            })
    }

    /// All counters in first-recorded order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FusionWeightRecord> {
        self.records
            .read()
            .iter()
            .map(|((domain, specialist), counts)| FusionWeightRecord {
                domain: domain.clone(),
                specialist: specialist.clone(),
                success_count: counts.success,
                total_count: counts.total,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StageFailure, specialist::SpecialistId};

    fn candidate(name: &str, base_weight: f64, depth: &str) -> FusionCandidate {
        FusionCandidate {
            specialist: name.into(),
            text: format!("{name} says"),
            base_weight,
            depth: DepthTag::from_label(depth),
            status: ResultStatus::Success,
        }
    }

    #[test]
    fn expert_outranks_basic_at_equal_base() {
        let weights = AdaptiveFusionWeights::new();
        let fused = weights.fuse(
            "general",
            vec![candidate("b", 0.3, "basic"), candidate("a", 0.3, "expert")],
        );
        let order: Vec<_> = fused.entries().iter().map(|e| e.specialist.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert!((fused.entries()[0].effective_weight - 1.2).abs() < 1e-9);
    }

    #[test]
    fn ties_keep_routing_order_and_weights_never_increase() {
        let weights = AdaptiveFusionWeights::new();
        let fused = weights.fuse(
            "general",
            vec![
                candidate("first", 0.25, "advanced"),
                candidate("second", 0.25, "quantitative"),
                candidate("third", 0.30, "expert"),
                candidate("fourth", 0.75, "basic"),
                candidate("fifth", 0.20, "nuanced"),
            ],
        );
        let order: Vec<_> = fused.entries().iter().map(|e| e.specialist.as_str()).collect();
        assert_eq!(order, vec!["third", "first", "second", "fourth", "fifth"]);
        assert!(fused
            .entries()
            .windows(2)
            .all(|pair| pair[0].effective_weight >= pair[1].effective_weight));
    }

    #[test]
    fn empty_input_fuses_to_empty_output() {
        let fused = AdaptiveFusionWeights::new().fuse("general", Vec::new());
        assert!(fused.is_empty());
        assert_eq!(fused.render(), "");
    }

    #[test]
    fn fallback_candidate_is_kept_and_tagged() {
        let ok = SpecialistResult::success(SpecialistId::Spiritual, "listen first".into(), 5);
        let failed = SpecialistResult::fallback(
            SpecialistId::Technical,
            StageFailure::SpecialistTimeout,
            35_000,
        );
        let fused = AdaptiveFusionWeights::new().fuse(
            "general",
            vec![FusionCandidate::from(&failed), FusionCandidate::from(&ok)],
        );
        assert_eq!(fused.len(), 2);
        // spiritual 0.20 * 2 beats technical fallback 0.30 * 1
        assert_eq!(fused.entries()[0].specialist, "spiritual");
        assert_eq!(fused.entries()[1].status, ResultStatus::Fallback);
    }

    #[test]
    fn render_uses_upper_case_names_and_two_decimals() {
        let fused = AdaptiveFusionWeights::new().fuse(
            "general",
            vec![candidate("creative", 0.25, "advanced"), candidate("spiritual", 0.2, "nuanced")],
        );
        assert_eq!(
            fused.render(),
            "CREATIVE (w=0.75):\ncreative says\n\n---\n\nSPIRITUAL (w=0.40):\nspiritual says"
        );
    }

    #[test]
    fn record_counts_per_domain_and_specialist() {
        let weights = AdaptiveFusionWeights::new();
        weights.record("general", "creative", true);
        weights.record("general", "creative", false);
        weights.record("coding", "creative", true);
        let record = weights.record_for("general", "creative").unwrap();
        assert_eq!((record.success_count, record.total_count), (1, 2));
        assert!(weights.snapshot().iter().all(|r| r.success_count <= r.total_count));
        assert_eq!(weights.snapshot().len(), 2);
        assert!(weights.record_for("general", "technical").is_none());
    }

    #[test]
    fn adaptive_weights_follow_success_ratio() {
        let weights = AdaptiveFusionWeights::adaptive();
        for _ in 0..3 {
            weights.record("general", "a", true);
            weights.record("general", "b", false);
        }
        let fused = weights.fuse(
            "general",
            vec![candidate("b", 0.3, "basic"), candidate("a", 0.3, "basic")],
        );
        assert_eq!(fused.entries()[0].specialist, "a");
        // a: 0.3 * 4/5, b: 0.3 * 1/5
        assert!((fused.entries()[0].effective_weight - 0.24).abs() < 1e-9);
        assert!((fused.entries()[1].effective_weight - 0.06).abs() < 1e-9);
        // No history keeps half the base weight.
        let fresh = weights.fuse("coding", vec![candidate("a", 0.3, "basic")]);
        assert!((fresh.entries()[0].effective_weight - 0.15).abs() < 1e-9);
    }
}
