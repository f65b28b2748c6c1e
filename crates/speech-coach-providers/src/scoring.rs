//! Local score arithmetic. Backends report sub-scores only; the total and
//! tier are always derived here.

use speech_coach_core::config::{ScoringConfig, TierThreshold};
use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{FullEvaluation, GlobalEvaluation, SubScores, Tier};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringScale {
    pub max_sub_score: f64,
    pub full_scale: u32,
    /// Highest threshold first.
    pub tiers: Vec<TierThreshold>,
    pub fallback_tier: Tier,
}

impl Default for ScoringScale {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringScale {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            max_sub_score: config.max_sub_score,
            full_scale: config.full_scale,
            tiers: config.tiers.clone(),
            fallback_tier: config.fallback_tier,
        }
    }
}

impl ScoringScale {
    /// `round(mean(sub-scores) / max_sub_score * full_scale)`, half away from zero.
    pub fn total(&self, scores: &SubScores) -> u32 {
        let values = scores.values();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let scaled = (mean / self.max_sub_score * self.full_scale as f64).round();
        scaled.clamp(0.0, self.full_scale as f64) as u32
    }

    pub fn tier(&self, total: u32) -> Tier {
        self.tiers
            .iter()
            .find(|t| total >= t.min_total)
            .map(|t| t.tier)
            .unwrap_or(self.fallback_tier)
    }

    /// Reject out-of-range sub-scores.
    pub fn check(&self, provider: &str, scores: &SubScores) -> Result<(), ProviderError> {
        for value in scores.values() {
            if !value.is_finite() || value < 0.0 || value > self.max_sub_score {
                return Err(ProviderError::malformed(
                    provider,
                    format!(
                        "sub-score {value} outside 0..={}",
                        self.max_sub_score
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Derive total and tier from a backend evaluation.
    pub fn finalize(
        &self,
        provider: &str,
        evaluation: FullEvaluation,
    ) -> Result<GlobalEvaluation, ProviderError> {
        self.check(provider, &evaluation.scores)?;
        let total_score = self.total(&evaluation.scores);
        Ok(GlobalEvaluation {
            total_score,
            score_breakdown: evaluation.scores,
            level: self.tier(total_score),
            overall_summary: evaluation.overall_summary,
            detailed_feedback: evaluation.detailed_feedback,
        })
    }
}
