//! Blend strategies
//!
//! How knowledge-derived confidence is combined with a role's default
//! inclination at a patched integration point. Selected by configuration;
//! an adaptation can override the pipeline-wide default per record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Available blend strategies
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlendKind {
    #[default]
    Linear,
    WeightedVote,
}

/// Combines a base inclination with knowledge confidence.
///
/// All inputs and outputs live in [0, 1]. `weight` 0 ignores the knowledge
/// entirely; 1 lets it fully override the base.
pub trait BlendStrategy: Send + Sync {
    fn kind(&self) -> BlendKind;

    fn blend(&self, base: f64, knowledge: f64, weight: f64) -> f64;
}

/// Straight interpolation between base and knowledge
pub struct LinearBlend;

impl BlendStrategy for LinearBlend {
    fn kind(&self) -> BlendKind {
        BlendKind::Linear
    }

    fn blend(&self, base: f64, knowledge: f64, weight: f64) -> f64 {
        base * (1.0 - weight) + knowledge * weight
    }
}

/// Each side casts a binary vote (≥ 0.5 is a yes), weighted by `weight`
pub struct WeightedVoteBlend;

impl BlendStrategy for WeightedVoteBlend {
    fn kind(&self) -> BlendKind {
        BlendKind::WeightedVote
    }

    fn blend(&self, base: f64, knowledge: f64, weight: f64) -> f64 {
        let base_vote = if base >= 0.5 { 1.0 } else { 0.0 };
        let knowledge_vote = if knowledge >= 0.5 { 1.0 } else { 0.0 };
        base_vote * (1.0 - weight) + knowledge_vote * weight
    }
}

/// Resolve a strategy by kind.
pub fn blend_strategy(kind: BlendKind) -> Arc<dyn BlendStrategy> {
    match kind {
        BlendKind::Linear => Arc::new(LinearBlend),
        BlendKind::WeightedVote => Arc::new(WeightedVoteBlend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_interpolates() {
        let blend = LinearBlend;
        assert!((blend.blend(0.5, 1.0, 0.0) - 0.5).abs() < f64::EPSILON);
        assert!((blend.blend(0.5, 1.0, 1.0) - 1.0).abs() < f64::EPSILON);
        assert!((blend.blend(0.4, 0.9, 0.7) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_discretizes() {
        let blend = WeightedVoteBlend;
        // Base below the bar, knowledge above: knowledge-weighted yes
        assert!((blend.blend(0.4, 0.9, 0.7) - 0.7).abs() < f64::EPSILON);
        // Both vote yes
        assert!((blend.blend(0.5, 0.9, 0.7) - 1.0).abs() < f64::EPSILON);
        // Both vote no
        assert!(blend.blend(0.2, 0.1, 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(blend_strategy(BlendKind::Linear).kind(), BlendKind::Linear);
        assert_eq!(
            blend_strategy(BlendKind::WeightedVote).kind(),
            BlendKind::WeightedVote
        );
        assert_eq!(
            "weighted_vote".parse::<BlendKind>().unwrap(),
            BlendKind::WeightedVote
        );
    }
}
