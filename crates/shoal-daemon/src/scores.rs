// crates/shoal-daemon/src/scores.rs
//
// Built-in score source.
//
// How a node judges its peers' work is deployment-specific and external to
// the protocol; the engine only needs an opaque function from the eligible
// target set to a score vector. The default source credits every live
// target the base score, which keeps a fresh subnet converging while
// operators wire in a real evaluator.

use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::records::ScoreVector;
use shoal_core::traits::ScoreSource;

/// Score every live target the same fixed value.
pub struct UniformScores {
    value: f64,
}

impl UniformScores {
    pub fn new(value: f64) -> Self {
        UniformScores { value }
    }
}

impl Default for UniformScores {
    fn default() -> Self {
        UniformScores { value: 1.0 }
    }
}

impl ScoreSource for UniformScores {
    fn observe(&self, _epoch: u64, targets: &[PeerId]) -> Result<ScoreVector, ShoalError> {
        let mut scores = ScoreVector::new();
        for target in targets {
            scores.insert(target.clone(), self.value)?;
        }
        Ok(scores)
    }
}
