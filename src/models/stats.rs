use serde::{Deserialize, Serialize};

/// Per-player end-of-match scoring inputs and the blended composite score.
///
/// Weighting is fixed policy (see DESIGN.md): return 50%, accuracy 30%,
/// drawdown avoidance 20%, each normalized to 0-100 before blending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchStats {
    pub return_pct: f64,
    pub accuracy_pct: f64,
    pub max_drawdown_pct: f64,
    pub composite_score: f64,
}

const RETURN_WEIGHT: f64 = 0.5;
const ACCURACY_WEIGHT: f64 = 0.3;
const DRAWDOWN_WEIGHT: f64 = 0.2;

impl MatchStats {
    /// `return_pct` may be negative or exceed 100; it is clamped to
    /// [-100, 100] before normalizing so one player's blowup can't swing the
    /// composite score past what a capped scale allows.
    pub fn compute(return_pct: f64, accuracy_pct: f64, max_drawdown_pct: f64) -> Self {
        let return_norm = (return_pct.clamp(-100.0, 100.0) + 100.0) / 2.0;
        let accuracy_norm = accuracy_pct.clamp(0.0, 100.0);
        let drawdown_avoidance = 100.0 - max_drawdown_pct.clamp(0.0, 100.0);

        let composite_score = return_norm * RETURN_WEIGHT
            + accuracy_norm * ACCURACY_WEIGHT
            + drawdown_avoidance * DRAWDOWN_WEIGHT;

        Self {
            return_pct,
            accuracy_pct,
            max_drawdown_pct,
            composite_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_player_scores_100() {
        let stats = MatchStats::compute(100.0, 100.0, 0.0);
        assert!((stats.composite_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn flat_player_scores_at_midpoint_of_return_component() {
        let stats = MatchStats::compute(0.0, 0.0, 0.0);
        // return_norm = 50 * 0.5 = 25, accuracy 0, drawdown avoidance 100 * 0.2 = 20
        assert!((stats.composite_score - 45.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_return_is_clamped_before_blending() {
        let huge = MatchStats::compute(1000.0, 50.0, 0.0);
        let capped = MatchStats::compute(100.0, 50.0, 0.0);
        assert!((huge.composite_score - capped.composite_score).abs() < 1e-9);
    }
}
