//! Elo rating updates for 1v1 match outcomes.

const K: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

/// Returns the (winner_delta, loser_delta) to apply, viewed from `a`'s
/// perspective: `outcome` describes what happened to player `a` against
/// player `b`. A draw always nets to a zero-sum pair of opposite-signed
/// deltas except when both ratings are exactly equal, where both deltas
/// are zero.
pub fn rating_deltas(rating_a: i32, rating_b: i32, outcome: Outcome) -> (i32, i32) {
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;

    let (actual_a, actual_b) = match outcome {
        Outcome::Win => (1.0, 0.0),
        Outcome::Loss => (0.0, 1.0),
        Outcome::Draw => (0.5, 0.5),
    };

    let delta_a = (K * (actual_a - expected_a)).round() as i32;
    let delta_b = (K * (actual_b - expected_b)).round() as i32;

    (delta_a, delta_b)
}

fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) as f64 / 400.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_win_gains_half_k() {
        let (winner, loser) = rating_deltas(1200, 1200, Outcome::Win);
        assert_eq!(winner, 16);
        assert_eq!(loser, -16);
    }

    #[test]
    fn underdog_win_gains_more_than_favorite_win() {
        let (underdog_gain, _) = rating_deltas(1000, 1400, Outcome::Win);
        let (favorite_gain, _) = rating_deltas(1400, 1000, Outcome::Win);
        assert!(underdog_gain > favorite_gain);
    }

    #[test]
    fn draw_between_equals_nets_to_zero() {
        let (a, b) = rating_deltas(1200, 1200, Outcome::Draw);
        assert_eq!(a, 0);
        assert_eq!(b, 0);
    }

    #[test]
    fn deltas_are_zero_sum() {
        let (a, b) = rating_deltas(1300, 1100, Outcome::Loss);
        assert_eq!(a, -b);
    }
}
