// Score models: turn player features into the selection criterion.
//
// Models are consumed, never fitted here. A pool is rescored with
// `Pool::rescore(&model)` before selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::player::{Player, Position};

/// Predicts a player's score for the coming gameweek.
pub trait ScoreModel {
    fn predict(&self, player: &Player) -> f64;
}

impl<F> ScoreModel for F
where
    F: Fn(&Player) -> f64,
{
    fn predict(&self, player: &Player) -> f64 {
        self(player)
    }
}

// ---------------------------------------------------------------------------
// Linear expected points
// ---------------------------------------------------------------------------

/// xPts = coefficient * feature + intercept.
///
/// The feature is typically a recent average of a form metric such as the
/// ICT index. Players without a feature value keep their current score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearXpts {
    pub coefficient: f64,
    pub intercept: f64,
    #[serde(default)]
    pub features: HashMap<u32, f64>,
}

impl LinearXpts {
    pub fn new(coefficient: f64, intercept: f64, features: HashMap<u32, f64>) -> Self {
        LinearXpts {
            coefficient,
            intercept,
            features,
        }
    }
}

impl ScoreModel for LinearXpts {
    fn predict(&self, player: &Player) -> f64 {
        match self.features.get(&player.id) {
            Some(&x) => self.coefficient * x + self.intercept,
            None => player.score,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture difficulty scaling
// ---------------------------------------------------------------------------

/// Scales an inner model by the difficulty of each club's next fixture.
///
/// `multipliers[(position, difficulty)]` gives the factor; clubs without a
/// known fixture, or difficulties without a factor, are left unscaled.
#[derive(Debug, Clone)]
pub struct DifficultyScaled<M> {
    inner: M,
    difficulty: HashMap<String, u8>,
    multipliers: HashMap<(Position, u8), f64>,
}

impl<M: ScoreModel> DifficultyScaled<M> {
    pub fn new(
        inner: M,
        difficulty: HashMap<String, u8>,
        multipliers: HashMap<(Position, u8), f64>,
    ) -> Self {
        DifficultyScaled {
            inner,
            difficulty,
            multipliers,
        }
    }

    fn factor(&self, player: &Player) -> f64 {
        self.difficulty
            .get(&player.club)
            .and_then(|&d| self.multipliers.get(&(player.position, d)))
            .copied()
            .unwrap_or(1.0)
    }
}

impl<M: ScoreModel> ScoreModel for DifficultyScaled<M> {
    fn predict(&self, player: &Player) -> f64 {
        self.inner.predict(player) * self.factor(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Pool;

    fn player(id: u32, position: Position, club: &str, score: f64) -> Player {
        Player::new(id, format!("P{id}"), position, club, 50, score)
    }

    #[test]
    fn linear_uses_feature_when_present() {
        let model = LinearXpts::new(0.5, 1.0, HashMap::from([(1, 8.0)]));
        assert_eq!(model.predict(&player(1, Position::Midfielder, "ARS", 2.0)), 5.0);
        // No feature: unchanged.
        assert_eq!(model.predict(&player(2, Position::Midfielder, "ARS", 2.0)), 2.0);
    }

    #[test]
    fn closures_are_models() {
        let model = |p: &Player| p.score + 1.0;
        assert_eq!(model.predict(&player(1, Position::Forward, "LIV", 3.0)), 4.0);
    }

    #[test]
    fn difficulty_scales_by_position() {
        let difficulty = HashMap::from([("ARS".to_string(), 2u8), ("MCI".to_string(), 5u8)]);
        let multipliers = HashMap::from([
            ((Position::Forward, 2u8), 1.2),
            ((Position::Defender, 5u8), 0.5),
        ]);
        let model = DifficultyScaled::new(|p: &Player| p.score, difficulty, multipliers);

        assert!((model.predict(&player(1, Position::Forward, "ARS", 5.0)) - 6.0).abs() < 1e-12);
        assert_eq!(model.predict(&player(2, Position::Defender, "MCI", 4.0)), 2.0);
        // No multiplier for a forward at difficulty 5.
        assert_eq!(model.predict(&player(3, Position::Forward, "MCI", 4.0)), 4.0);
        // Unknown club.
        assert_eq!(model.predict(&player(4, Position::Forward, "EVE", 4.0)), 4.0);
    }

    #[test]
    fn rescore_pool_with_linear_model() {
        let pool = Pool::new(vec![
            player(1, Position::Goalkeeper, "ARS", 1.0),
            player(2, Position::Goalkeeper, "CHE", 1.0),
        ])
        .unwrap();
        let model = LinearXpts::new(2.0, 0.0, HashMap::from([(2, 3.0)]));
        let rescored = pool.rescore(&model).unwrap();
        assert_eq!(rescored.get(1).map(|p| p.score), Some(1.0));
        assert_eq!(rescored.get(2).map(|p| p.score), Some(6.0));
    }

    #[test]
    fn non_finite_prediction_rejected() {
        let pool = Pool::new(vec![player(1, Position::Goalkeeper, "ARS", 1.0)]).unwrap();
        let err = pool.rescore(&|_: &Player| f64::INFINITY).unwrap_err();
        assert!(matches!(err, crate::player::PoolError::NonFiniteScore { id: 1 }));
    }
}
