// Squad rules and the validated 15-player squad.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::player::{canonical_order, Player, Position, PositionCounts};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_PER_CLUB: usize = 3;

/// Constraints every squad must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadRules {
    /// Spending cap in budget units (tenths).
    pub budget: u32,
    #[serde(default = "default_max_per_club")]
    pub max_per_club: usize,
    #[serde(default)]
    pub quotas: PositionCounts,
}

fn default_max_per_club() -> usize {
    DEFAULT_MAX_PER_CLUB
}

impl SquadRules {
    /// Standard rules (3 per club, 2/5/5/3) with the given budget.
    pub fn new(budget: u32) -> Self {
        SquadRules {
            budget,
            max_per_club: DEFAULT_MAX_PER_CLUB,
            quotas: PositionCounts::squad_quotas(),
        }
    }

    pub fn squad_size(&self) -> usize {
        self.quotas.total()
    }

    /// Same rules with a different budget.
    pub fn with_budget(&self, budget: u32) -> Self {
        SquadRules {
            budget,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SquadError {
    #[error("squad has {actual} players, expected {expected}")]
    WrongSize { expected: usize, actual: usize },

    #[error("player {id} appears more than once")]
    DuplicatePlayer { id: u32 },

    #[error("{position}: squad has {actual} players, quota is {expected}")]
    QuotaMismatch {
        position: Position,
        expected: usize,
        actual: usize,
    },

    #[error("total cost {total} exceeds budget {budget}")]
    OverBudget { total: u32, budget: u32 },

    #[error("{count} players from club {club}, limit is {max}")]
    ClubLimit {
        club: String,
        count: usize,
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Squad
// ---------------------------------------------------------------------------

/// A squad that satisfies every rule it was built against.
///
/// Players are held grouped by position (GK, DEF, MID, FWD) and, within a
/// position, by score descending then id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Squad {
    players: Vec<Player>,
}

impl Squad {
    /// Validate `players` against `rules`.
    ///
    /// Checks run in a fixed order (size, duplicates, quotas, budget, clubs)
    /// and the first violation is returned.
    pub fn new(mut players: Vec<Player>, rules: &SquadRules) -> Result<Self, SquadError> {
        let expected = rules.squad_size();
        if players.len() != expected {
            return Err(SquadError::WrongSize {
                expected,
                actual: players.len(),
            });
        }

        let mut seen = HashSet::with_capacity(players.len());
        for p in &players {
            if !seen.insert(p.id) {
                return Err(SquadError::DuplicatePlayer { id: p.id });
            }
        }

        for position in Position::ALL {
            let actual = players.iter().filter(|p| p.position == position).count();
            let expected = rules.quotas.get(position);
            if actual != expected {
                return Err(SquadError::QuotaMismatch {
                    position,
                    expected,
                    actual,
                });
            }
        }

        let total: u32 = players.iter().map(|p| p.cost).sum();
        if total > rules.budget {
            return Err(SquadError::OverBudget {
                total,
                budget: rules.budget,
            });
        }

        for (club, count) in club_counts(&players) {
            if count > rules.max_per_club {
                return Err(SquadError::ClubLimit {
                    club: club.to_string(),
                    count,
                    max: rules.max_per_club,
                });
            }
        }

        players.sort_by(|a, b| {
            a.position
                .sort_order()
                .cmp(&b.position.sort_order())
                .then_with(|| canonical_order(a, b))
        });
        Ok(Squad { players })
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn into_players(self) -> Vec<Player> {
        self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn total_cost(&self) -> u32 {
        self.players.iter().map(|p| p.cost).sum()
    }

    pub fn total_score(&self) -> f64 {
        self.players.iter().map(|p| p.score).sum()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn by_position(&self, position: Position) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(move |p| p.position == position)
    }

    /// Player count per club, keyed in club order.
    pub fn club_counts(&self) -> BTreeMap<&str, usize> {
        club_counts(&self.players)
    }

    /// Player ids, in squad order.
    pub fn ids(&self) -> Vec<u32> {
        self.players.iter().map(|p| p.id).collect()
    }
}

pub(crate) fn club_counts(players: &[Player]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for p in players {
        *counts.entry(p.club.as_str()).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// 15 players, 2/5/5/3, five clubs with three players each, cost 50 each.
    fn valid_players() -> Vec<Player> {
        let clubs = ["ARS", "CHE", "LIV", "MCI", "TOT"];
        let layout = [
            (Position::Goalkeeper, 2),
            (Position::Defender, 5),
            (Position::Midfielder, 5),
            (Position::Forward, 3),
        ];
        let mut players = Vec::new();
        let mut id = 1;
        for (position, n) in layout {
            for _ in 0..n {
                let club = clubs[(id as usize - 1) % clubs.len()];
                players.push(Player::new(id, format!("P{id}"), position, club, 50, id as f64));
                id += 1;
            }
        }
        players
    }

    #[test]
    fn valid_squad_accepted() {
        let squad = Squad::new(valid_players(), &SquadRules::new(1000)).unwrap();
        assert_eq!(squad.len(), 15);
        assert_eq!(squad.total_cost(), 750);
        assert_eq!(squad.by_position(Position::Defender).count(), 5);
        assert!(squad.club_counts().values().all(|&c| c == 3));
    }

    #[test]
    fn squad_orders_by_position_then_score() {
        let mut players = valid_players();
        players.reverse();
        let squad = Squad::new(players, &SquadRules::new(1000)).unwrap();
        assert_eq!(squad.players()[0].position, Position::Goalkeeper);
        // Higher score first within a position.
        assert_eq!(squad.players()[0].id, 2);
        assert_eq!(squad.players()[14].position, Position::Forward);
    }

    #[test]
    fn wrong_size_rejected_first() {
        let mut players = valid_players();
        players.pop();
        // Also over budget, but size is checked first.
        let err = Squad::new(players, &SquadRules::new(10)).unwrap_err();
        assert_eq!(
            err,
            SquadError::WrongSize {
                expected: 15,
                actual: 14
            }
        );
    }

    #[test]
    fn duplicate_rejected() {
        let mut players = valid_players();
        players[1].id = players[0].id;
        let err = Squad::new(players, &SquadRules::new(1000)).unwrap_err();
        assert_eq!(err, SquadError::DuplicatePlayer { id: 1 });
    }

    #[test]
    fn quota_mismatch_rejected() {
        let mut players = valid_players();
        players[0].position = Position::Defender;
        let err = Squad::new(players, &SquadRules::new(1000)).unwrap_err();
        assert_eq!(
            err,
            SquadError::QuotaMismatch {
                position: Position::Goalkeeper,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn over_budget_rejected() {
        let err = Squad::new(valid_players(), &SquadRules::new(749)).unwrap_err();
        assert_eq!(
            err,
            SquadError::OverBudget {
                total: 750,
                budget: 749
            }
        );
    }

    #[test]
    fn club_limit_rejected() {
        let mut players = valid_players();
        players[0].club = "CHE".into();
        let err = Squad::new(players, &SquadRules::new(1000)).unwrap_err();
        assert_eq!(
            err,
            SquadError::ClubLimit {
                club: "CHE".into(),
                count: 4,
                max: 3
            }
        );
    }

    #[test]
    fn rules_deserialize_with_defaults() {
        let rules: SquadRules = serde_json::from_str(r#"{"budget": 1000}"#).unwrap();
        assert_eq!(rules, SquadRules::new(1000));
        assert_eq!(rules.squad_size(), 15);
    }
}
