// Starting eleven, bench order, and captaincy for a squad.

use serde::Serialize;
use tracing::{debug, error};

use crate::error::SelectionError;
use crate::player::{Player, Position};
use crate::squad::Squad;

pub const LINEUP_SIZE: usize = 11;

/// Formation minimums. Exactly one goalkeeper starts.
const MINIMUMS: [(Position, usize); 4] = [
    (Position::Goalkeeper, 1),
    (Position::Defender, 3),
    (Position::Midfielder, 3),
    (Position::Forward, 1),
];

/// Default criterion: the player's own score.
pub fn by_score(player: &Player) -> f64 {
    player.score
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lineup {
    starters: Vec<Player>,
    bench: Vec<Player>,
}

impl Lineup {
    /// The eleven starters, grouped by position.
    pub fn starters(&self) -> &[Player] {
        &self.starters
    }

    /// Reserve goalkeeper first, then outfield reserves by criteria.
    pub fn bench(&self) -> &[Player] {
        &self.bench
    }

    /// Outfield shape, e.g. "4-4-2".
    pub fn formation(&self) -> String {
        let count = |pos| self.starters.iter().filter(|p| p.position == pos).count();
        format!(
            "{}-{}-{}",
            count(Position::Defender),
            count(Position::Midfielder),
            count(Position::Forward)
        )
    }

    /// Sum of starter criteria with the captain counted twice.
    pub fn predicted_points<F>(&self, criteria: F, captain: &Player) -> f64
    where
        F: Fn(&Player) -> f64,
    {
        let total: f64 = self.starters.iter().map(&criteria).sum();
        total + criteria(captain)
    }
}

/// Pick the best eleven from `squad` by `criteria`.
///
/// Each position's minimum is filled by its best players first; the remaining
/// places go to the best outfield players left. Ties keep squad order.
pub fn select_lineup<F>(squad: &Squad, criteria: F) -> Result<Lineup, SelectionError>
where
    F: Fn(&Player) -> f64,
{
    let mut ranked: Vec<(f64, &Player)> = squad.players().iter().map(|p| (criteria(p), p)).collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut starting = vec![false; ranked.len()];
    let mut filled = 0;
    for (position, required) in MINIMUMS {
        let picks: Vec<usize> = ranked
            .iter()
            .enumerate()
            .filter(|(_, (_, p))| p.position == position)
            .map(|(i, _)| i)
            .take(required)
            .collect();
        if picks.len() < required {
            error!(
                "Squad has {} {} players, lineup needs {}",
                picks.len(),
                position,
                required
            );
            return Err(SelectionError::LineupUnderfilled {
                position: position.display_str().to_string(),
                required,
                available: picks.len(),
            });
        }
        for i in picks {
            starting[i] = true;
        }
        filled += required;
    }

    let open = LINEUP_SIZE - filled;
    let extras: Vec<usize> = ranked
        .iter()
        .enumerate()
        .filter(|(i, (_, p))| !starting[*i] && p.position != Position::Goalkeeper)
        .map(|(i, _)| i)
        .take(open)
        .collect();
    if extras.len() < open {
        error!("Only {} outfield reserves for {} open places", extras.len(), open);
        return Err(SelectionError::LineupUnderfilled {
            position: "outfield".to_string(),
            required: open,
            available: extras.len(),
        });
    }
    for i in extras {
        starting[i] = true;
    }

    let mut starters = Vec::with_capacity(LINEUP_SIZE);
    let mut bench = Vec::new();
    for (i, (_, p)) in ranked.iter().enumerate() {
        if starting[i] {
            starters.push((*p).clone());
        } else {
            bench.push((*p).clone());
        }
    }
    starters.sort_by_key(|p| p.position.sort_order());
    bench.sort_by_key(|p| p.position != Position::Goalkeeper);

    let lineup = Lineup { starters, bench };
    debug!("Lineup formation {}", lineup.formation());
    Ok(lineup)
}

/// The starter with the highest criteria; ties go to the first in lineup order.
pub fn choose_captain<F>(lineup: &Lineup, criteria: F) -> Result<Player, SelectionError>
where
    F: Fn(&Player) -> f64,
{
    best_excluding(lineup, &criteria, None).ok_or(SelectionError::LineupUnderfilled {
        position: "captain".to_string(),
        required: 1,
        available: 0,
    })
}

/// The best starter other than the captain.
pub fn choose_vice_captain<F>(lineup: &Lineup, criteria: F) -> Result<Player, SelectionError>
where
    F: Fn(&Player) -> f64,
{
    let captain = choose_captain(lineup, &criteria)?;
    best_excluding(lineup, &criteria, Some(captain.id)).ok_or(SelectionError::LineupUnderfilled {
        position: "vice-captain".to_string(),
        required: 2,
        available: lineup.starters.len(),
    })
}

fn best_excluding<F>(lineup: &Lineup, criteria: &F, skip: Option<u32>) -> Option<Player>
where
    F: Fn(&Player) -> f64,
{
    let mut best: Option<(f64, &Player)> = None;
    for p in &lineup.starters {
        if Some(p.id) == skip {
            continue;
        }
        let value = criteria(p);
        if best.map_or(true, |(b, _)| value > b) {
            best = Some((value, p));
        }
    }
    best.map(|(_, p)| p.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
