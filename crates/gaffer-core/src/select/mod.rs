// Squad selection: pick a full squad from a pool under budget, quota, and
// club constraints while maximizing total score.
//
// Two strategies share the same contract:
//
// - `Exact` solves the 0/1 integer program by branch and bound and is the
//   reference behaviour.
// - `Greedy` fills each position with its best players and then downgrades
//   until the squad fits the budget. It is fast but not optimal.

mod exact;
mod greedy;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SelectionError;
use crate::player::{Pool, Position};
use crate::squad::{Squad, SquadRules};

/// Two squad scores closer than this are treated as equal.
pub(crate) const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    #[default]
    Exact,
    Greedy,
}

/// Bounds on the exact search. Unbounded by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverLimits {
    pub time_limit: Option<Duration>,
    pub max_nodes: Option<usize>,
}

impl SolverLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_time_limit(time_limit: Duration) -> Self {
        SolverLimits {
            time_limit: Some(time_limit),
            max_nodes: None,
        }
    }
}

/// Select the highest-scoring squad with the exact solver and no limits.
pub fn select_squad(pool: &Pool, rules: &SquadRules) -> Result<Squad, SelectionError> {
    select_squad_with(pool, rules, SelectionStrategy::Exact, &SolverLimits::unbounded())
}

/// Select a squad with an explicit strategy and search limits.
///
/// Never returns a partial squad: the result either satisfies every rule or
/// the call fails.
pub fn select_squad_with(
    pool: &Pool,
    rules: &SquadRules,
    strategy: SelectionStrategy,
    limits: &SolverLimits,
) -> Result<Squad, SelectionError> {
    check_feasibility(pool, rules)?;

    info!(
        "Selecting squad: {} players in pool, budget {}, strategy {:?}",
        pool.len(),
        rules.budget,
        strategy
    );

    let players = match strategy {
        SelectionStrategy::Exact => exact::solve(pool, rules, limits)?,
        SelectionStrategy::Greedy => greedy::solve(pool, rules)?,
    };

    let squad = Squad::new(players, rules)?;
    info!(
        "Selected squad: cost {} / {}, score {:.2}",
        squad.total_cost(),
        rules.budget,
        squad.total_score()
    );
    Ok(squad)
}

/// Cheap necessary conditions checked before any search.
fn check_feasibility(pool: &Pool, rules: &SquadRules) -> Result<(), SelectionError> {
    let mut min_cost: u64 = 0;
    for position in Position::ALL {
        let quota = rules.quotas.get(position);
        let mut costs: Vec<u32> = pool.by_position(position).map(|p| p.cost).collect();
        if costs.len() < quota {
            return Err(SelectionError::infeasible(format!(
                "pool has {} {} players, quota is {}",
                costs.len(),
                position,
                quota
            )));
        }
        costs.sort_unstable();
        min_cost += costs.iter().take(quota).map(|&c| u64::from(c)).sum::<u64>();
    }

    if min_cost > u64::from(rules.budget) {
        return Err(SelectionError::infeasible(format!(
            "budget {} is below the cheapest quota-filling squad ({})",
            rules.budget, min_cost
        )));
    }

    let clubs = pool.clubs().len();
    if clubs * rules.max_per_club < rules.squad_size() {
        return Err(SelectionError::infeasible(format!(
            "{} clubs with at most {} players each cannot fill {} places",
            clubs,
            rules.max_per_club,
            rules.squad_size()
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
