// Weekly transfer planning.
//
// Given last week's squad and this week's pool, decide which players to swap
// out. Each outgoing player is paired with at most one incoming player of the
// same position, the squad never gets more expensive, and transfers beyond the
// free allowance cost a fixed points penalty each.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::SelectionError;
use crate::player::{canonical_order, Player, Pool};
use crate::select::SCORE_EPSILON;
use crate::squad::{club_counts, Squad, SquadRules};

// ---------------------------------------------------------------------------
// Rules and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// Best subset of candidate swaps, found exhaustively.
    #[default]
    Knapsack,
    /// Candidate swaps in rank order while each still pays for itself.
    Greedy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferRules {
    pub free_transfers: usize,
    pub penalty_per_extra_transfer: f64,
    pub max_transfers: Option<usize>,
    pub strategy: TransferStrategy,
}

impl Default for TransferRules {
    fn default() -> Self {
        TransferRules {
            free_transfers: 1,
            penalty_per_extra_transfer: 4.0,
            max_transfers: None,
            strategy: TransferStrategy::Knapsack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub player_out: Player,
    pub player_in: Player,
    pub score_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferPlan {
    pub squad: Squad,
    /// Ordered by score delta, largest first.
    pub transfers: Vec<Transfer>,
    pub points_hit: f64,
    pub net_gain: f64,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// A single swap that is acceptable on its own.
#[derive(Debug, Clone)]
struct Candidate<'a> {
    slot: usize,
    incoming: &'a Player,
    delta: f64,
}

/// Plan this week's transfers for `current`.
///
/// Squad members still in the pool take the pool's score and club. Members
/// missing from the pool keep their snapshot record and can still be sold.
pub fn plan_transfers(
    current: &Squad,
    pool: &Pool,
    rules: &SquadRules,
    plan: &TransferRules,
) -> Result<TransferPlan, SelectionError> {
    let current_cost = current.total_cost();
    if current_cost > rules.budget {
        return Err(SelectionError::infeasible(format!(
            "current squad costs {} which exceeds budget {}",
            current_cost, rules.budget
        )));
    }
    let ceiling = current_cost.min(rules.budget);

    let squad: Vec<Player> = current
        .players()
        .iter()
        .map(|p| match pool.get(p.id) {
            Some(fresh) => Player {
                name: fresh.name.clone(),
                club: fresh.club.clone(),
                score: fresh.score,
                ..p.clone()
            },
            None => p.clone(),
        })
        .collect();

    let candidates = rank_candidates(&squad, pool, rules, ceiling);
    debug!("{} candidate transfers after reservation", candidates.len());

    let checker = Feasibility {
        squad: &squad,
        ceiling,
        max_per_club: rules.max_per_club,
    };
    let chosen = match plan.strategy {
        TransferStrategy::Knapsack => best_subset(&candidates, &checker, plan),
        TransferStrategy::Greedy => greedy_subset(&candidates, &checker, plan),
    };

    // Apply all selected swaps together.
    let mut players = squad.clone();
    let mut transfers = Vec::with_capacity(chosen.len());
    for &i in &chosen {
        let c = &candidates[i];
        transfers.push(Transfer {
            player_out: squad[c.slot].clone(),
            player_in: c.incoming.clone(),
            score_delta: c.delta,
        });
        players[c.slot] = c.incoming.clone();
    }

    let new_squad = Squad::new(players, &rules.with_budget(ceiling)).map_err(|e| {
        let err = SelectionError::from(e);
        if let SelectionError::SquadSizeViolation { expected, actual } = &err {
            error!("Transfer produced a squad of {} players, expected {}", actual, expected);
        }
        err
    })?;

    let points_hit = penalty(transfers.len(), plan);
    let gain: f64 = transfers.iter().map(|t| t.score_delta).sum();
    info!(
        "Planned {} transfers: gain {:.2}, hit {:.1}, cost {} -> {}",
        transfers.len(),
        gain,
        points_hit,
        current_cost,
        new_squad.total_cost()
    );

    Ok(TransferPlan {
        squad: new_squad,
        transfers,
        points_hit,
        net_gain: gain - points_hit,
    })
}

fn penalty(n: usize, plan: &TransferRules) -> f64 {
    n.saturating_sub(plan.free_transfers) as f64 * plan.penalty_per_extra_transfer
}

/// Every single swap that improves score and fits the budget and club limit
/// on its own, ranked and reserved so that each slot and each incoming
/// player appears at most once.
fn rank_candidates<'a>(
    squad: &[Player],
    pool: &'a Pool,
    rules: &SquadRules,
    ceiling: u32,
) -> Vec<Candidate<'a>> {
    let owned: HashSet<u32> = squad.iter().map(|p| p.id).collect();
    let clubs = club_counts(squad);
    let cost: u32 = squad.iter().map(|p| p.cost).sum();

    let mut incoming: Vec<&Player> = pool.players().iter().filter(|p| !owned.contains(&p.id)).collect();
    incoming.sort_by(|a, b| canonical_order(a, b));

    let mut all = Vec::new();
    for (slot, out) in squad.iter().enumerate() {
        for &p in &incoming {
            if p.position != out.position || p.score <= out.score {
                continue;
            }
            if cost - out.cost + p.cost > ceiling {
                continue;
            }
            let at_club = clubs.get(p.club.as_str()).copied().unwrap_or(0);
            if p.club != out.club && at_club + 1 > rules.max_per_club {
                continue;
            }
            all.push(Candidate {
                slot,
                incoming: p,
                delta: p.score - out.score,
            });
        }
    }

    all.sort_by(|a, b| {
        b.delta
            .total_cmp(&a.delta)
            .then_with(|| squad[a.slot].id.cmp(&squad[b.slot].id))
            .then_with(|| a.incoming.id.cmp(&b.incoming.id))
    });

    let mut slots = HashSet::new();
    let mut taken = HashSet::new();
    all.into_iter()
        .filter(|c| {
            if slots.contains(&c.slot) || taken.contains(&c.incoming.id) {
                return false;
            }
            slots.insert(c.slot);
            taken.insert(c.incoming.id);
            true
        })
        .collect()
}

/// Combined budget and club check for a set of swaps.
struct Feasibility<'s> {
    squad: &'s [Player],
    ceiling: u32,
    max_per_club: usize,
}

impl Feasibility<'_> {
    fn allows(&self, candidates: &[Candidate<'_>], chosen: &[usize]) -> bool {
        let mut cost = i64::from(self.squad.iter().map(|p| p.cost).sum::<u32>());
        let mut clubs: BTreeMap<&str, i64> = BTreeMap::new();
        for p in self.squad {
            *clubs.entry(p.club.as_str()).or_insert(0) += 1;
        }
        for &i in chosen {
            let c = &candidates[i];
            let out = &self.squad[c.slot];
            cost += i64::from(c.incoming.cost) - i64::from(out.cost);
            *clubs.entry(out.club.as_str()).or_insert(0) -= 1;
            *clubs.entry(c.incoming.club.as_str()).or_insert(0) += 1;
        }
        cost <= i64::from(self.ceiling) && clubs.values().all(|&n| n <= self.max_per_club as i64)
    }
}

/// Exhaustive subset search with an optimistic bound.
///
/// A subset replaces the best found so far only when its value is higher by
/// more than the score epsilon, or equal with fewer transfers.
fn best_subset(candidates: &[Candidate<'_>], checker: &Feasibility<'_>, plan: &TransferRules) -> Vec<usize> {
    struct Search<'c, 'p> {
        candidates: &'c [Candidate<'p>],
        checker: &'c Feasibility<'c>,
        plan: &'c TransferRules,
        limit: usize,
        /// suffix[i]: sum of deltas of candidates i.. (all positive).
        suffix: Vec<f64>,
        best_value: f64,
        best: Vec<usize>,
    }

    impl Search<'_, '_> {
        fn visit(&mut self, next: usize, chosen: &mut Vec<usize>, gain: f64) {
            let value = gain - penalty(chosen.len(), self.plan);
            let better = value > self.best_value + SCORE_EPSILON
                || ((value - self.best_value).abs() <= SCORE_EPSILON && chosen.len() < self.best.len());
            if better {
                self.best_value = value;
                self.best = chosen.clone();
            }
            if chosen.len() == self.limit {
                return;
            }
            // Adding swaps never lowers the penalty.
            if value + self.suffix[next] < self.best_value - SCORE_EPSILON {
                return;
            }
            for i in next..self.candidates.len() {
                chosen.push(i);
                if self.checker.allows(self.candidates, chosen) {
                    self.visit(i + 1, chosen, gain + self.candidates[i].delta);
                }
                chosen.pop();
            }
        }
    }

    let mut suffix = vec![0.0; candidates.len() + 1];
    for i in (0..candidates.len()).rev() {
        suffix[i] = suffix[i + 1] + candidates[i].delta;
    }
    let mut search = Search {
        candidates,
        checker,
        plan,
        limit: plan.max_transfers.unwrap_or(candidates.len()),
        suffix,
        best_value: 0.0,
        best: Vec::new(),
    };
    search.visit(0, &mut Vec::new(), 0.0);
    search.best
}

/// Walk candidates in rank order. Free transfers are always taken; paid ones
/// only when the delta beats the penalty.
fn greedy_subset(candidates: &[Candidate<'_>], checker: &Feasibility<'_>, plan: &TransferRules) -> Vec<usize> {
    let limit = plan.max_transfers.unwrap_or(candidates.len());
    let mut chosen = Vec::new();
    for (i, c) in candidates.iter().enumerate() {
        if chosen.len() == limit {
            break;
        }
        if chosen.len() >= plan.free_transfers && c.delta <= plan.penalty_per_extra_transfer {
            continue;
        }
        chosen.push(i);
        if !checker.allows(candidates, &chosen) {
            chosen.pop();
        }
    }
    chosen
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;

    const CLUBS: [&str; 5] = ["ARS", "CHE", "LIV", "MCI", "TOT"];

    /// 15 players, cost 50 and score 5.0 each, three per club.
    /// GK 1-2, DEF 3-7, MID 8-12, FWD 13-15.
    fn base_players() -> Vec<Player> {
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
                let club = CLUBS[(id as usize - 1) % CLUBS.len()];
                players.push(Player::new(id, format!("P{id}"), position, club, 50, 5.0));
                id += 1;
            }
        }
        players
    }

    fn squad_from(players: Vec<Player>) -> Squad {
        Squad::new(players, &SquadRules::new(1000)).unwrap()
    }

    fn pool_with(squad: &[Player], extra: Vec<Player>) -> Pool {
        let mut players = squad.to_vec();
        players.extend(extra);
        Pool::new(players).unwrap()
    }

    fn rules(free: usize, penalty: f64) -> TransferRules {
        TransferRules {
            free_transfers: free,
            penalty_per_extra_transfer: penalty,
            ..TransferRules::default()
        }
    }

    fn fwd(id: u32, club: &str, cost: u32, score: f64) -> Player {
        Player::new(id, format!("P{id}"), Position::Forward, club, cost, score)
    }

    #[test]
    fn defaults() {
        let r = TransferRules::default();
        assert_eq!(r.free_transfers, 1);
        assert_eq!(r.penalty_per_extra_transfer, 4.0);
        assert_eq!(r.max_transfers, None);
        assert_eq!(r.strategy, TransferStrategy::Knapsack);
    }

    #[test]
    fn single_upgrade_uses_free_transfer() {
        let mut players = base_players();
        players[12].score = 2.0;
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 10.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].player_out.id, 13);
        assert_eq!(plan.transfers[0].player_in.id, 100);
        assert_eq!(plan.transfers[0].score_delta, 8.0);
        assert_eq!(plan.points_hit, 0.0);
        assert_eq!(plan.net_gain, 8.0);
        assert!(plan.squad.contains(100));
        assert!(!plan.squad.contains(13));
    }

    #[test]
    fn small_gain_not_worth_penalty() {
        let mut players = base_players();
        players[12].score = 2.0;
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 4.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(0, 4.0)).unwrap();
        assert!(plan.transfers.is_empty());
        assert_eq!(plan.squad.ids(), squad.ids());
        assert_eq!(plan.net_gain, 0.0);
    }

    #[test]
    fn paid_transfer_taken_when_it_beats_penalty() {
        let players = base_players();
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 13.0), fwd(101, "FUL", 50, 11.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert_eq!(plan.transfers.len(), 2);
        assert_eq!(plan.points_hit, 4.0);
        assert!((plan.net_gain - 10.0).abs() < 1e-9);
        // Ordered by delta.
        assert_eq!(plan.transfers[0].player_in.id, 100);
    }

    #[test]
    fn paid_transfer_skipped_when_penalty_dominates() {
        let players = base_players();
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 13.0), fwd(101, "FUL", 50, 8.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].player_in.id, 100);
    }

    #[test]
    fn max_transfers_caps_the_plan() {
        let players = base_players();
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 13.0), fwd(101, "FUL", 50, 11.0)]);
        let plan_rules = TransferRules {
            free_transfers: 5,
            max_transfers: Some(1),
            ..TransferRules::default()
        };

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &plan_rules).unwrap();
        assert_eq!(plan.transfers.len(), 1);
    }

    #[test]
    fn cost_never_increases() {
        let players = base_players();
        let squad = squad_from(players.clone());
        // Better but dearer: rejected even though the budget has room.
        let pool = pool_with(&players, vec![fwd(100, "EVE", 55, 20.0), fwd(101, "FUL", 45, 6.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert!(plan.squad.total_cost() <= squad.total_cost());
        assert!(!plan.squad.contains(100));
        assert!(plan.squad.contains(101));
    }

    #[test]
    fn full_club_blocks_incoming_player() {
        let players = base_players();
        let squad = squad_from(players.clone());
        // ARS already has three players; an ARS forward can only replace an
        // ARS forward, and no forward in the squad plays for ARS.
        let pool = pool_with(&players, vec![fwd(100, "ARS", 50, 20.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert!(plan.transfers.is_empty());
    }

    #[test]
    fn same_club_swap_allowed_at_cap() {
        let players = base_players();
        let squad = squad_from(players.clone());
        // Forward 13 plays for LIV, which is full; a LIV forward may replace it.
        let pool = pool_with(&players, vec![fwd(100, "LIV", 50, 20.0)]);

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].player_out.id, 13);
    }

    #[test]
    fn absent_member_keeps_snapshot() {
        let players = base_players();
        let squad = squad_from(players.clone());
        // Forward 15 has left the pool.
        let remaining: Vec<Player> = players.iter().filter(|p| p.id != 15).cloned().collect();
        let pool = Pool::new(remaining).unwrap();

        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert!(plan.squad.contains(15));
        assert!(plan.transfers.is_empty());
    }

    #[test]
    fn refreshed_scores_drive_candidates() {
        let players = base_players();
        let squad = squad_from(players.clone());
        let mut refreshed = players.clone();
        refreshed[13].score = 1.0;
        let pool = pool_with(&refreshed, vec![fwd(100, "EVE", 50, 3.0)]);

        // 3.0 only beats the refreshed score of forward 14, not the snapshot's 5.0.
        let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &rules(1, 4.0)).unwrap();
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].player_out.id, 14);
        assert_eq!(plan.transfers[0].score_delta, 2.0);
    }

    #[test]
    fn equal_value_prefers_fewer_transfers() {
        let players = base_players();
        let squad = squad_from(players.clone());
        // Delta exactly matches the penalty: taking it nets nothing.
        let pool = pool_with(&players, vec![fwd(100, "EVE", 50, 9.0)]);

        for strategy in [TransferStrategy::Knapsack, TransferStrategy::Greedy] {
            let plan_rules = TransferRules {
                free_transfers: 0,
                strategy,
                ..TransferRules::default()
            };
            let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &plan_rules).unwrap();
            assert!(plan.transfers.is_empty(), "{strategy:?}");
        }
    }

    #[test]
    fn combined_club_count_respected() {
        let mut players = base_players();
        // Both goalkeepers move to EVE, leaving it one place under the cap.
        players[0].club = "EVE".into();
        players[1].club = "EVE".into();
        let squad = squad_from(players.clone());
        let incoming = vec![
            fwd(100, "EVE", 50, 13.0),
            Player::new(101, "P101", Position::Midfielder, "EVE", 50, 12.0),
            Player::new(102, "P102", Position::Defender, "FUL", 50, 11.0),
        ];
        let pool = pool_with(&players, incoming);

        for strategy in [TransferStrategy::Knapsack, TransferStrategy::Greedy] {
            let plan_rules = TransferRules {
                free_transfers: 2,
                strategy,
                ..TransferRules::default()
            };
            let plan = plan_transfers(&squad, &pool, &SquadRules::new(1000), &plan_rules).unwrap();
            let ins: Vec<u32> = plan.transfers.iter().map(|t| t.player_in.id).collect();
            assert_eq!(ins, vec![100, 102], "{strategy:?}");
            assert_eq!(plan.squad.club_counts().get("EVE"), Some(&3));
        }
    }

    #[test]
    fn budget_below_current_cost_is_infeasible() {
        let players = base_players();
        let squad = squad_from(players.clone());
        let pool = pool_with(&players, Vec::new());

        let err = plan_transfers(&squad, &pool, &SquadRules::new(700), &rules(1, 4.0)).unwrap_err();
        assert!(matches!(err, SelectionError::InfeasibleSelection { .. }));
    }

    #[test]
    fn rules_deserialize_with_defaults() {
        let r: TransferRules = serde_json::from_str(r#"{"strategy": "greedy"}"#).unwrap();
        assert_eq!(r.free_transfers, 1);
        assert_eq!(r.strategy, TransferStrategy::Greedy);
    }
}
