// Greedy squad selection: fill every position with its best players, then
// downgrade until the squad fits the budget.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::SelectionError;
use crate::player::{canonical_order, Player, Pool, Position};
use crate::squad::SquadRules;

pub(super) fn solve(pool: &Pool, rules: &SquadRules) -> Result<Vec<Player>, SelectionError> {
    let mut by_position: HashMap<Position, Vec<&Player>> = HashMap::new();
    for position in Position::ALL {
        let mut group: Vec<&Player> = pool.by_position(position).collect();
        group.sort_by(|a, b| canonical_order(a, b));
        by_position.insert(position, group);
    }

    // ---- Initial fill, skipping clubs that are already full ----

    let mut selected: Vec<&Player> = Vec::with_capacity(rules.squad_size());
    let mut clubs: HashMap<&str, usize> = HashMap::new();
    for position in Position::ALL {
        let quota = rules.quotas.get(position);
        let mut taken = 0;
        for &p in &by_position[&position] {
            if taken == quota {
                break;
            }
            let count = clubs.entry(p.club.as_str()).or_insert(0);
            if *count >= rules.max_per_club {
                continue;
            }
            *count += 1;
            selected.push(p);
            taken += 1;
        }
        if taken < quota {
            return Err(SelectionError::infeasible(format!(
                "club limit leaves only {} of {} {} places fillable",
                taken, quota, position
            )));
        }
    }

    // ---- Downgrade until within budget ----

    let mut cost: u32 = selected.iter().map(|p| p.cost).sum();
    let mut swaps = 0usize;
    while cost > rules.budget {
        let chosen: HashSet<u32> = selected.iter().map(|p| p.id).collect();
        let mut order: Vec<usize> = (0..selected.len()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (selected[a], selected[b]);
            pa.score.total_cmp(&pb.score).then_with(|| pa.id.cmp(&pb.id))
        });

        let swap = order.into_iter().find_map(|slot| {
            let out = selected[slot];
            by_position[&out.position]
                .iter()
                .find(|r| {
                    !chosen.contains(&r.id)
                        && r.cost < out.cost
                        && (r.club == out.club
                            || clubs.get(r.club.as_str()).copied().unwrap_or(0)
                                < rules.max_per_club)
                })
                .map(|&r| (slot, r))
        });

        let Some((slot, replacement)) = swap else {
            return Err(SelectionError::infeasible(format!(
                "no cheaper replacement brings cost {} under budget {}",
                cost, rules.budget
            )));
        };

        let out = selected[slot];
        debug!(
            "Downgrade {} ({}) -> {} ({})",
            out.id, out.cost, replacement.id, replacement.cost
        );
        if let Some(count) = clubs.get_mut(out.club.as_str()) {
            *count -= 1;
        }
        *clubs.entry(replacement.club.as_str()).or_insert(0) += 1;
        cost = cost - out.cost + replacement.cost;
        selected[slot] = replacement;
        swaps += 1;
    }

    debug!("Greedy selection made {} downgrades", swaps);
    Ok(selected.into_iter().cloned().collect())
}
