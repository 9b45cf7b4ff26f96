// Exact squad selection by branch and bound.
//
// Bound: Lagrangian relaxation of the per-club limit. Each club gets a
// non-negative penalty subtracted from its players' scores; what remains is a
// multiple-choice knapsack (exactly `quota` players per position, total cost
// within budget) that dynamic programming solves exactly. The knapsack optimum
// plus `max_per_club` times the penalty sum bounds every feasible completion
// of a node for any penalties, so subgradient steps only tighten it.
//
// Incumbents come from the greedy selection, from relaxed optima that happen
// to respect the club limit, and from repairing the ones that do not. Until
// one exists, a score below any squad's stands in for it, so an infeasible
// pool ends as soon as the bound drops under that floor.
//
// Branching: when a relaxed optimum overfills a club C, take the free C
// players q0..qm in it (weakest first). Child i forces q0..q(i-1) in and
// excludes qi; a last child forces all of them. These children partition every
// completion of the node. When no iterate overfills a club the node splits on
// a single free player instead.
//
// Before searching, a player is dropped when enough cheaper-or-equal, better
// players at the same position exist that one of them can always replace it
// without breaking the club limit.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::SelectionError;
use crate::player::{canonical_order, Player, Pool, Position};
use crate::select::{greedy, SolverLimits, SCORE_EPSILON};
use crate::squad::SquadRules;

pub(super) fn solve(
    pool: &Pool,
    rules: &SquadRules,
    limits: &SolverLimits,
) -> Result<Vec<Player>, SelectionError> {
    let started = limits.time_limit.map(|_| Instant::now());
    let problem = Problem::new(pool, rules);
    debug!(
        "Exact search over {} of {} players, {} clubs",
        problem.candidates.len(),
        pool.len(),
        problem.club_count
    );

    let mut search = Search {
        problem: &problem,
        incumbent: problem.greedy_seed(rules),
        floor: problem.score_floor(),
    };
    if let Some(seed) = &search.incumbent {
        debug!("Greedy incumbent {:.4}", seed.score);
    }

    let mut stack = vec![Node {
        fixes: vec![Fix::Free; problem.candidates.len()],
        penalties: vec![0.0; problem.club_count],
    }];
    let mut nodes = 0usize;

    while let Some(node) = stack.pop() {
        nodes += 1;
        check_limits(limits, started, nodes)?;

        let schedule = if nodes == 1 { Schedule::ROOT } else { Schedule::CHILD };
        let children = search.evaluate(&node, schedule);
        stack.extend(children.into_iter().rev());
    }

    let Some(best) = search.incumbent else {
        return Err(SelectionError::infeasible(
            "no squad satisfies the club limit within budget",
        ));
    };
    info!("Exact search finished: {} nodes, score {:.2}", nodes, best.score);

    Ok(best
        .chosen
        .into_iter()
        .map(|i| problem.candidates[i].clone())
        .collect())
}

fn check_limits(
    limits: &SolverLimits,
    started: Option<Instant>,
    nodes: usize,
) -> Result<(), SelectionError> {
    if let Some(max_nodes) = limits.max_nodes {
        if nodes > max_nodes {
            let elapsed = started.map(|s| s.elapsed()).unwrap_or_default();
            return Err(SelectionError::SelectionTimeout {
                elapsed,
                nodes: nodes - 1,
            });
        }
    }
    if let (Some(limit), Some(started)) = (limits.time_limit, started) {
        let elapsed = started.elapsed();
        if elapsed >= limit {
            return Err(SelectionError::SelectionTimeout {
                elapsed,
                nodes: nodes - 1,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fix {
    Free,
    Forced,
    Excluded,
}

struct Node {
    fixes: Vec<Fix>,
    /// Club penalties to start the subgradient from.
    penalties: Vec<f64>,
}

struct Incumbent {
    score: f64,
    chosen: Vec<usize>,
}

/// Subgradient effort for one node.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    iterations: usize,
    step: f64,
}

impl Schedule {
    const ROOT: Schedule = Schedule {
        iterations: 150,
        step: 2.0,
    };
    const CHILD: Schedule = Schedule {
        iterations: 25,
        step: 1.0,
    };
    const MIN_STEP: f64 = 1e-3;
    /// Iterations without a better bound before the step is halved.
    const STALL: usize = 3;
}

struct Search<'a> {
    problem: &'a Problem,
    incumbent: Option<Incumbent>,
    /// Below every feasible score. Stands in for the incumbent until one is
    /// found, so a bound under it proves the node empty.
    floor: f64,
}

impl Search<'_> {
    fn best_score(&self) -> f64 {
        self.incumbent.as_ref().map_or(self.floor, |best| best.score)
    }

    fn offer(&mut self, chosen: Vec<usize>) {
        let score = self.problem.score(&chosen);
        if score > self.best_score() + SCORE_EPSILON {
            debug!("New incumbent {:.4}", score);
            self.incumbent = Some(Incumbent { score, chosen });
        }
    }

    /// Tighten the node's bound by subgradient steps on the club penalties.
    /// Returns the children still worth exploring, empty when the node is
    /// pruned or solved.
    fn evaluate(&mut self, node: &Node, schedule: Schedule) -> Vec<Node> {
        let problem = self.problem;
        let mut penalties = node.penalties.clone();
        let mut best: Option<(Relaxed, Vec<f64>)> = None;
        let mut last_overfilled: Option<Vec<usize>> = None;
        let mut step = schedule.step;
        let mut stalled = 0;

        for _ in 0..schedule.iterations {
            let Some(relaxed) = problem.relax(&node.fixes, &penalties) else {
                return Vec::new();
            };
            let counts = problem.club_counts(&relaxed.chosen);
            let feasible = counts.iter().all(|&c| c <= problem.max_per_club);
            if feasible {
                self.offer(relaxed.chosen.clone());
            } else {
                if let Some(repaired) = problem.repair(&node.fixes, &relaxed.chosen) {
                    self.offer(repaired);
                }
                last_overfilled = Some(relaxed.chosen.clone());
            }

            let bound = relaxed.bound;
            if best.as_ref().map_or(true, |(b, _)| bound < b.bound - SCORE_EPSILON) {
                best = Some((relaxed, penalties.clone()));
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= Schedule::STALL {
                    step /= 2.0;
                    stalled = 0;
                }
            }

            let best_bound = best.as_ref().map_or(bound, |(b, _)| b.bound);
            if best_bound <= self.best_score() + SCORE_EPSILON {
                return Vec::new();
            }

            // Complementary slackness: the relaxed optimum is optimal here.
            let slack: f64 = penalties
                .iter()
                .zip(&counts)
                .map(|(&l, &c)| l * (problem.max_per_club as f64 - c as f64))
                .sum();
            if feasible && slack <= SCORE_EPSILON {
                return Vec::new();
            }

            let gradient: Vec<f64> = penalties
                .iter()
                .zip(&counts)
                .map(|(&l, &c)| {
                    let g = c as f64 - problem.max_per_club as f64;
                    if l <= 0.0 && g < 0.0 {
                        0.0
                    } else {
                        g
                    }
                })
                .collect();
            let norm: f64 = gradient.iter().map(|g| g * g).sum();
            if norm == 0.0 {
                break;
            }
            let t = step * (bound - self.best_score()) / norm;
            for (l, g) in penalties.iter_mut().zip(&gradient) {
                *l = (*l + t * g).max(0.0);
            }
            if step < Schedule::MIN_STEP {
                break;
            }
        }

        let Some((relaxed, penalties)) = best else {
            return Vec::new();
        };
        if let Some(club) = problem.overfilled_club(&relaxed.chosen) {
            return problem.partition(&node.fixes, &relaxed.chosen, club, &penalties);
        }
        if let Some(chosen) = last_overfilled {
            if let Some(club) = problem.overfilled_club(&chosen) {
                return problem.partition(&node.fixes, &chosen, club, &penalties);
            }
        }
        problem.split_on_player(&node.fixes, &relaxed.chosen, &penalties)
    }
}

// ---------------------------------------------------------------------------
// Problem data
// ---------------------------------------------------------------------------

struct Relaxed {
    /// Lagrangian value: knapsack optimum plus the club limit's penalty term.
    bound: f64,
    /// Candidate indices of the relaxed optimum.
    chosen: Vec<usize>,
}

struct Problem {
    /// Grouped by position, canonical order within a group.
    candidates: Vec<Player>,
    /// Club index of each candidate; clubs are numbered in name order.
    clubs: Vec<usize>,
    club_count: usize,
    /// Costs divided by the common gcd.
    weights: Vec<usize>,
    groups: [Range<usize>; 4],
    quotas: [usize; 4],
    capacity: usize,
    budget: u32,
    max_per_club: usize,
}

impl Problem {
    fn new(pool: &Pool, rules: &SquadRules) -> Self {
        let mut candidates: Vec<Player> = pool.players().to_vec();
        candidates.sort_by(|a, b| {
            a.position
                .sort_order()
                .cmp(&b.position.sort_order())
                .then_with(|| canonical_order(a, b))
        });
        let candidates = without_dominated(candidates, rules);

        let names: BTreeSet<&str> = candidates.iter().map(|p| p.club.as_str()).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let clubs: Vec<usize> = candidates.iter().map(|p| index[p.club.as_str()]).collect();
        let club_count = names.len();

        let divisor = candidates
            .iter()
            .fold(rules.budget, |g, p| gcd(g, p.cost))
            .max(1);
        let weights: Vec<usize> = candidates
            .iter()
            .map(|p| (p.cost / divisor) as usize)
            .collect();

        let mut groups: [Range<usize>; 4] = [0..0, 0..0, 0..0, 0..0];
        let mut quotas = [0usize; 4];
        let mut start = 0;
        for position in Position::ALL {
            let slot = position.sort_order();
            let len = candidates[start..]
                .iter()
                .take_while(|p| p.position == position)
                .count();
            groups[slot] = start..start + len;
            quotas[slot] = rules.quotas.get(position);
            start += len;
        }

        // Capacity beyond the dearest possible squad is never used.
        let mut dearest = 0usize;
        for slot in 0..4 {
            let mut w: Vec<usize> = weights[groups[slot].clone()].to_vec();
            w.sort_unstable_by(|a, b| b.cmp(a));
            dearest += w.iter().take(quotas[slot]).sum::<usize>();
        }
        let capacity = ((rules.budget / divisor) as usize).min(dearest);

        Problem {
            candidates,
            clubs,
            club_count,
            weights,
            groups,
            quotas,
            capacity,
            budget: rules.budget,
            max_per_club: rules.max_per_club,
        }
    }

    fn score(&self, chosen: &[usize]) -> f64 {
        chosen.iter().map(|&i| self.candidates[i].score).sum()
    }

    fn score_floor(&self) -> f64 {
        -1.0 - self.candidates.iter().map(|p| p.score.abs()).sum::<f64>()
    }

    fn club_counts(&self, chosen: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.club_count];
        for &i in chosen {
            counts[self.clubs[i]] += 1;
        }
        counts
    }

    /// The greedy squad over the remaining candidates, as a starting incumbent.
    fn greedy_seed(&self, rules: &SquadRules) -> Option<Incumbent> {
        let pool = Pool::new(self.candidates.clone()).ok()?;
        let players = greedy::solve(&pool, rules).ok()?;
        let index: HashMap<u32, usize> = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        let mut chosen: Vec<usize> = players
            .iter()
            .filter_map(|p| index.get(&p.id).copied())
            .collect();
        chosen.sort_unstable();
        Some(Incumbent {
            score: self.score(&chosen),
            chosen,
        })
    }

    /// Solve the node's relaxation under the given club penalties. `None`
    /// when the node has no completion even without the club limit.
    fn relax(&self, fixes: &[Fix], penalties: &[f64]) -> Option<Relaxed> {
        let cap = self.capacity;
        let scores: Vec<f64> = self
            .candidates
            .iter()
            .zip(&self.clubs)
            .map(|(p, &club)| p.score - penalties[club])
            .collect();
        let mut tables = Vec::with_capacity(4);

        for slot in 0..4 {
            let range = self.groups[slot].clone();
            let forced: Vec<usize> = range.clone().filter(|&i| fixes[i] == Fix::Forced).collect();
            let free: Vec<usize> = range.filter(|&i| fixes[i] == Fix::Free).collect();
            let quota = self.quotas[slot];
            if forced.len() > quota || forced.len() + free.len() < quota {
                return None;
            }
            let forced_weight: usize = forced.iter().map(|&i| self.weights[i]).sum();
            if forced_weight > cap {
                return None;
            }
            let forced_score: f64 = forced.iter().map(|&i| scores[i]).sum();
            let knapsack =
                Knapsack::solve(self, free, quota - forced.len(), cap - forced_weight, &scores);

            let values: Vec<f64> = (0..=cap)
                .map(|c| {
                    if c < forced_weight {
                        f64::NEG_INFINITY
                    } else {
                        forced_score + knapsack.best[c - forced_weight]
                    }
                })
                .collect();
            tables.push(PositionTable {
                forced,
                forced_weight,
                knapsack,
                values,
            });
        }

        // Budget convolution across positions. splits[s][c] is the capacity
        // given to position s when positions 0..=s share capacity c. The last
        // position only needs the full capacity.
        let mut acc = tables[0].values.clone();
        let mut splits: Vec<Vec<usize>> = vec![(0..=cap).collect()];
        for (s, table) in tables.iter().enumerate().skip(1) {
            let mut next = vec![f64::NEG_INFINITY; cap + 1];
            let mut split = vec![0usize; cap + 1];
            let from = if s == tables.len() - 1 { cap } else { 0 };
            for c in from..=cap {
                for give in 0..=c {
                    let v = acc[c - give] + table.values[give];
                    if v > next[c] {
                        next[c] = v;
                        split[c] = give;
                    }
                }
            }
            acc = next;
            splits.push(split);
        }

        let value = acc[cap];
        if !value.is_finite() {
            return None;
        }

        let mut chosen = Vec::with_capacity(self.quotas.iter().sum());
        let mut remaining = cap;
        for slot in (0..4).rev() {
            let give = splits[slot][remaining];
            let table = &tables[slot];
            chosen.extend(table.forced.iter().copied());
            chosen.extend(table.knapsack.pick(give - table.forced_weight));
            remaining -= give;
        }
        chosen.sort_unstable();

        let penalty_sum: f64 = penalties.iter().sum();
        Some(Relaxed {
            bound: value + self.max_per_club as f64 * penalty_sum,
            chosen,
        })
    }

    /// The club exceeding the limit by most; ties go to the first club name.
    fn overfilled_club(&self, chosen: &[usize]) -> Option<usize> {
        let mut worst: Option<(usize, usize)> = None;
        for (club, count) in self.club_counts(chosen).into_iter().enumerate() {
            if count > self.max_per_club && worst.map_or(true, |(_, c)| count > c) {
                worst = Some((club, count));
            }
        }
        worst.map(|(club, _)| club)
    }

    /// Swap players out of overfilled clubs for the best affordable
    /// replacement at the same position, cheapest loss first.
    fn repair(&self, fixes: &[Fix], chosen: &[usize]) -> Option<Vec<usize>> {
        let mut squad = chosen.to_vec();
        let mut counts = self.club_counts(&squad);
        let mut cost: u32 = squad.iter().map(|&i| self.candidates[i].cost).sum();

        while let Some(club) = counts.iter().position(|&c| c > self.max_per_club) {
            let mut best: Option<(f64, usize, usize)> = None;
            for (slot, &out) in squad.iter().enumerate() {
                if self.clubs[out] != club || fixes[out] == Fix::Forced {
                    continue;
                }
                let spare = self.budget - (cost - self.candidates[out].cost);
                let group = self.groups[self.candidates[out].position.sort_order()].clone();
                // Canonical order: the first fit is the best one.
                let replacement = group.into_iter().find(|&r| {
                    fixes[r] != Fix::Excluded
                        && counts[self.clubs[r]] < self.max_per_club
                        && self.candidates[r].cost <= spare
                        && !squad.contains(&r)
                });
                if let Some(r) = replacement {
                    let loss = self.candidates[out].score - self.candidates[r].score;
                    if best.map_or(true, |(l, _, _)| loss < l) {
                        best = Some((loss, slot, r));
                    }
                }
            }

            let (_, slot, replacement) = best?;
            let out = squad[slot];
            counts[self.clubs[out]] -= 1;
            counts[self.clubs[replacement]] += 1;
            cost = cost - self.candidates[out].cost + self.candidates[replacement].cost;
            squad[slot] = replacement;
        }

        squad.sort_unstable();
        Some(squad)
    }

    fn partition(
        &self,
        fixes: &[Fix],
        chosen: &[usize],
        club: usize,
        penalties: &[f64],
    ) -> Vec<Node> {
        let mut free: Vec<usize> = chosen
            .iter()
            .copied()
            .filter(|&i| fixes[i] == Fix::Free && self.clubs[i] == club)
            .collect();
        free.sort_by(|&a, &b| {
            let (pa, pb) = (&self.candidates[a], &self.candidates[b]);
            pa.score.total_cmp(&pb.score).then_with(|| pa.id.cmp(&pb.id))
        });

        let already_forced = fixes
            .iter()
            .enumerate()
            .filter(|&(i, &f)| f == Fix::Forced && self.clubs[i] == club)
            .count();

        let child = |forced: &[usize], excluded: Option<usize>| {
            let mut fixes = fixes.to_vec();
            for &i in forced {
                fixes[i] = Fix::Forced;
            }
            if let Some(i) = excluded {
                fixes[i] = Fix::Excluded;
            }
            Node {
                fixes,
                penalties: penalties.to_vec(),
            }
        };

        let mut children = Vec::with_capacity(free.len() + 1);
        for (n, &excluded) in free.iter().enumerate() {
            if already_forced + n > self.max_per_club {
                break;
            }
            children.push(child(&free[..n], Some(excluded)));
        }
        if already_forced + free.len() <= self.max_per_club {
            children.push(child(&free, None));
        }
        children
    }

    /// Force or exclude the free player whose club carries the largest
    /// penalty. Forcing is explored first.
    fn split_on_player(&self, fixes: &[Fix], chosen: &[usize], penalties: &[f64]) -> Vec<Node> {
        let mut pick: Option<usize> = None;
        for &i in chosen {
            if fixes[i] != Fix::Free {
                continue;
            }
            if pick.map_or(true, |p| penalties[self.clubs[i]] > penalties[self.clubs[p]]) {
                pick = Some(i);
            }
        }
        let Some(pick) = pick else {
            return Vec::new();
        };

        [Fix::Forced, Fix::Excluded]
            .into_iter()
            .map(|fix| {
                let mut fixes = fixes.to_vec();
                fixes[pick] = fix;
                Node {
                    fixes,
                    penalties: penalties.to_vec(),
                }
            })
            .collect()
    }
}

/// Drop every player that a better, cheaper-or-equal player at the same
/// position can always replace. With `quota` such players, at most
/// `quota - 1` of them share a squad with the dominated one, and the rest can
/// only be blocked by clubs already at the limit. The other 14 places fill at
/// most `14 / max_per_club` clubs, so discounting that many of the largest
/// other-club groups leaves a free replacement.
fn without_dominated(candidates: Vec<Player>, rules: &SquadRules) -> Vec<Player> {
    let full_clubs = (rules.squad_size().saturating_sub(1)) / rules.max_per_club.max(1);
    let mut kept: Vec<Player> = Vec::with_capacity(candidates.len());
    let mut dropped = 0usize;

    for (i, p) in candidates.iter().enumerate() {
        let mut by_club: HashMap<&str, usize> = HashMap::new();
        let mut better = 0usize;
        for q in candidates[..i].iter().rev() {
            if q.position != p.position {
                break;
            }
            if q.cost <= p.cost {
                *by_club.entry(q.club.as_str()).or_insert(0) += 1;
                better += 1;
            }
        }
        let mut others: Vec<usize> = by_club
            .iter()
            .filter(|(&club, _)| club != p.club)
            .map(|(_, &n)| n)
            .collect();
        others.sort_unstable_by(|a, b| b.cmp(a));
        let blocked: usize = others.iter().take(full_clubs).sum();

        if better - blocked >= rules.quotas.get(p.position) {
            dropped += 1;
        } else {
            kept.push(p.clone());
        }
    }

    if dropped > 0 {
        debug!("Dropped {} dominated players", dropped);
    }
    kept
}

struct PositionTable {
    forced: Vec<usize>,
    forced_weight: usize,
    knapsack: Knapsack,
    /// Best score for the whole position quota within each capacity.
    values: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Exactly-k knapsack
// ---------------------------------------------------------------------------

/// Best score choosing exactly `k` of `items`, for every capacity up to `cap`.
struct Knapsack {
    items: Vec<usize>,
    weights: Vec<usize>,
    k: usize,
    cap: usize,
    /// best[c]: optimum with total weight at most c.
    best: Vec<f64>,
    /// take[(item * (k + 1) + j) * (cap + 1) + c]: item was taken to reach
    /// the optimum for j players within c after considering it.
    take: Vec<bool>,
}

impl Knapsack {
    /// `scores` is indexed by candidate.
    fn solve(
        problem: &Problem,
        items: Vec<usize>,
        k: usize,
        cap: usize,
        scores: &[f64],
    ) -> Self {
        let width = cap + 1;
        let mut dp = vec![f64::NEG_INFINITY; (k + 1) * width];
        dp[..width].fill(0.0);
        let mut take = vec![false; items.len() * (k + 1) * width];
        let weights: Vec<usize> = items.iter().map(|&i| problem.weights[i]).collect();

        for (n, &item) in items.iter().enumerate() {
            let w = weights[n];
            let s = scores[item];
            for j in (1..=k).rev() {
                for c in (w..=cap).rev() {
                    let with = dp[(j - 1) * width + c - w] + s;
                    if with > dp[j * width + c] {
                        dp[j * width + c] = with;
                        take[(n * (k + 1) + j) * width + c] = true;
                    }
                }
            }
        }

        let best = dp[k * width..].to_vec();
        Knapsack {
            items,
            weights,
            k,
            cap,
            best,
            take,
        }
    }

    /// Items of the optimum for capacity `c`.
    fn pick(&self, mut c: usize) -> Vec<usize> {
        let width = self.cap + 1;
        let mut j = self.k;
        let mut picked = Vec::with_capacity(self.k);
        for n in (0..self.items.len()).rev() {
            if j == 0 {
                break;
            }
            if self.take[(n * (self.k + 1) + j) * width + c] {
                picked.push(self.items[n]);
                c -= self.weights[n];
                j -= 1;
            }
        }
        picked
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
