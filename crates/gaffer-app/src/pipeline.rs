// One gameweek run: pool -> squad (fresh or via transfers) -> lineup -> report.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use gaffer_core::{
    by_score, choose_captain, choose_vice_captain, plan_transfers, select_lineup,
    select_squad_with, DifficultyScaled, LinearXpts, Lineup, Player, Pool, PositionCounts, SelectionError,
    SelectionStrategy, SolverLimits, Squad, SquadRules, Transfer,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, DifficultyConfig, SolverConfig};
use crate::ingest;
use crate::store::SnapshotStore;

/// Strategy label stored for squads produced by the transfer planner.
pub const TRANSFERS_LABEL: &str = "transfers";

/// Everything the run decided for one gameweek.
#[derive(Debug, Clone, Serialize)]
pub struct GameweekReport {
    pub gameweek: u32,
    /// "exact", "greedy" or "transfers".
    pub strategy: String,
    pub squad: Squad,
    pub lineup: Lineup,
    pub formation: String,
    pub captain: Player,
    pub vice_captain: Player,
    /// Starters' scores with the captain counted twice.
    pub predicted_points: f64,
    pub transfers: Vec<Transfer>,
    pub points_hit: f64,
    pub net_gain: f64,
}

pub fn strategy_label(strategy: SelectionStrategy) -> &'static str {
    match strategy {
        SelectionStrategy::Exact => "exact",
        SelectionStrategy::Greedy => "greedy",
    }
}

// ---------------------------------------------------------------------------
// Squad selection off the async runtime
// ---------------------------------------------------------------------------

async fn select_blocking(
    pool: Arc<Pool>,
    rules: SquadRules,
    strategy: SelectionStrategy,
    limits: SolverLimits,
) -> Result<std::result::Result<Squad, SelectionError>> {
    tokio::task::spawn_blocking(move || select_squad_with(&pool, &rules, strategy, &limits))
        .await
        .context("squad selection task panicked")
}

/// Select a fresh squad on a blocking thread.
///
/// The configured time limit bounds both the search itself and the wait for
/// it. A timed-out exact search is retried once with the greedy strategy when
/// `fallback_to_greedy` is set. Returns the squad and the strategy that
/// produced it.
pub async fn solve_squad(
    pool: Arc<Pool>,
    rules: &SquadRules,
    solver: &SolverConfig,
) -> Result<(Squad, SelectionStrategy)> {
    let strategy = solver.strategy;
    let attempt = select_blocking(pool.clone(), rules.clone(), strategy, solver.limits());

    let outcome = match solver.time_limit() {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(joined) => joined?,
            Err(_) => Err(SelectionError::SelectionTimeout {
                elapsed: limit,
                nodes: 0,
            }),
        },
        None => attempt.await?,
    };

    match outcome {
        Ok(squad) => Ok((squad, strategy)),
        Err(e) if e.is_retryable() && solver.fallback_to_greedy && strategy != SelectionStrategy::Greedy => {
            warn!("{e}; retrying with the greedy strategy");
            let squad = select_blocking(
                pool,
                rules.clone(),
                SelectionStrategy::Greedy,
                SolverLimits::unbounded(),
            )
            .await??;
            Ok((squad, SelectionStrategy::Greedy))
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Gameweek run
// ---------------------------------------------------------------------------

/// Load the pool named by `config`, rescoring it when a model is configured.
/// Relative paths resolve against `base_dir`.
pub fn load_scored_pool(config: &Config, base_dir: &Path) -> Result<Pool> {
    let pool_path = base_dir.join(&config.data_paths.pool);
    let pool = ingest::load_pool(&pool_path)
        .with_context(|| format!("failed to load player pool from {}", pool_path.display()))?;

    let Some(model) = &config.model else {
        return Ok(pool);
    };
    let features_path = base_dir.join(&model.features);
    let features = ingest::load_features(&features_path).with_context(|| {
        format!("failed to load model features from {}", features_path.display())
    })?;
    let xpts = LinearXpts::new(model.coefficient, model.intercept, features);

    let Some(difficulty) = &model.difficulty else {
        let pool = pool.rescore(&xpts).context("score model produced an invalid pool")?;
        info!("Rescored pool with linear xPts model");
        return Ok(pool);
    };
    let fixtures_path = base_dir.join(&difficulty.fixtures);
    let fixtures = ingest::load_difficulty(&fixtures_path, DifficultyConfig::MAX_DIFFICULTY)
        .with_context(|| {
            format!("failed to load fixture difficulty from {}", fixtures_path.display())
        })?;
    let scaled = DifficultyScaled::new(xpts, fixtures, difficulty.multiplier_table());
    let pool = pool.rescore(&scaled).context("score model produced an invalid pool")?;
    info!("Rescored pool with linear xPts model scaled by fixture difficulty");
    Ok(pool)
}

/// Run `gameweek`: plan transfers from the latest earlier snapshot, or select
/// a fresh squad when there is none or `wildcard` is set. The resulting squad
/// and transfers are saved to `store`.
pub async fn run_gameweek(
    config: &Config,
    base_dir: &Path,
    store: &SnapshotStore,
    gameweek: u32,
    wildcard: bool,
) -> Result<GameweekReport> {
    let pool = load_scored_pool(config, base_dir)?;

    let previous = if wildcard {
        info!("Wildcard for gameweek {gameweek}: ignoring previous squads");
        None
    } else {
        store.latest_before(gameweek)?
    };

    let (squad, strategy, transfers, points_hit, net_gain) = match previous {
        Some(snapshot) => {
            info!(
                "Planning transfers for gameweek {gameweek} from gameweek {} squad",
                snapshot.gameweek
            );
            let current = Squad::new(snapshot.players, &config.squad)
                .map_err(SelectionError::from)
                .with_context(|| {
                    format!("stored squad for gameweek {} is invalid", snapshot.gameweek)
                })?;
            let plan = plan_transfers(&current, &pool, &config.squad, &config.transfers)?;
            (
                plan.squad,
                TRANSFERS_LABEL.to_string(),
                plan.transfers,
                plan.points_hit,
                plan.net_gain,
            )
        }
        None => {
            let pool = if config.solver.shortlist {
                pool.shortlist(&PositionCounts::shortlist_sizes())
            } else {
                pool
            };
            let (squad, used) = solve_squad(Arc::new(pool), &config.squad, &config.solver).await?;
            (squad, strategy_label(used).to_string(), Vec::new(), 0.0, 0.0)
        }
    };

    let lineup = select_lineup(&squad, by_score)?;
    let captain = choose_captain(&lineup, by_score)?;
    let vice_captain = choose_vice_captain(&lineup, by_score)?;
    let predicted_points = lineup.predicted_points(by_score, &captain);

    store.save_gameweek(gameweek, squad.players(), &strategy, &transfers)?;
    info!(
        "Gameweek {gameweek}: {} transfers, formation {}, captain {} ({}), predicted {:.2}",
        transfers.len(),
        lineup.formation(),
        captain.name,
        captain.id,
        predicted_points
    );

    Ok(GameweekReport {
        gameweek,
        strategy,
        formation: lineup.formation(),
        squad,
        lineup,
        captain,
        vice_captain,
        predicted_points,
        transfers,
        points_hit,
        net_gain,
    })
}
