// Library root: the squad optimization engine.
//
// Everything here is synchronous and pure over in-memory data. Ingestion,
// persistence, and runtime concerns live in gaffer-app.

pub mod error;
pub mod lineup;
pub mod model;
pub mod player;
pub mod select;
pub mod squad;
pub mod transfer;

pub use error::SelectionError;
pub use lineup::{by_score, choose_captain, choose_vice_captain, select_lineup, Lineup};
pub use model::{DifficultyScaled, LinearXpts, ScoreModel};
pub use player::{Player, Pool, PoolError, Position, PositionCounts};
pub use select::{select_squad, select_squad_with, SelectionStrategy, SolverLimits};
pub use squad::{Squad, SquadError, SquadRules};
pub use transfer::{plan_transfers, Transfer, TransferPlan, TransferRules, TransferStrategy};
