// Player records, positions, and the validated per-gameweek pool.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ScoreModel;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Football positions used for squad quotas and lineup formation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "GK")]
    Goalkeeper,
    #[serde(rename = "DEF")]
    Defender,
    #[serde(rename = "MID")]
    Midfielder,
    #[serde(rename = "FWD")]
    Forward,
}

impl Position {
    /// All positions in squad display order.
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Parse a position code into a Position enum.
    ///
    /// Accepts the short codes ("GK", "GKP", "DEF", "MID", "FWD", "FW") and
    /// the upstream numeric `element_type` codes 1-4.
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GK" | "GKP" | "1" => Some(Position::Goalkeeper),
            "DEF" | "2" => Some(Position::Defender),
            "MID" | "3" => Some(Position::Midfielder),
            "FWD" | "FW" | "4" => Some(Position::Forward),
            _ => None,
        }
    }

    /// Return the display string for this position.
    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }

    /// Deterministic ordering index, also used to index per-position arrays.
    pub fn sort_order(&self) -> usize {
        match self {
            Position::Goalkeeper => 0,
            Position::Defender => 1,
            Position::Midfielder => 2,
            Position::Forward => 3,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Per-position counts
// ---------------------------------------------------------------------------

/// A count per position. Used for squad quotas and for shortlist sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCounts {
    pub goalkeepers: usize,
    pub defenders: usize,
    pub midfielders: usize,
    pub forwards: usize,
}

impl PositionCounts {
    pub const fn new(goalkeepers: usize, defenders: usize, midfielders: usize, forwards: usize) -> Self {
        PositionCounts {
            goalkeepers,
            defenders,
            midfielders,
            forwards,
        }
    }

    /// The standard 2/5/5/3 squad quotas.
    pub const fn squad_quotas() -> Self {
        Self::new(2, 5, 5, 3)
    }

    /// Candidate shortlist sizes used to trim a large pool before a heuristic
    /// search: 10 goalkeepers, 25 defenders, 25 midfielders, 15 forwards.
    pub const fn shortlist_sizes() -> Self {
        Self::new(10, 25, 25, 15)
    }

    pub fn get(&self, position: Position) -> usize {
        match position {
            Position::Goalkeeper => self.goalkeepers,
            Position::Defender => self.defenders,
            Position::Midfielder => self.midfielders,
            Position::Forward => self.forwards,
        }
    }

    pub fn total(&self) -> usize {
        self.goalkeepers + self.defenders + self.midfielders + self.forwards
    }
}

impl Default for PositionCounts {
    fn default() -> Self {
        Self::squad_quotas()
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// One gameweek-scoped player record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identifier, unique within a gameweek's pool.
    pub id: u32,
    /// Display name. Not used by any selection logic.
    #[serde(default)]
    pub name: String,
    pub position: Position,
    /// Club identifier; drives the per-club limit.
    pub club: String,
    /// Price in budget units (tenths of a currency unit).
    pub cost: u32,
    /// Selection criterion, e.g. expected points.
    pub score: f64,
}

impl Player {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        position: Position,
        club: impl Into<String>,
        cost: u32,
        score: f64,
    ) -> Self {
        Player {
            id,
            name: name.into(),
            position,
            club: club.into(),
            cost,
            score,
        }
    }
}

/// Canonical candidate order: score descending, then id ascending.
///
/// Every search in this crate walks candidates in this order so that results
/// do not depend on the order players arrive in.
pub(crate) fn canonical_order(a: &Player, b: &Player) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("player id {id} appears more than once in the pool")]
    DuplicateId { id: u32 },

    #[error("player {id} has cost 0; costs must be positive")]
    ZeroCost { id: u32 },

    #[error("player {id} has a non-finite score")]
    NonFiniteScore { id: u32 },
}

/// The eligible players for one gameweek.
///
/// A player is eligible exactly when present here; exclusion happens before
/// the pool is built.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pool {
    players: Vec<Player>,
    #[serde(skip)]
    index: HashMap<u32, usize>,
}

impl Pool {
    /// Build a pool, rejecting duplicate ids, zero costs, and non-finite scores.
    pub fn new(players: Vec<Player>) -> Result<Self, PoolError> {
        let mut index = HashMap::with_capacity(players.len());
        for (i, player) in players.iter().enumerate() {
            if player.cost == 0 {
                return Err(PoolError::ZeroCost { id: player.id });
            }
            if !player.score.is_finite() {
                return Err(PoolError::NonFiniteScore { id: player.id });
            }
            if index.insert(player.id, i).is_some() {
                return Err(PoolError::DuplicateId { id: player.id });
            }
        }
        Ok(Pool { players, index })
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Player> {
        self.index.get(&id).map(|&i| &self.players[i])
    }

    pub fn contains(&self, id: u32) -> bool {
        self.index.contains_key(&id)
    }

    pub fn by_position(&self, position: Position) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(move |p| p.position == position)
    }

    /// Keep only the top-N players per position by score.
    pub fn shortlist(&self, sizes: &PositionCounts) -> Pool {
        let mut kept: Vec<Player> = Vec::new();
        for position in Position::ALL {
            let mut group: Vec<&Player> = self.by_position(position).collect();
            group.sort_by(|a, b| canonical_order(a, b));
            kept.extend(group.into_iter().take(sizes.get(position)).cloned());
        }
        let index = kept.iter().enumerate().map(|(i, p)| (p.id, i)).collect();
        Pool {
            players: kept,
            index,
        }
    }

    /// Replace every player's score with the model's prediction.
    pub fn rescore<M: ScoreModel + ?Sized>(&self, model: &M) -> Result<Pool, PoolError> {
        let players = self
            .players
            .iter()
            .map(|p| Player {
                score: model.predict(p),
                ..p.clone()
            })
            .collect();
        Pool::new(players)
    }

    /// Ids of the clubs represented in the pool, sorted.
    pub fn clubs(&self) -> Vec<&str> {
        let set: HashSet<&str> = self.players.iter().map(|p| p.club.as_str()).collect();
        let mut clubs: Vec<&str> = set.into_iter().collect();
        clubs.sort_unstable();
        clubs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
