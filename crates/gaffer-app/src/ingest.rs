// Player pool, model feature and fixture difficulty loading from CSV.
//
// Accepts canonical headers (id,name,position,club,cost,score) as well as the
// upstream bootstrap names (element, web_name, element_type, team, now_cost,
// xPts or ict_index). Any bad row fails the whole load.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use gaffer_core::{Player, Pool, PoolError, Position};
use serde::Deserialize;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {message}")]
    Row { row: usize, message: String },

    #[error("invalid pool: {0}")]
    Pool(#[from] PoolError),
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawPlayer {
    #[serde(alias = "element")]
    id: u32,
    #[serde(default, alias = "web_name")]
    name: String,
    #[serde(alias = "element_type")]
    position: String,
    #[serde(alias = "team")]
    club: String,
    #[serde(alias = "now_cost")]
    cost: i64,
    #[serde(alias = "xPts", alias = "ict_index")]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(alias = "element")]
    id: u32,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawDifficulty {
    #[serde(alias = "team")]
    club: String,
    difficulty: i64,
}

impl RawPlayer {
    fn into_player(self, row: usize) -> Result<Player, IngestError> {
        let position = Position::from_str_pos(&self.position).ok_or_else(|| IngestError::Row {
            row,
            message: format!("unknown position '{}'", self.position.trim()),
        })?;
        let cost = u32::try_from(self.cost)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| IngestError::Row {
                row,
                message: format!("cost must be positive, got {}", self.cost),
            })?;
        if !self.score.is_finite() {
            return Err(IngestError::Row {
                row,
                message: format!("non-finite score for player {}", self.id),
            });
        }
        let club = self.club.trim();
        if club.is_empty() {
            return Err(IngestError::Row {
                row,
                message: format!("missing club for player {}", self.id),
            });
        }
        Ok(Player::new(
            self.id,
            self.name.trim(),
            position,
            club,
            cost,
            self.score,
        ))
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

/// Parse a player pool. Rows are numbered from 1, excluding the header.
pub fn load_pool_from_reader<R: Read>(rdr: R) -> Result<Pool, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut players = Vec::new();
    for (i, result) in reader.deserialize::<RawPlayer>().enumerate() {
        let row = i + 1;
        let raw = result.map_err(|e| IngestError::Row {
            row,
            message: e.to_string(),
        })?;
        players.push(raw.into_player(row)?);
    }
    debug!("parsed {} pool rows", players.len());
    Ok(Pool::new(players)?)
}

/// Parse an `id,value` feature table for the linear xPts model.
pub fn load_features_from_reader<R: Read>(rdr: R) -> Result<HashMap<u32, f64>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut features = HashMap::new();
    for (i, result) in reader.deserialize::<RawFeature>().enumerate() {
        let row = i + 1;
        let raw = result.map_err(|e| IngestError::Row {
            row,
            message: e.to_string(),
        })?;
        if !raw.value.is_finite() {
            return Err(IngestError::Row {
                row,
                message: format!("non-finite value for player {}", raw.id),
            });
        }
        // Later rows win.
        features.insert(raw.id, raw.value);
    }
    Ok(features)
}

/// Parse a `club,difficulty` table. Ratings run from 1 to `max_difficulty`.
pub fn load_difficulty_from_reader<R: Read>(
    rdr: R,
    max_difficulty: u8,
) -> Result<HashMap<String, u8>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut difficulty = HashMap::new();
    for (i, result) in reader.deserialize::<RawDifficulty>().enumerate() {
        let row = i + 1;
        let raw = result.map_err(|e| IngestError::Row {
            row,
            message: e.to_string(),
        })?;
        let rating = u8::try_from(raw.difficulty)
            .ok()
            .filter(|d| (1..=max_difficulty).contains(d))
            .ok_or_else(|| IngestError::Row {
                row,
                message: format!(
                    "difficulty for {} must be 1..={max_difficulty}, got {}",
                    raw.club, raw.difficulty
                ),
            })?;
        if raw.club.is_empty() {
            return Err(IngestError::Row {
                row,
                message: "missing club".to_string(),
            });
        }
        difficulty.insert(raw.club, rating);
    }
    Ok(difficulty)
}

// ---------------------------------------------------------------------------
// Path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, IngestError> {
    std::fs::File::open(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn load_pool(path: &Path) -> Result<Pool, IngestError> {
    let pool = load_pool_from_reader(open(path)?)?;
    info!("Loaded {} players from {}", pool.len(), path.display());
    Ok(pool)
}

pub fn load_features(path: &Path) -> Result<HashMap<u32, f64>, IngestError> {
    let features = load_features_from_reader(open(path)?)?;
    info!("Loaded {} feature values from {}", features.len(), path.display());
    Ok(features)
}

pub fn load_difficulty(path: &Path, max_difficulty: u8) -> Result<HashMap<String, u8>, IngestError> {
    let difficulty = load_difficulty_from_reader(open(path)?, max_difficulty)?;
    info!("Loaded difficulty for {} clubs from {}", difficulty.len(), path.display());
    Ok(difficulty)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
