// SQLite persistence for per-gameweek squad snapshots and transfers.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gaffer_core::{Player, Transfer};
use rusqlite::{params, Connection, OptionalExtension};

/// A squad as it was saved after a gameweek's run.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadSnapshot {
    pub gameweek: u32,
    pub players: Vec<Player>,
    pub total_cost: u32,
    /// How the squad was produced, e.g. "exact", "greedy" or "transfers".
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

/// One stored transfer, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub gameweek: u32,
    pub seq: u32,
    pub out_id: u32,
    pub in_id: u32,
    pub score_delta: f64,
}

pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) the store at `path`. `":memory:"` gives an ephemeral
    /// store for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS squads (
                gameweek   INTEGER PRIMARY KEY,
                players    TEXT NOT NULL,
                total_cost INTEGER NOT NULL,
                strategy   TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transfers (
                gameweek    INTEGER NOT NULL REFERENCES squads(gameweek) ON DELETE CASCADE,
                seq         INTEGER NOT NULL,
                out_id      INTEGER NOT NULL,
                in_id       INTEGER NOT NULL,
                score_delta REAL NOT NULL,
                PRIMARY KEY (gameweek, seq)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Squads
    // ------------------------------------------------------------------

    /// Save the squad for `gameweek`, replacing any earlier run of the same
    /// gameweek along with its transfers.
    pub fn save_squad(&self, gameweek: u32, players: &[Player], strategy: &str) -> Result<()> {
        self.save_gameweek(gameweek, players, strategy, &[])
    }

    /// Save a gameweek's squad and the transfers that produced it in one
    /// transaction. Replaces any earlier run of the same gameweek; on error
    /// nothing is written.
    pub fn save_gameweek(
        &self,
        gameweek: u32,
        players: &[Player],
        strategy: &str,
        transfers: &[Transfer],
    ) -> Result<()> {
        let json = serde_json::to_string(players).context("failed to serialize squad")?;
        let total_cost: u32 = players.iter().map(|p| p.cost).sum();
        let created_at = Utc::now().to_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM transfers WHERE gameweek = ?1", params![gameweek])
            .context("failed to clear old transfers")?;
        tx.execute(
            "INSERT OR REPLACE INTO squads (gameweek, players, total_cost, strategy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![gameweek, json, total_cost, strategy, created_at],
        )
        .with_context(|| format!("failed to save squad for gameweek {gameweek}"))?;
        insert_transfers(&tx, gameweek, transfers)?;
        tx.commit()
            .with_context(|| format!("failed to commit gameweek {gameweek}"))?;
        Ok(())
    }

    pub fn load_squad(&self, gameweek: u32) -> Result<Option<SquadSnapshot>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT gameweek, players, total_cost, strategy, created_at
                 FROM squads WHERE gameweek = ?1",
                params![gameweek],
                raw_snapshot,
            )
            .optional()
            .with_context(|| format!("failed to load squad for gameweek {gameweek}"))?;
        row.map(RawSnapshot::decode).transpose()
    }

    /// The most recent squad saved for a gameweek before `gameweek`.
    pub fn latest_before(&self, gameweek: u32) -> Result<Option<SquadSnapshot>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT gameweek, players, total_cost, strategy, created_at
                 FROM squads WHERE gameweek < ?1
                 ORDER BY gameweek DESC LIMIT 1",
                params![gameweek],
                raw_snapshot,
            )
            .optional()
            .context("failed to query previous squad")?;
        row.map(RawSnapshot::decode).transpose()
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Record `transfers` for `gameweek`. The squad must already be saved.
    pub fn record_transfers(&self, gameweek: u32, transfers: &[Transfer]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        insert_transfers(&tx, gameweek, transfers)?;
        tx.commit().context("failed to commit transfers")?;
        Ok(())
    }

    pub fn load_transfers(&self, gameweek: u32) -> Result<Vec<TransferRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT gameweek, seq, out_id, in_id, score_delta
                 FROM transfers WHERE gameweek = ?1 ORDER BY seq",
            )
            .context("failed to prepare load_transfers query")?;
        let rows = stmt
            .query_map(params![gameweek], |row| {
                Ok(TransferRecord {
                    gameweek: row.get(0)?,
                    seq: row.get(1)?,
                    out_id: row.get(2)?,
                    in_id: row.get(3)?,
                    score_delta: row.get(4)?,
                })
            })
            .context("failed to query transfers")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read transfer row")?;
        Ok(rows)
    }

    /// Delete every snapshot and transfer.
    pub fn clear(&self) -> Result<()> {
        self.conn()
            .execute_batch("DELETE FROM transfers; DELETE FROM squads;")
            .context("failed to clear store")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row encoding and decoding
// ---------------------------------------------------------------------------

fn insert_transfers(conn: &Connection, gameweek: u32, transfers: &[Transfer]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT OR REPLACE INTO transfers (gameweek, seq, out_id, in_id, score_delta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .context("failed to prepare transfer insert")?;
    for (seq, t) in transfers.iter().enumerate() {
        stmt.execute(params![
            gameweek,
            seq as u32,
            t.player_out.id,
            t.player_in.id,
            t.score_delta
        ])
        .with_context(|| format!("failed to record transfer {seq} for gameweek {gameweek}"))?;
    }
    Ok(())
}

struct RawSnapshot {
    gameweek: u32,
    players: String,
    total_cost: u32,
    strategy: String,
    created_at: String,
}

fn raw_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        gameweek: row.get(0)?,
        players: row.get(1)?,
        total_cost: row.get(2)?,
        strategy: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl RawSnapshot {
    fn decode(self) -> Result<SquadSnapshot> {
        let players: Vec<Player> = serde_json::from_str(&self.players)
            .with_context(|| format!("corrupt squad JSON for gameweek {}", self.gameweek))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .with_context(|| format!("bad created_at for gameweek {}", self.gameweek))?
            .with_timezone(&Utc);
        Ok(SquadSnapshot {
            gameweek: self.gameweek,
            players,
            total_cost: self.total_cost,
            strategy: self.strategy,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
