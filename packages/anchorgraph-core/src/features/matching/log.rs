//! Append-only match log.
//!
//! One SQLite database per repository. Rows are never updated or deleted;
//! a rerun appends a newer row and consumers take the latest row by
//! timestamp per (high version, low version, high node id) key.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::Result;
use crate::shared::models::NodeId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS node_mapping (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    high_version    TEXT    NOT NULL,
    high_node_id    INTEGER NOT NULL,
    low_version     TEXT    NOT NULL,
    low_node_id     INTEGER NOT NULL,
    candidate_ids   TEXT    NOT NULL,
    match_scores    TEXT    NOT NULL,
    reason          TEXT    NOT NULL,
    timestamp       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_node_mapping_key
    ON node_mapping (high_version, low_version, high_node_id, timestamp);
";

/// Sentinel for "no node relocated".
pub const NO_NODE: i64 = -1;

/// One appended match result.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub high_version: String,
    pub high_node_id: NodeId,
    pub low_version: String,
    /// Relocated node id, [`NO_NODE`] on a miss.
    pub low_node_id: i64,
    pub candidate_ids: Vec<NodeId>,
    pub match_scores: Vec<f64>,
    pub reason: String,
    pub timestamp: i64,
}

impl MatchRecord {
    /// A record ready to append, stamped now.
    pub fn new(
        high_version: impl Into<String>,
        high_node_id: NodeId,
        low_version: impl Into<String>,
    ) -> Self {
        MatchRecord {
            high_version: high_version.into(),
            high_node_id,
            low_version: low_version.into(),
            low_node_id: NO_NODE,
            candidate_ids: Vec::new(),
            match_scores: Vec::new(),
            reason: String::new(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

pub struct MatchLog {
    conn: Connection,
}

impl MatchLog {
    /// Opens (and on first use initializes) the per-repository log.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(MatchLog { conn })
    }

    /// In-memory log, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(MatchLog { conn })
    }

    pub fn append(&self, record: &MatchRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO node_mapping
             (high_version, high_node_id, low_version, low_node_id,
              candidate_ids, match_scores, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.high_version,
                record.high_node_id,
                record.low_version,
                record.low_node_id,
                serde_json::to_string(&record.candidate_ids)?,
                serde_json::to_string(&record.match_scores)?,
                record.reason,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Latest row for (high version, low version, high node id), by
    /// timestamp then insertion order. Two runs that share a low version
    /// but compare different high versions keep separate histories.
    pub fn latest(
        &self,
        high_version: &str,
        low_version: &str,
        high_node_id: NodeId,
    ) -> Result<Option<MatchRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT high_version, high_node_id, low_version, low_node_id,
                        candidate_ids, match_scores, reason, timestamp
                 FROM node_mapping
                 WHERE high_version = ?1 AND low_version = ?2 AND high_node_id = ?3
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1",
                params![high_version, low_version, high_node_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((high_version, high_node_id, low_version, low_node_id, ids, scores, reason, ts)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(MatchRecord {
            high_version,
            high_node_id: high_node_id as NodeId,
            low_version,
            low_node_id,
            candidate_ids: serde_json::from_str(&ids)?,
            match_scores: serde_json::from_str(&scores)?,
            reason,
            timestamp: ts,
        }))
    }
}
