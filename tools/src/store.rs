//! SQLite persistence for run results.
//!
//! RULE: Only store.rs talks to the database. The kernel never persists
//! anything; the runner hands finished tables to this store.

use anyhow::Result;
use chrono::{DateTime, Utc};
use cohort_core::output::{OccupancyRow, OutcomeRow};
use rusqlite::{params, Connection};
use uuid::Uuid;

pub struct RunStore {
    conn: Connection,
}

/// Metadata recorded for each run.
pub struct RunRecord<'a> {
    pub run_id:     Uuid,
    pub seed:       u64,
    pub n_samples:  usize,
    pub n_cycles:   usize,
    pub model_path: &'a str,
    pub started_at: DateTime<Utc>,
}

impl RunStore {
    /// Open (or create) the results database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("../migrations/001_results.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run: &RunRecord<'_>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, n_samples, n_cycles, model_path, version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id.to_string(),
                run.seed as i64,
                run.n_samples as i64,
                run.n_cycles as i64,
                run.model_path,
                env!("CARGO_PKG_VERSION"),
                run.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: Uuid, finished_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE run SET finished_at = ?2 WHERE run_id = ?1",
            params![run_id.to_string(), finished_at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ── Result tables ──────────────────────────────────────────

    pub fn insert_occupancy(&mut self, run_id: Uuid, state_names: &[String], rows: &[OccupancyRow]) -> Result<()> {
        let run_id = run_id.to_string();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO state_occupancy (run_id, strategy_id, patient_id, sample, cycle, time, state, prob)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in rows {
                let state = state_names.get(r.state).map(String::as_str).unwrap_or("?");
                stmt.execute(params![
                    run_id,
                    r.strategy_id,
                    r.patient_id,
                    r.sample as i64,
                    r.cycle as i64,
                    r.time,
                    state,
                    r.prob,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_outcomes(&mut self, run_id: Uuid, rows: &[OutcomeRow]) -> Result<()> {
        let run_id = run_id.to_string();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO outcome (run_id, strategy_id, patient_id, group_id, sample, category,
                                      discount_rate, value, patient_weight)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.strategy_id,
                    r.patient_id,
                    r.group_id,
                    r.sample as i64,
                    r.category,
                    r.discount_rate,
                    r.value,
                    r.patient_weight,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn outcome_count(&self, run_id: Uuid) -> Result<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM outcome WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Mean of one outcome category per strategy, for quick checks.
    pub fn mean_outcome(&self, run_id: Uuid, category: &str) -> Result<Vec<(u32, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT strategy_id, SUM(value * patient_weight) / SUM(patient_weight)
             FROM outcome WHERE run_id = ?1 AND category = ?2
             GROUP BY strategy_id ORDER BY strategy_id",
        )?;
        let rows = stmt
            .query_map(params![run_id.to_string(), category], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
