// 🗄️ SQLite run store
//
// runs           one row per RunReport (run_id unique)
// match_results  one row per reported pair, keyed by run_id
//
// Storing the same report twice is a no-op.

use crate::error::Result;
use crate::reconciliation::RunReport;
use crate::report::ReportRow;
use crate::rules::Action;
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub rules_fingerprint: String,
    pub pairing: String,
    pub candidate_count: i64,
    pub result_count: i64,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            rules_fingerprint TEXT NOT NULL,
            pairing TEXT NOT NULL,
            candidate_count INTEGER NOT NULL,
            result_count INTEGER NOT NULL,
            options TEXT NOT NULL,
            summary TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS match_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            position INTEGER NOT NULL,
            path_x TEXT NOT NULL,
            path_y TEXT NOT NULL,
            num_users_df1 INTEGER NOT NULL,
            num_users_df2 INTEGER NOT NULL,
            intersection_size INTEGER NOT NULL,
            jaccard_index REAL NOT NULL,
            cosine_similarity REAL NOT NULL,
            sorensen_dice REAL NOT NULL,
            overlap_coefficient REAL NOT NULL,
            membership_ratio REAL NOT NULL,
            movement_rate REAL NOT NULL,
            group_movement_rate REAL NOT NULL,
            rank_df1 INTEGER NOT NULL,
            rank_df2 INTEGER NOT NULL,
            rank_distance INTEGER NOT NULL,
            rank_difference INTEGER NOT NULL,
            same_org_name INTEGER NOT NULL,
            matched_rule_id TEXT,
            action TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_run ON match_results(run_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_action ON match_results(action)",
        [],
    )?;

    Ok(())
}

/// Store a run and its results in one transaction.
/// Returns the number of result rows written (0 if the run was already stored).
pub fn insert_run(conn: &Connection, report: &RunReport) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO runs (
            run_id, started_at, finished_at, rules_fingerprint, pairing,
            candidate_count, result_count, options, summary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            report.run_id,
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339(),
            report.rules_fingerprint,
            report.pairing.as_str(),
            report.candidate_count as i64,
            report.results.len() as i64,
            serde_json::to_string(&report.filter)?,
            serde_json::to_string(&report.summary)?,
        ],
    )?;

    if inserted == 0 {
        debug!(run_id = %report.run_id, "run already stored");
        return Ok(0);
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO match_results (
                run_id, position, path_x, path_y,
                num_users_df1, num_users_df2, intersection_size,
                jaccard_index, cosine_similarity, sorensen_dice, overlap_coefficient,
                membership_ratio, movement_rate, group_movement_rate,
                rank_df1, rank_df2, rank_distance, rank_difference, same_org_name,
                matched_rule_id, action
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )?;

        for (position, result) in report.results.iter().enumerate() {
            let m = &result.pair.metrics;
            stmt.execute(params![
                report.run_id,
                position as i64,
                result.pair.path_x,
                result.pair.path_y,
                m.num_users_df1 as i64,
                m.num_users_df2 as i64,
                m.intersection_size as i64,
                m.jaccard_index,
                m.cosine_similarity,
                m.sorensen_dice,
                m.overlap_coefficient,
                m.membership_ratio,
                m.movement_rate,
                m.group_movement_rate,
                m.rank_df1 as i64,
                m.rank_df2 as i64,
                m.rank_distance as i64,
                m.rank_difference,
                m.same_org_name,
                result.matched_rule_id,
                result.action.as_str(),
            ])?;
        }
    }

    tx.commit()?;
    info!(run_id = %report.run_id, results = report.results.len(), "stored run");
    Ok(report.results.len())
}

pub fn get_runs(conn: &Connection) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, finished_at, rules_fingerprint, pairing,
                candidate_count, result_count
         FROM runs
         ORDER BY started_at, id",
    )?;

    let runs = stmt
        .query_map([], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                rules_fingerprint: row.get(3)?,
                pairing: row.get(4)?,
                candidate_count: row.get(5)?,
                result_count: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(runs)
}

/// Results of one run, in the order they were reported
pub fn get_results_for_run(conn: &Connection, run_id: &str) -> Result<Vec<ReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT path_x, path_y, num_users_df1, num_users_df2, intersection_size,
                jaccard_index, cosine_similarity, sorensen_dice, overlap_coefficient,
                membership_ratio, movement_rate, group_movement_rate,
                rank_df1, rank_df2, rank_distance, rank_difference, same_org_name,
                matched_rule_id, action
         FROM match_results
         WHERE run_id = ?1
         ORDER BY position",
    )?;

    let rows = stmt
        .query_map([run_id], |row| {
            let action: String = row.get(18)?;
            let action = action
                .parse::<Action>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))?;

            Ok(ReportRow {
                path_x: row.get(0)?,
                path_y: row.get(1)?,
                num_users_df1: row.get::<_, i64>(2)? as usize,
                num_users_df2: row.get::<_, i64>(3)? as usize,
                intersection_size: row.get::<_, i64>(4)? as usize,
                jaccard_index: row.get(5)?,
                cosine_similarity: row.get(6)?,
                sorensen_dice: row.get(7)?,
                overlap_coefficient: row.get(8)?,
                membership_ratio: row.get(9)?,
                movement_rate: row.get(10)?,
                group_movement_rate: row.get(11)?,
                rank_df1: row.get::<_, i64>(12)? as usize,
                rank_df2: row.get::<_, i64>(13)? as usize,
                rank_distance: row.get::<_, i64>(14)? as usize,
                rank_difference: row.get(15)?,
                same_org_name: row.get(16)?,
                matched_rule_id: row.get(17)?,
                action: Some(action),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn count_results(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM match_results WHERE run_id = ?1",
        [run_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOptions, FilterSummary, MatchResult};
    use crate::reconciliation::SnapshotStats;
    use crate::similarity::{CandidatePair, Metrics, Pairing};
    use chrono::Utc;

    fn report() -> RunReport {
        let result = |x: &str, y: &str, rule: Option<&str>, action| MatchResult {
            pair: CandidatePair {
                path_x: x.to_string(),
                path_y: y.to_string(),
                metrics: Metrics::from_counts(5, 4, 4, 3, 3, true),
            },
            matched_rule_id: rule.map(str::to_string),
            action,
        };
        let stats = SnapshotStats {
            units: 3,
            users: 5,
            max_rank: 3,
        };

        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rules_fingerprint: "abc".to_string(),
            pairing: Pairing::SameRank,
            filter: FilterOptions::default(),
            before: stats.clone(),
            after: stats,
            candidate_count: 9,
            summary: FilterSummary::default(),
            results: vec![
                result("C/E/H", "C/E/H", Some("RULE1"), Action::MarkSimilar),
                result("C/E", "C/M", None, Action::NeedsReview),
            ],
        }
    }

    #[test]
    fn test_store_run_twice() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let report = report();

        assert_eq!(insert_run(&conn, &report).unwrap(), 2);
        assert_eq!(insert_run(&conn, &report).unwrap(), 0);
        assert_eq!(count_results(&conn, &report.run_id).unwrap(), 2);

        let runs = get_runs(&conn).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pairing, "same_rank");
        assert_eq!(runs[0].candidate_count, 9);
        assert_eq!(runs[0].result_count, 2);
    }

    #[test]
    fn test_results_read_back_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let report = report();
        insert_run(&conn, &report).unwrap();

        let rows = get_results_for_run(&conn, &report.run_id).unwrap();
        let expected: Vec<ReportRow> = report.results.iter().map(ReportRow::from_result).collect();
        assert_eq!(rows, expected);
        assert!(get_results_for_run(&conn, "missing").unwrap().is_empty());
    }
}
