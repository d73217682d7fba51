// 📝 Reporter - Flat CSV rows and JSON run reports
//
// One row per pair: the two paths, every metric, then the rule label.
// Candidate exports (no rules applied) leave the label columns empty.

use crate::error::Result;
use crate::filter::MatchResult;
use crate::reconciliation::RunReport;
use crate::rules::Action;
use crate::similarity::CandidatePair;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub path_x: String,
    pub path_y: String,
    pub num_users_df1: usize,
    pub num_users_df2: usize,
    pub intersection_size: usize,
    pub jaccard_index: f64,
    pub cosine_similarity: f64,
    pub sorensen_dice: f64,
    pub overlap_coefficient: f64,
    pub membership_ratio: f64,
    pub movement_rate: f64,
    pub group_movement_rate: f64,
    pub rank_df1: usize,
    pub rank_df2: usize,
    pub rank_distance: usize,
    pub rank_difference: i64,
    pub same_org_name: bool,
    pub matched_rule_id: Option<String>,
    pub action: Option<Action>,
}

impl ReportRow {
    pub fn from_pair(pair: &CandidatePair) -> Self {
        let m = &pair.metrics;
        ReportRow {
            path_x: pair.path_x.clone(),
            path_y: pair.path_y.clone(),
            num_users_df1: m.num_users_df1,
            num_users_df2: m.num_users_df2,
            intersection_size: m.intersection_size,
            jaccard_index: m.jaccard_index,
            cosine_similarity: m.cosine_similarity,
            sorensen_dice: m.sorensen_dice,
            overlap_coefficient: m.overlap_coefficient,
            membership_ratio: m.membership_ratio,
            movement_rate: m.movement_rate,
            group_movement_rate: m.group_movement_rate,
            rank_df1: m.rank_df1,
            rank_df2: m.rank_df2,
            rank_distance: m.rank_distance,
            rank_difference: m.rank_difference,
            same_org_name: m.same_org_name,
            matched_rule_id: None,
            action: None,
        }
    }

    pub fn from_result(result: &MatchResult) -> Self {
        ReportRow {
            matched_rule_id: result.matched_rule_id.clone(),
            action: Some(result.action),
            ..ReportRow::from_pair(&result.pair)
        }
    }
}

fn write_rows<W: Write>(writer: W, rows: impl Iterator<Item = ReportRow>) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut count = 0;
    for row in rows {
        wtr.serialize(row)?;
        count += 1;
    }
    wtr.flush()?;
    Ok(count)
}

/// Labeled results as CSV, in result order
pub fn write_csv<W: Write>(writer: W, results: &[MatchResult]) -> Result<usize> {
    write_rows(writer, results.iter().map(ReportRow::from_result))
}

/// Unlabeled candidate table as CSV
pub fn write_candidates_csv<W: Write>(writer: W, pairs: &[CandidatePair]) -> Result<usize> {
    write_rows(writer, pairs.iter().map(ReportRow::from_pair))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

pub fn write_csv_file(path: &Path, results: &[MatchResult]) -> Result<usize> {
    let count = write_csv(create(path)?, results)?;
    info!(path = %path.display(), rows = count, "wrote match results");
    Ok(count)
}

pub fn write_candidates_csv_file(path: &Path, pairs: &[CandidatePair]) -> Result<usize> {
    let count = write_candidates_csv(create(path)?, pairs)?;
    info!(path = %path.display(), rows = count, "wrote candidate pairs");
    Ok(count)
}

/// Whole run report (metadata, summary, results) as pretty JSON
pub fn write_json_file(path: &Path, report: &RunReport) -> Result<()> {
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    info!(path = %path.display(), run_id = %report.run_id, "wrote run report");
    Ok(())
}

pub fn read_json_file(path: &Path) -> Result<RunReport> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
