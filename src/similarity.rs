// 📊 Similarity Analyzer - Membership overlap metrics between two snapshots
//
// For a pair (path_x in snapshot 1, path_y in snapshot 2) with member sets
// U1 and U2, every ratio below is 0 when its denominator is 0:
//
//   jaccard_index        = |U1∩U2| / |U1∪U2|
//   cosine_similarity    = |U1∩U2| / sqrt(|U1|·|U2|)
//   sorensen_dice        = 2·|U1∩U2| / (|U1|+|U2|)
//   overlap_coefficient  = |U1∩U2| / min(|U1|,|U2|)
//   membership_ratio     = |U1∩U2| / ((|U1|+|U2|)/2)
//   movement_rate        = |U1∩U2| / |U1|
//   group_movement_rate  = |U1∩U2| / |U2|

use crate::error::{OrgMatchError, Result};
use crate::hierarchy::{leaf_name, rank_of, Hierarchy};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, info_span};

// ============================================================================
// METRIC VOCABULARY
// ============================================================================

/// Names a rule condition may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    NumUsersDf1,
    NumUsersDf2,
    IntersectionSize,
    JaccardIndex,
    CosineSimilarity,
    SorensenDice,
    OverlapCoefficient,
    MembershipRatio,
    MovementRate,
    GroupMovementRate,
    RankDf1,
    RankDf2,
    RankDistance,
    RankDifference,
    SameOrgName,
}

impl MetricField {
    pub const ALL: [MetricField; 15] = [
        MetricField::NumUsersDf1,
        MetricField::NumUsersDf2,
        MetricField::IntersectionSize,
        MetricField::JaccardIndex,
        MetricField::CosineSimilarity,
        MetricField::SorensenDice,
        MetricField::OverlapCoefficient,
        MetricField::MembershipRatio,
        MetricField::MovementRate,
        MetricField::GroupMovementRate,
        MetricField::RankDf1,
        MetricField::RankDf2,
        MetricField::RankDistance,
        MetricField::RankDifference,
        MetricField::SameOrgName,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricField::NumUsersDf1 => "num_users_df1",
            MetricField::NumUsersDf2 => "num_users_df2",
            MetricField::IntersectionSize => "intersection_size",
            MetricField::JaccardIndex => "jaccard_index",
            MetricField::CosineSimilarity => "cosine_similarity",
            MetricField::SorensenDice => "sorensen_dice",
            MetricField::OverlapCoefficient => "overlap_coefficient",
            MetricField::MembershipRatio => "membership_ratio",
            MetricField::MovementRate => "movement_rate",
            MetricField::GroupMovementRate => "group_movement_rate",
            MetricField::RankDf1 => "rank_df1",
            MetricField::RankDf2 => "rank_df2",
            MetricField::RankDistance => "rank_distance",
            MetricField::RankDifference => "rank_difference",
            MetricField::SameOrgName => "same_org_name",
        }
    }

    /// Boolean-valued field
    pub fn is_flag(&self) -> bool {
        matches!(self, MetricField::SameOrgName)
    }

    /// Ratio bounded to [0, 1]
    pub fn is_ratio(&self) -> bool {
        matches!(
            self,
            MetricField::JaccardIndex
                | MetricField::CosineSimilarity
                | MetricField::SorensenDice
                | MetricField::OverlapCoefficient
                | MetricField::MembershipRatio
                | MetricField::MovementRate
                | MetricField::GroupMovementRate
        )
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricField {
    type Err = OrgMatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        MetricField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| {
                OrgMatchError::config(format!(
                    "unknown metric field '{}' (known: {})",
                    wanted,
                    MetricField::ALL
                        .iter()
                        .map(|f| f.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
}

// ============================================================================
// METRIC VECTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
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
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

impl Metrics {
    /// Metrics from the two member sets and the two paths
    pub fn compute(
        users_x: &BTreeSet<String>,
        users_y: &BTreeSet<String>,
        path_x: &str,
        rank_x: usize,
        path_y: &str,
        rank_y: usize,
    ) -> Self {
        let (small, large) = if users_x.len() <= users_y.len() {
            (users_x, users_y)
        } else {
            (users_y, users_x)
        };
        let intersection = small.iter().filter(|u| large.contains(*u)).count();

        Metrics::from_counts(
            users_x.len(),
            users_y.len(),
            intersection,
            rank_x,
            rank_y,
            leaf_name(path_x) == leaf_name(path_y),
        )
    }

    pub fn from_counts(
        n1: usize,
        n2: usize,
        intersection: usize,
        rank_x: usize,
        rank_y: usize,
        same_org_name: bool,
    ) -> Self {
        let (a, b, i) = (n1 as f64, n2 as f64, intersection as f64);
        let union = a + b - i;
        let cosine = if n1 == 0 || n2 == 0 { 0.0 } else { i / (a * b).sqrt() };

        Metrics {
            num_users_df1: n1,
            num_users_df2: n2,
            intersection_size: intersection,
            jaccard_index: ratio(i, union),
            cosine_similarity: cosine,
            sorensen_dice: ratio(2.0 * i, a + b),
            overlap_coefficient: ratio(i, a.min(b)),
            membership_ratio: ratio(i, (a + b) / 2.0),
            movement_rate: ratio(i, a),
            group_movement_rate: ratio(i, b),
            rank_df1: rank_x,
            rank_df2: rank_y,
            rank_distance: rank_x.abs_diff(rank_y),
            rank_difference: rank_x as i64 - rank_y as i64,
            same_org_name,
        }
    }

    pub fn get(&self, field: MetricField) -> MetricValue {
        use MetricValue::{Flag, Number};
        match field {
            MetricField::NumUsersDf1 => Number(self.num_users_df1 as f64),
            MetricField::NumUsersDf2 => Number(self.num_users_df2 as f64),
            MetricField::IntersectionSize => Number(self.intersection_size as f64),
            MetricField::JaccardIndex => Number(self.jaccard_index),
            MetricField::CosineSimilarity => Number(self.cosine_similarity),
            MetricField::SorensenDice => Number(self.sorensen_dice),
            MetricField::OverlapCoefficient => Number(self.overlap_coefficient),
            MetricField::MembershipRatio => Number(self.membership_ratio),
            MetricField::MovementRate => Number(self.movement_rate),
            MetricField::GroupMovementRate => Number(self.group_movement_rate),
            MetricField::RankDf1 => Number(self.rank_df1 as f64),
            MetricField::RankDf2 => Number(self.rank_df2 as f64),
            MetricField::RankDistance => Number(self.rank_distance as f64),
            MetricField::RankDifference => Number(self.rank_difference as f64),
            MetricField::SameOrgName => Flag(self.same_org_name),
        }
    }

    /// Numeric view of a field (flags read as 0/1)
    pub fn number(&self, field: MetricField) -> f64 {
        match self.get(field) {
            MetricValue::Number(n) => n,
            MetricValue::Flag(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn check_finite(&self) -> Result<()> {
        for field in MetricField::ALL.iter().filter(|f| f.is_ratio()) {
            let value = self.number(*field);
            if !value.is_finite() {
                return Err(OrgMatchError::Computation(format!(
                    "{} is not finite ({})",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// CANDIDATE PAIR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub path_x: String,
    pub path_y: String,
    pub metrics: Metrics,
}

// ============================================================================
// PAIRING STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Every path at rank r in snapshot 1 against every path at rank r in snapshot 2
    #[default]
    SameRank,

    /// Any two paths (any ranks) sharing at least one user
    SharedMembers,
}

impl Pairing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pairing::SameRank => "same_rank",
            Pairing::SharedMembers => "shared_members",
        }
    }
}

impl FromStr for Pairing {
    type Err = OrgMatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "same_rank" => Ok(Pairing::SameRank),
            "shared_members" => Ok(Pairing::SharedMembers),
            other => Err(OrgMatchError::config(format!("unknown pairing strategy: {}", other))),
        }
    }
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct SimilarityAnalyzer<'a> {
    before: &'a Hierarchy,
    after: &'a Hierarchy,
    pairing: Pairing,
}

impl<'a> SimilarityAnalyzer<'a> {
    /// `before` is snapshot 1 (df1), `after` is snapshot 2 (df2)
    pub fn new(before: &'a Hierarchy, after: &'a Hierarchy) -> Self {
        SimilarityAnalyzer {
            before,
            after,
            pairing: Pairing::default(),
        }
    }

    pub fn with_pairing(mut self, pairing: Pairing) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn pairing(&self) -> Pairing {
        self.pairing
    }

    /// Paths to compare, before any metric is computed
    pub fn candidate_keys(&self) -> Vec<(&'a str, &'a str)> {
        match self.pairing {
            Pairing::SameRank => self.same_rank_keys(),
            Pairing::SharedMembers => self.shared_member_keys(),
        }
    }

    fn same_rank_keys(&self) -> Vec<(&'a str, &'a str)> {
        let before = self.before;
        let after = self.after;
        let deepest = before.max_rank().min(after.max_rank());

        (1..=deepest)
            .flat_map(move |rank| {
                let right = after.all_paths_at_rank(rank);
                before
                    .all_paths_at_rank(rank)
                    .iter()
                    .flat_map(move |x| right.iter().map(move |y| (x.as_str(), y.as_str())))
            })
            .collect()
    }

    fn shared_member_keys(&self) -> Vec<(&'a str, &'a str)> {
        let before = self.before;
        let after = self.after;
        let mut keys = Vec::new();

        for unit in before.units() {
            let mut partners: BTreeSet<&'a str> = BTreeSet::new();
            for user in before.users_at(&unit.path) {
                if let Some(paths) = after.paths_of(user) {
                    partners.extend(paths.iter().map(String::as_str));
                }
            }
            keys.extend(partners.into_iter().map(|y| (unit.path.as_str(), y)));
        }

        keys
    }

    /// Metrics for one pair of arbitrary paths. Unknown paths have no members.
    pub fn compare(&self, path_x: &str, path_y: &str) -> Result<CandidatePair> {
        let rank_x = self.before.unit(path_x).map(|u| u.rank).unwrap_or_else(|| rank_of(path_x));
        let rank_y = self.after.unit(path_y).map(|u| u.rank).unwrap_or_else(|| rank_of(path_y));

        let metrics = Metrics::compute(
            self.before.users_at(path_x),
            self.after.users_at(path_y),
            path_x,
            rank_x,
            path_y,
            rank_y,
        );
        metrics.check_finite()?;

        Ok(CandidatePair {
            path_x: path_x.to_string(),
            path_y: path_y.to_string(),
            metrics,
        })
    }

    /// Full candidate table, sorted by
    /// (rank_df1, rank_distance, jaccard_index, path_x, path_y)
    pub fn compute_similarities(&self) -> Result<Vec<CandidatePair>> {
        let span = info_span!("similarity", pairing = self.pairing.as_str());
        let _guard = span.enter();

        let keys = self.candidate_keys();
        debug!(pairs = keys.len(), "enumerated candidate pairs");

        let mut pairs: Vec<CandidatePair> = keys
            .par_iter()
            .map(|(x, y)| self.compare(x, y))
            .collect::<Result<Vec<_>>>()?;

        pairs.sort_by(|a, b| {
            a.metrics
                .rank_df1
                .cmp(&b.metrics.rank_df1)
                .then(a.metrics.rank_distance.cmp(&b.metrics.rank_distance))
                .then(a.metrics.jaccard_index.total_cmp(&b.metrics.jaccard_index))
                .then_with(|| a.path_x.cmp(&b.path_x))
                .then_with(|| a.path_y.cmp(&b.path_y))
        });

        info!(pairs = pairs.len(), "similarity metrics computed");
        Ok(pairs)
    }
}

// ============================================================================
// TESTS
// ============================================================================
