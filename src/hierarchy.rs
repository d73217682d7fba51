// 🌳 Hierarchy Builder - Materialized org paths + membership index
// One Hierarchy per snapshot. A user belongs to every ancestor of its leaf unit.

use crate::error::{OrgMatchError, Result};
use crate::org_tree::OTHER_LABEL;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, info_span};

pub const PATH_SEPARATOR: char = '/';
pub const GROUP_SEPARATOR: char = ',';

static NO_USERS: BTreeSet<String> = BTreeSet::new();

// ============================================================================
// INPUT ROWS
// ============================================================================

/// One row of a user-membership table.
///
/// `group` may hold several full paths separated by commas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub user_code: String,

    #[serde(alias = "group_full_name")]
    pub group: String,
}

impl MembershipRecord {
    pub fn new(user_code: impl Into<String>, group: impl Into<String>) -> Self {
        MembershipRecord {
            user_code: user_code.into(),
            group: group.into(),
        }
    }
}

/// Load a membership table from CSV (`user_code,group`)
pub fn load_membership_table(csv_path: &Path) -> Result<Vec<MembershipRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: MembershipRecord = result?;
        records.push(record);
    }

    debug!(path = %csv_path.display(), rows = records.len(), "loaded membership table");
    Ok(records)
}

// ============================================================================
// ORG UNIT
// ============================================================================

/// An organizational unit, identified by its full path (root first).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgUnit {
    pub path: String,
    pub rank: usize,
}

impl OrgUnit {
    /// Build a unit from an already normalized path
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let rank = rank_of(&path);
        OrgUnit { path, rank }
    }

    /// The path truncated to its first `rank` segments.
    ///
    /// `None` for rank 0 or for a rank deeper than this unit.
    pub fn path_at_rank(&self, rank: usize) -> Option<&str> {
        if rank == 0 || rank > self.rank {
            return None;
        }
        if rank == self.rank {
            return Some(&self.path);
        }
        self.path
            .match_indices(PATH_SEPARATOR)
            .nth(rank - 1)
            .map(|(idx, _)| &self.path[..idx])
    }

    /// Every ancestor path from the root down to this unit
    pub fn ancestor_paths(&self) -> impl Iterator<Item = &str> + '_ {
        (1..=self.rank).filter_map(move |r| self.path_at_rank(r))
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.path_at_rank(self.rank.saturating_sub(1))
    }

    /// Last path segment
    pub fn leaf_name(&self) -> &str {
        leaf_name(&self.path)
    }
}

/// Number of `/`-delimited segments
pub fn rank_of(path: &str) -> usize {
    path.split(PATH_SEPARATOR).count()
}

pub fn leaf_name(path: &str) -> &str {
    path.rsplit(PATH_SEPARATOR).next().unwrap_or(path).trim()
}

/// Trim segments, drop leading/trailing separators and fill interior gaps.
///
/// `A//C` has no recorded rank-2 ancestor; the gap becomes `A/Other/C` so
/// per-rank columns stay aligned.
pub fn normalize_path(raw: &str) -> Result<String> {
    let segments: Vec<&str> = raw.split(PATH_SEPARATOR).map(str::trim).collect();

    let first = segments.iter().position(|s| !s.is_empty());
    let last = segments.iter().rposition(|s| !s.is_empty());
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => {
            return Err(OrgMatchError::data(format!(
                "organization path is empty: {:?}",
                raw
            )))
        }
    };

    let filled: Vec<&str> = segments[first..=last]
        .iter()
        .map(|s| if s.is_empty() { OTHER_LABEL } else { *s })
        .collect();

    Ok(filled.join("/"))
}

// ============================================================================
// MEMBERSHIP
// ============================================================================

/// One (user, path, rank) fact of the membership relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_code: String,
    pub path: String,
    pub rank: usize,
}

/// A user's leaf assignment after exploding multi-valued groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub user_code: String,
    pub unit: OrgUnit,
}

// ============================================================================
// HIERARCHY (one snapshot)
// ============================================================================

/// Immutable per-snapshot structure
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    assignments: Vec<Assignment>,
    units: BTreeMap<String, OrgUnit>,
    members: BTreeMap<String, BTreeSet<String>>,
    user_paths: BTreeMap<String, BTreeSet<String>>,
    by_rank: BTreeMap<usize, Vec<String>>,
    max_rank: usize,
}

impl Hierarchy {
    /// Users of a path, including all descendant units' users.
    ///
    /// Unknown paths have no members.
    pub fn users_at(&self, path: &str) -> &BTreeSet<String> {
        self.members.get(path).unwrap_or(&NO_USERS)
    }

    /// Distinct paths at a rank, sorted
    pub fn all_paths_at_rank(&self, rank: usize) -> &[String] {
        self.by_rank.get(&rank).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every path (any rank) a user belongs to
    pub fn paths_of(&self, user_code: &str) -> Option<&BTreeSet<String>> {
        self.user_paths.get(user_code)
    }

    pub fn unit(&self, path: &str) -> Option<&OrgUnit> {
        self.units.get(path)
    }

    pub fn units(&self) -> impl Iterator<Item = &OrgUnit> {
        self.units.values()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn user_count(&self) -> usize {
        self.user_paths.len()
    }

    pub fn max_rank(&self) -> usize {
        self.max_rank
    }

    /// Exploded leaf assignments in input order
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// The per-rank column: one entry per assignment, `None` where the
    /// assignment's unit is shallower than `rank`
    pub fn rank_column(&self, rank: usize) -> Vec<Option<&str>> {
        self.assignments
            .iter()
            .map(|a| a.unit.path_at_rank(rank))
            .collect()
    }

    /// The flattened membership relation, ordered by path then user
    pub fn memberships(&self) -> impl Iterator<Item = Membership> + '_ {
        self.members.iter().flat_map(move |(path, users)| {
            let rank = self.units.get(path).map(|u| u.rank).unwrap_or_else(|| rank_of(path));
            users.iter().map(move |user| Membership {
                user_code: user.clone(),
                path: path.clone(),
                rank,
            })
        })
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct HierarchyBuilder {
    records: Vec<MembershipRecord>,
}

impl HierarchyBuilder {
    pub fn new(records: Vec<MembershipRecord>) -> Self {
        HierarchyBuilder { records }
    }

    pub fn from_csv(csv_path: &Path) -> Result<Self> {
        Ok(HierarchyBuilder::new(load_membership_table(csv_path)?))
    }

    /// Explode groups, materialize every rank ancestor and index members
    pub fn process(self) -> Result<Hierarchy> {
        let span = info_span!("hierarchy_build", rows = self.records.len());
        let _guard = span.enter();

        let mut hierarchy = Hierarchy::default();

        for (line, record) in self.records.iter().enumerate() {
            let user_code = record.user_code.trim();
            if user_code.is_empty() {
                return Err(OrgMatchError::data(format!(
                    "row {}: user_code is empty",
                    line + 1
                )));
            }
            if record.group.trim().is_empty() {
                return Err(OrgMatchError::data(format!(
                    "row {} (user {}): organization path is empty",
                    line + 1,
                    user_code
                )));
            }

            for raw_path in record.group.split(GROUP_SEPARATOR) {
                let path = normalize_path(raw_path).map_err(|e| {
                    OrgMatchError::data(format!("row {} (user {}): {}", line + 1, user_code, e))
                })?;
                let unit = OrgUnit::from_path(path);

                for ancestor in unit.ancestor_paths() {
                    hierarchy
                        .members
                        .entry(ancestor.to_string())
                        .or_default()
                        .insert(user_code.to_string());
                    hierarchy
                        .user_paths
                        .entry(user_code.to_string())
                        .or_default()
                        .insert(ancestor.to_string());
                    hierarchy
                        .units
                        .entry(ancestor.to_string())
                        .or_insert_with(|| OrgUnit::from_path(ancestor));
                }

                hierarchy.max_rank = hierarchy.max_rank.max(unit.rank);
                hierarchy.assignments.push(Assignment {
                    user_code: user_code.to_string(),
                    unit,
                });
            }
        }

        for unit in hierarchy.units.values() {
            hierarchy
                .by_rank
                .entry(unit.rank)
                .or_default()
                .push(unit.path.clone());
        }

        info!(
            units = hierarchy.units.len(),
            users = hierarchy.user_paths.len(),
            max_rank = hierarchy.max_rank,
            "hierarchy built"
        );

        Ok(hierarchy)
    }
}

// ============================================================================
// TESTS
// ============================================================================
