// 🏢 Org Tree - Organization table → full paths
// Walks parent links up to the root and lays names out by rank.
// Ranks skipped between the root and the deepest recorded rank get OTHER_LABEL.

use crate::error::{OrgMatchError, Result};
use crate::hierarchy::{MembershipRecord, GROUP_SEPARATOR, PATH_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Sentinel segment for a hierarchy level with no recorded unit
pub const OTHER_LABEL: &str = "Other";

/// Deepest rank an organization table may declare
pub const MAX_RANK: usize = 64;

// ============================================================================
// ORGANIZATION RECORD
// ============================================================================

/// One row of an organization table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub org_code: String,

    #[serde(default)]
    pub parent_code: Option<String>,

    pub name: String,

    /// Explicit depth (1 = root). Inferred from the parent chain when absent.
    #[serde(default)]
    pub rank: Option<usize>,
}

impl OrgRecord {
    pub fn new(
        org_code: impl Into<String>,
        parent_code: Option<&str>,
        name: impl Into<String>,
        rank: Option<usize>,
    ) -> Self {
        OrgRecord {
            org_code: org_code.into(),
            parent_code: parent_code.map(str::to_string),
            name: name.into(),
            rank,
        }
    }
}

/// A unit with its resolved full path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOrg {
    pub org_code: String,
    pub path: String,
    pub rank: usize,
}

pub fn load_org_table(csv_path: &Path) -> Result<Vec<OrgRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: OrgRecord = result?;
        records.push(record);
    }

    debug!(path = %csv_path.display(), rows = records.len(), "loaded organization table");
    Ok(records)
}

// ============================================================================
// ORG TREE
// ============================================================================

#[derive(Debug)]
pub struct OrgTree {
    nodes: BTreeMap<String, OrgRecord>,
}

impl OrgTree {
    /// Index rows by code. Codes and names must be non-empty and unique.
    pub fn from_records(records: Vec<OrgRecord>) -> Result<Self> {
        let mut nodes = BTreeMap::new();

        for mut record in records {
            record.org_code = record.org_code.trim().to_string();
            record.name = record.name.trim().to_string();
            record.parent_code = record
                .parent_code
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty());

            if record.org_code.is_empty() {
                return Err(OrgMatchError::data("organization row with empty org_code"));
            }
            if record.name.is_empty() {
                return Err(OrgMatchError::data(format!(
                    "organization {} has an empty name",
                    record.org_code
                )));
            }
            if record.name.contains(PATH_SEPARATOR) {
                return Err(OrgMatchError::data(format!(
                    "organization {} name contains '{}': {}",
                    record.org_code, PATH_SEPARATOR, record.name
                )));
            }
            if record.rank == Some(0) {
                return Err(OrgMatchError::data(format!(
                    "organization {} has rank 0 (root is rank 1)",
                    record.org_code
                )));
            }
            if let Some(rank) = record.rank.filter(|r| *r > MAX_RANK) {
                return Err(OrgMatchError::data(format!(
                    "organization {} has rank {} (deepest allowed is {})",
                    record.org_code, rank, MAX_RANK
                )));
            }

            let code = record.org_code.clone();
            if nodes.insert(code.clone(), record).is_some() {
                return Err(OrgMatchError::data(format!("duplicate org_code: {}", code)));
            }
        }

        Ok(OrgTree { nodes })
    }

    pub fn from_csv(csv_path: &Path) -> Result<Self> {
        OrgTree::from_records(load_org_table(csv_path)?)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve one unit to its full path
    pub fn resolve(&self, org_code: &str) -> Result<ResolvedOrg> {
        if !self.nodes.contains_key(org_code) {
            return Err(OrgMatchError::data(format!("unknown org_code: {}", org_code)));
        }

        // Leaf first
        let mut chain: Vec<&OrgRecord> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(org_code);

        while let Some(code) = current {
            if !visited.insert(code) {
                return Err(OrgMatchError::data(format!(
                    "cycle in parent links at org_code {} (starting from {})",
                    code, org_code
                )));
            }
            match self.nodes.get(code) {
                Some(node) => {
                    chain.push(node);
                    current = node.parent_code.as_deref();
                }
                None => {
                    warn!(org_code, missing_parent = code, "parent not in table; chain stops here");
                    current = None;
                }
            }
        }
        chain.reverse();

        let mut slots: BTreeMap<usize, &str> = BTreeMap::new();
        let mut previous = 0;
        for node in &chain {
            let rank = node.rank.unwrap_or(previous + 1);
            if rank > MAX_RANK {
                return Err(OrgMatchError::data(format!(
                    "organization {} is nested deeper than rank {}",
                    node.org_code, MAX_RANK
                )));
            }
            if rank <= previous {
                return Err(OrgMatchError::data(format!(
                    "organization {} has rank {} but its ancestor is already at rank {}",
                    node.org_code, rank, previous
                )));
            }
            slots.insert(rank, node.name.as_str());
            previous = rank;
        }

        let segments: Vec<&str> = (1..=previous)
            .map(|r| slots.get(&r).copied().unwrap_or(OTHER_LABEL))
            .collect();

        Ok(ResolvedOrg {
            org_code: org_code.to_string(),
            path: segments.join("/"),
            rank: previous,
        })
    }

    /// Resolve every unit, ordered by code
    pub fn resolve_all(&self) -> Result<Vec<ResolvedOrg>> {
        self.nodes.keys().map(|code| self.resolve(code)).collect()
    }

    /// Rewrite a user table whose groups are org codes into path groups
    pub fn translate_memberships(
        &self,
        records: &[MembershipRecord],
    ) -> Result<Vec<MembershipRecord>> {
        let paths: BTreeMap<String, String> = self
            .resolve_all()?
            .into_iter()
            .map(|r| (r.org_code, r.path))
            .collect();

        records
            .iter()
            .map(|record| {
                let groups = record
                    .group
                    .split(GROUP_SEPARATOR)
                    .map(|code| {
                        let code = code.trim();
                        paths.get(code).cloned().ok_or_else(|| {
                            OrgMatchError::data(format!(
                                "user {}: unknown org_code {:?}",
                                record.user_code, code
                            ))
                        })
                    })
                    .collect::<Result<Vec<String>>>()?;

                Ok(MembershipRecord::new(
                    record.user_code.clone(),
                    groups.join(&GROUP_SEPARATOR.to_string()),
                ))
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(rows: Vec<OrgRecord>) -> OrgTree {
        OrgTree::from_records(rows).unwrap()
    }

    #[test]
    fn test_resolve_walks_to_root() {
        let t = tree(vec![
            OrgRecord::new("C001", None, "Company", Some(1)),
            OrgRecord::new("E010", Some("C001"), "Engineering", Some(2)),
            OrgRecord::new("H100", Some("E010"), "Hardware", Some(3)),
        ]);

        let resolved = t.resolve("H100").unwrap();
        assert_eq!(resolved.path, "Company/Engineering/Hardware");
        assert_eq!(resolved.rank, 3);
    }

    #[test]
    fn test_ranks_inferred_without_explicit_rank() {
        let t = tree(vec![
            OrgRecord::new("1", None, "Company", None),
            OrgRecord::new("2", Some("1"), "Sales", None),
        ]);

        let resolved = t.resolve("2").unwrap();
        assert_eq!(resolved.path, "Company/Sales");
        assert_eq!(resolved.rank, 2);
    }

    #[test]
    fn test_skipped_rank_gets_sentinel() {
        // Rank 1 and rank 3 recorded, no rank-2 ancestor
        let t = tree(vec![
            OrgRecord::new("1", None, "Company", Some(1)),
            OrgRecord::new("3", Some("1"), "Lab", Some(3)),
        ]);

        let resolved = t.resolve("3").unwrap();
        assert_eq!(resolved.path, format!("Company/{}/Lab", OTHER_LABEL));
        assert_eq!(resolved.rank, 3);
    }

    #[test]
    fn test_cycle_is_data_error() {
        let t = tree(vec![
            OrgRecord::new("A", Some("B"), "Alpha", None),
            OrgRecord::new("B", Some("A"), "Beta", None),
        ]);

        let err = t.resolve("A").unwrap_err();
        assert!(matches!(err, OrgMatchError::Data(_)));
    }

    #[test]
    fn test_missing_parent_stops_chain() {
        let t = tree(vec![OrgRecord::new("X", Some("GONE"), "Orphan", None)]);
        assert_eq!(t.resolve("X").unwrap().path, "Orphan");
    }

    #[test]
    fn test_invalid_rows_rejected() {
        assert!(OrgTree::from_records(vec![OrgRecord::new("", None, "A", None)]).is_err());
        assert!(OrgTree::from_records(vec![OrgRecord::new("1", None, " ", None)]).is_err());
        assert!(OrgTree::from_records(vec![OrgRecord::new("1", None, "A/B", None)]).is_err());
        assert!(OrgTree::from_records(vec![
            OrgRecord::new("1", None, "A", None),
            OrgRecord::new("1", None, "B", None),
        ])
        .is_err());
    }

    #[test]
    fn test_rank_above_limit_rejected() {
        let err = OrgTree::from_records(vec![OrgRecord::new("1", None, "A", Some(4_000_000_000))])
            .unwrap_err();
        assert!(matches!(err, OrgMatchError::Data(_)));

        let deepest = tree(vec![OrgRecord::new("1", None, "A", Some(MAX_RANK))]);
        assert_eq!(deepest.resolve("1").unwrap().rank, MAX_RANK);

        // inferred ranks are held to the same limit
        let chain: Vec<OrgRecord> = (0..=MAX_RANK)
            .map(|i| {
                let parent = i.checked_sub(1).map(|p| p.to_string());
                OrgRecord::new(i.to_string(), parent.as_deref(), format!("U{}", i), None)
            })
            .collect();
        let t = tree(chain);
        assert!(t.resolve(&(MAX_RANK - 1).to_string()).is_ok());
        let err = t.resolve(&MAX_RANK.to_string()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Data(_)));
    }

    #[test]
    fn test_inconsistent_rank_rejected() {
        let t = tree(vec![
            OrgRecord::new("1", None, "Company", Some(2)),
            OrgRecord::new("2", Some("1"), "Sales", Some(2)),
        ]);
        assert!(t.resolve("2").is_err());
    }

    #[test]
    fn test_translate_memberships() {
        let t = tree(vec![
            OrgRecord::new("1", None, "Company", Some(1)),
            OrgRecord::new("2", Some("1"), "Sales", Some(2)),
            OrgRecord::new("3", Some("1"), "Engineering", Some(2)),
        ]);

        let rows = vec![MembershipRecord::new("u1", "2, 3")];
        let translated = t.translate_memberships(&rows).unwrap();
        assert_eq!(translated[0].group, "Company/Sales,Company/Engineering");

        let bad = vec![MembershipRecord::new("u2", "9")];
        assert!(t.translate_memberships(&bad).is_err());
    }

    #[test]
    fn test_load_org_table_with_blank_optionals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orgs.csv");
        std::fs::write(
            &path,
            "org_code,parent_code,name,rank\nC,,Company,1\nS,C,Sales,\n",
        )
        .unwrap();

        let t = OrgTree::from_csv(&path).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.resolve("S").unwrap().path, "Company/Sales");
    }
}
