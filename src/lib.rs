// Org Match - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod org_tree;       // Parent-linked org tables → full paths
pub mod hierarchy;      // Snapshot → paths, ranks, membership index
pub mod similarity;     // Pairwise overlap metrics
pub mod rules;          // Rules as data
pub mod filter;         // First-match-wins labeling
pub mod config;
pub mod reconciliation; // One run over two snapshots
pub mod report;

#[cfg(feature = "sqlite")]
pub mod db;

// Re-export commonly used types
pub use error::{OrgMatchError, Result};
pub use org_tree::{OrgRecord, OrgTree, ResolvedOrg, OTHER_LABEL};
pub use hierarchy::{
    Hierarchy, HierarchyBuilder, MembershipRecord, OrgUnit, Membership,
    load_membership_table, normalize_path,
};
pub use similarity::{
    CandidatePair, MetricField, MetricValue, Metrics, Pairing, SimilarityAnalyzer,
};
pub use rules::{
    Action, Condition, ConditionDefinition, Operator, Rule, RuleDefinition, RuleSet,
};
pub use filter::{FilterOptions, FilterOutcome, FilterSummary, MatchResult, OrganizationFilter};
pub use config::RunConfig;
pub use reconciliation::{MatchEngine, RunReport, SnapshotStats};
pub use report::{ReportRow, write_csv, write_csv_file, write_json_file};

#[cfg(feature = "sqlite")]
pub use db::{setup_database, insert_run, get_runs, get_results_for_run, count_results, RunRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
