// ⚖️ Reconciliation Engine - One run over two snapshots
//
//   memberships (×2) → Hierarchy (×2) → candidate pairs + metrics → rule labels
//
// Snapshots and rules are borrowed read-only for the whole run.

use crate::config::RunConfig;
use crate::error::Result;
use crate::filter::{FilterOptions, FilterSummary, MatchResult, OrganizationFilter};
use crate::hierarchy::{Hierarchy, HierarchyBuilder, MembershipRecord};
use crate::rules::RuleSet;
use crate::similarity::{CandidatePair, Pairing, SimilarityAnalyzer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub units: usize,
    pub users: usize,
    pub max_rank: usize,
}

impl SnapshotStats {
    pub fn of(hierarchy: &Hierarchy) -> Self {
        SnapshotStats {
            units: hierarchy.unit_count(),
            users: hierarchy.user_count(),
            max_rank: hierarchy.max_rank(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rules_fingerprint: String,
    pub pairing: Pairing,
    pub filter: FilterOptions,
    pub before: SnapshotStats,
    pub after: SnapshotStats,
    pub candidate_count: usize,
    pub summary: FilterSummary,
    pub results: Vec<MatchResult>,
}

impl RunReport {
    pub fn similar_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_similar()).count()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Run {}: {} candidate pairs ({}), {} matched, {} marked similar, {} reported",
            self.run_id,
            self.candidate_count,
            self.pairing.as_str(),
            self.summary.matched,
            self.similar_count(),
            self.results.len()
        )
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct MatchEngine {
    config: RunConfig,
}

impl MatchEngine {
    pub fn new(config: RunConfig) -> Self {
        MatchEngine { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Candidate table without rule labels
    pub fn analyze(&self, before: &Hierarchy, after: &Hierarchy) -> Result<Vec<CandidatePair>> {
        SimilarityAnalyzer::new(before, after)
            .with_pairing(self.config.analysis.pairing)
            .compute_similarities()
    }

    /// Compare two built snapshots and label the pairs
    pub fn run(&self, rules: &RuleSet, before: &Hierarchy, after: &Hierarchy) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        let _guard = span.enter();
        let started_at = Utc::now();

        let candidates = self.analyze(before, after)?;
        let outcome =
            OrganizationFilter::with_options(rules, self.config.filter.clone()).apply(&candidates);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            rules_fingerprint: rules.fingerprint().to_string(),
            pairing: self.config.analysis.pairing,
            filter: self.config.filter.clone(),
            before: SnapshotStats::of(before),
            after: SnapshotStats::of(after),
            candidate_count: candidates.len(),
            summary: outcome.summary,
            results: outcome.results,
        };

        info!(
            candidates = report.candidate_count,
            results = report.results.len(),
            similar = report.similar_count(),
            "run complete"
        );
        Ok(report)
    }

    /// Build both snapshots from membership rows, then run
    pub fn run_records(
        &self,
        rules: &RuleSet,
        before: Vec<MembershipRecord>,
        after: Vec<MembershipRecord>,
    ) -> Result<RunReport> {
        let before = HierarchyBuilder::new(before).process()?;
        let after = HierarchyBuilder::new(after).process()?;
        self.run(rules, &before, &after)
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
