// 🔎 Organization Filter - Label candidate pairs with the first matching rule
// Most of the candidate space is noise; by default only pairs some enabled
// rule accepts make it into the output.

use crate::rules::{Action, RuleSet};
use crate::similarity::CandidatePair;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, info_span};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterOptions {
    /// Keep pairs no rule matched, labeled `needs_review`
    #[serde(default)]
    pub retain_unmatched: bool,

    /// Pairs where either side has fewer members are excluded before rules run (0 = off)
    #[serde(default)]
    pub min_users: usize,

    /// After each `mark_similar` rule, pairs touching a similar unit become
    /// `exclude` with no rule id and skip the remaining rules. Reported only
    /// with `retain_unmatched`.
    #[serde(default)]
    pub exclude_related: bool,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub pair: CandidatePair,
    pub matched_rule_id: Option<String>,
    pub action: Action,
}

impl MatchResult {
    pub fn is_similar(&self) -> bool {
        self.action == Action::MarkSimilar
    }
}

/// Counts for one `apply` call.
///
/// `matched` and `by_rule` count pairs whose final label came from a rule.
/// A pair relabeled by `exclude_related` is counted in `related_excluded`
/// only, and its result carries no `matched_rule_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSummary {
    pub candidates: usize,
    pub below_min_users: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub related_excluded: usize,
    pub by_rule: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub results: Vec<MatchResult>,
    pub summary: FilterSummary,
}

impl FilterOutcome {
    pub fn similar(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.iter().filter(|r| r.is_similar())
    }
}

// ============================================================================
// FILTER
// ============================================================================

pub struct OrganizationFilter<'r> {
    rules: &'r RuleSet,
    options: FilterOptions,
}

impl<'r> OrganizationFilter<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        OrganizationFilter {
            rules,
            options: FilterOptions::default(),
        }
    }

    pub fn with_options(rules: &'r RuleSet, options: FilterOptions) -> Self {
        OrganizationFilter { rules, options }
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Label one pair. `None` when no enabled rule matches.
    pub fn evaluate(&self, pair: &CandidatePair) -> Option<MatchResult> {
        self.rules.first_match(&pair.metrics).map(|rule| MatchResult {
            pair: pair.clone(),
            matched_rule_id: Some(rule.id.clone()),
            action: rule.action,
        })
    }

    fn below_min_users(&self, pair: &CandidatePair) -> bool {
        let min = self.options.min_users;
        min > 0 && (pair.metrics.num_users_df1 < min || pair.metrics.num_users_df2 < min)
    }

    /// Label every pair, rule by rule. Results keep candidate order.
    pub fn apply(&self, pairs: &[CandidatePair]) -> FilterOutcome {
        let span = info_span!("filter", candidates = pairs.len(), rules = self.rules.rule_count());
        let _guard = span.enter();

        let mut summary = FilterSummary {
            candidates: pairs.len(),
            ..Default::default()
        };

        let mut slots: Vec<Slot> = pairs
            .iter()
            .map(|pair| {
                if self.below_min_users(pair) {
                    Slot::BelowMinUsers
                } else {
                    Slot::Open
                }
            })
            .collect();
        summary.below_min_users = slots.iter().filter(|s| matches!(s, Slot::BelowMinUsers)).count();

        let mut similar_units: HashSet<&str> = HashSet::new();
        for rule in self.rules.enabled_rules() {
            for (pair, slot) in pairs.iter().zip(slots.iter_mut()) {
                if matches!(slot, Slot::Open) && rule.matches(&pair.metrics) {
                    *slot = Slot::Labeled(rule.id.as_str(), rule.action);
                    if rule.action == Action::MarkSimilar {
                        similar_units.insert(pair.path_x.as_str());
                        similar_units.insert(pair.path_y.as_str());
                    }
                }
            }

            if self.options.exclude_related && rule.action == Action::MarkSimilar {
                let changed = exclude_related(pairs, &mut slots, &similar_units);
                if changed > 0 {
                    debug!(rule_id = %rule.id, pairs = changed, "related pairs excluded");
                }
                summary.related_excluded += changed;
            }
        }

        let retain = self.options.retain_unmatched;
        let mut results = Vec::new();
        for (pair, slot) in pairs.iter().zip(slots) {
            let (rule_id, action) = match slot {
                Slot::Labeled(id, action) => {
                    summary.matched += 1;
                    *summary.by_rule.entry(id.to_string()).or_default() += 1;
                    (Some(id.to_string()), action)
                }
                Slot::Open => {
                    summary.unmatched += 1;
                    if !retain {
                        continue;
                    }
                    (None, Action::NeedsReview)
                }
                Slot::BelowMinUsers | Slot::Related => {
                    if !retain {
                        continue;
                    }
                    (None, Action::Exclude)
                }
            };
            results.push(MatchResult {
                pair: pair.clone(),
                matched_rule_id: rule_id,
                action,
            });
        }

        for result in &results {
            *summary.by_action.entry(result.action.to_string()).or_default() += 1;
        }

        for (rule_id, count) in &summary.by_rule {
            debug!(rule_id = %rule_id, pairs = count, "rule matches");
        }
        info!(
            matched = summary.matched,
            unmatched = summary.unmatched,
            below_min_users = summary.below_min_users,
            related_excluded = summary.related_excluded,
            output = results.len(),
            "filter applied"
        );

        FilterOutcome { results, summary }
    }
}

/// Where a pair stands while rules are walked
#[derive(Debug, Clone, Copy)]
enum Slot<'a> {
    Open,
    BelowMinUsers,
    Labeled(&'a str, Action),
    Related,
}

/// Take pairs touching a similar unit out of evaluation. Returns how many changed.
fn exclude_related(pairs: &[CandidatePair], slots: &mut [Slot], similar_units: &HashSet<&str>) -> usize {
    let mut changed = 0;
    for (pair, slot) in pairs.iter().zip(slots.iter_mut()) {
        let relabel = match slot {
            Slot::Open => true,
            Slot::Labeled(_, action) => *action == Action::NeedsReview,
            Slot::BelowMinUsers | Slot::Related => false,
        };
        let touches = similar_units.contains(pair.path_x.as_str())
            || similar_units.contains(pair.path_y.as_str());
        if relabel && touches {
            *slot = Slot::Related;
            changed += 1;
        }
    }
    changed
}

// ============================================================================
// TESTS
// ============================================================================
