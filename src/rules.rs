// 🏷️ Matching Rules - Rules as Data
// Ordered rules over the similarity metric vocabulary. Every condition of a
// rule must hold (AND). Definitions are validated once, at load time.

use crate::error::{OrgMatchError, Result};
use crate::similarity::{MetricField, MetricValue, Metrics};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

// ============================================================================
// ACTION
// ============================================================================

/// Decision label attached to a pair by the rule that matched it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Same organization, renamed or restructured
    MarkSimilar,

    /// Not the same organization
    Exclude,

    /// Undecided; a person should look at it
    NeedsReview,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::MarkSimilar => "mark_similar",
            Action::Exclude => "exclude",
            Action::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = OrgMatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mark_similar" => Ok(Action::MarkSimilar),
            "exclude" => Ok(Action::Exclude),
            "needs_review" => Ok(Action::NeedsReview),
            other => Err(OrgMatchError::config(format!(
                "unknown action '{}' (expected mark_similar, exclude or needs_review)",
                other
            ))),
        }
    }
}

// ============================================================================
// OPERATORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
    In,
    Between,
}

impl Operator {
    /// Read-only operator reference
    pub const ALL: [Operator; 8] = [
        Operator::Ge,
        Operator::Gt,
        Operator::Le,
        Operator::Lt,
        Operator::Eq,
        Operator::Ne,
        Operator::In,
        Operator::Between,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::In => "in",
            Operator::Between => "between",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operator::Ge => "greater than or equal to a number",
            Operator::Gt => "greater than a number",
            Operator::Le => "less than or equal to a number",
            Operator::Lt => "less than a number",
            Operator::Eq => "equal to a number or boolean",
            Operator::Ne => "not equal to a number or boolean",
            Operator::In => "member of a literal list, e.g. [0, 1]",
            Operator::Between => "inside the inclusive range [low, high]",
        }
    }
}

impl FromStr for Operator {
    type Err = OrgMatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.symbol() == wanted)
            .ok_or_else(|| OrgMatchError::config(format!("unknown operator '{}'", wanted)))
    }
}

// ============================================================================
// RULE DEFINITIONS (as authored)
// ============================================================================

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub field: String,
    pub operator: String,
    pub value: Value,

    /// When set, the condition tests `field / secondary_field`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub action: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub conditions: Vec<ConditionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub rules: Vec<RuleDefinition>,
}

// ============================================================================
// COMPILED CONDITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Number(f64),
    Flag(bool),
}

impl Literal {
    fn matches(&self, value: MetricValue) -> bool {
        match (self, value) {
            (Literal::Number(a), MetricValue::Number(b)) => *a == b,
            (Literal::Flag(a), MetricValue::Flag(b)) => *a == b,
            _ => false,
        }
    }
}

/// One variant per operator, with its parsed operand
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Ge(f64),
    Gt(f64),
    Le(f64),
    Lt(f64),
    Eq(Literal),
    Ne(Literal),
    In(Vec<Literal>),
    Between { low: f64, high: f64 },
}

impl Predicate {
    pub fn operator(&self) -> Operator {
        match self {
            Predicate::Ge(_) => Operator::Ge,
            Predicate::Gt(_) => Operator::Gt,
            Predicate::Le(_) => Operator::Le,
            Predicate::Lt(_) => Operator::Lt,
            Predicate::Eq(_) => Operator::Eq,
            Predicate::Ne(_) => Operator::Ne,
            Predicate::In(_) => Operator::In,
            Predicate::Between { .. } => Operator::Between,
        }
    }

    fn test(&self, value: MetricValue) -> bool {
        let number = match value {
            MetricValue::Number(n) => Some(n),
            MetricValue::Flag(_) => None,
        };
        match self {
            Predicate::Ge(t) => number.map_or(false, |n| n >= *t),
            Predicate::Gt(t) => number.map_or(false, |n| n > *t),
            Predicate::Le(t) => number.map_or(false, |n| n <= *t),
            Predicate::Lt(t) => number.map_or(false, |n| n < *t),
            Predicate::Eq(lit) => lit.matches(value),
            Predicate::Ne(lit) => !lit.matches(value),
            Predicate::In(list) => list.iter().any(|lit| lit.matches(value)),
            Predicate::Between { low, high } => number.map_or(false, |n| n >= *low && n <= *high),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Field(MetricField),
    Ratio {
        numerator: MetricField,
        denominator: MetricField,
    },
}

impl Operand {
    fn is_flag(&self) -> bool {
        matches!(self, Operand::Field(f) if f.is_flag())
    }

    fn read(&self, metrics: &Metrics) -> MetricValue {
        match self {
            Operand::Field(field) => metrics.get(*field),
            Operand::Ratio {
                numerator,
                denominator,
            } => {
                let d = metrics.number(*denominator);
                if d == 0.0 {
                    MetricValue::Number(0.0)
                } else {
                    MetricValue::Number(metrics.number(*numerator) / d)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub operand: Operand,
    pub predicate: Predicate,
}

impl Condition {
    pub fn holds(&self, metrics: &Metrics) -> bool {
        self.predicate.test(self.operand.read(metrics))
    }

    /// Validate and compile one authored condition
    pub fn compile(def: &ConditionDefinition) -> Result<Self> {
        let field: MetricField = def.field.parse()?;
        let operator: Operator = def.operator.parse()?;

        let operand = match def.secondary_field.as_deref().map(str::trim) {
            None | Some("") => Operand::Field(field),
            Some(secondary) => {
                let denominator: MetricField = secondary.parse()?;
                if field.is_flag() || denominator.is_flag() {
                    return Err(OrgMatchError::config(format!(
                        "ratio {}/{} needs two numeric fields",
                        field, denominator
                    )));
                }
                Operand::Ratio {
                    numerator: field,
                    denominator,
                }
            }
        };

        let flag = operand.is_flag();
        let context = || format!("{} {} {}", def.field, def.operator, def.value);

        let predicate = match operator {
            Operator::Ge | Operator::Gt | Operator::Le | Operator::Lt => {
                if flag {
                    return Err(OrgMatchError::config(format!(
                        "{}: ordering operator on boolean field",
                        context()
                    )));
                }
                let n = number_literal(&def.value).ok_or_else(|| {
                    OrgMatchError::config(format!("{}: value must be a number", context()))
                })?;
                match operator {
                    Operator::Ge => Predicate::Ge(n),
                    Operator::Gt => Predicate::Gt(n),
                    Operator::Le => Predicate::Le(n),
                    _ => Predicate::Lt(n),
                }
            }
            Operator::Eq | Operator::Ne => {
                let lit = typed_literal(&def.value, flag).ok_or_else(|| {
                    OrgMatchError::config(format!(
                        "{}: value must be a {}",
                        context(),
                        if flag { "boolean" } else { "number" }
                    ))
                })?;
                if operator == Operator::Eq {
                    Predicate::Eq(lit)
                } else {
                    Predicate::Ne(lit)
                }
            }
            Operator::In => {
                let items = def.value.as_array().filter(|a| !a.is_empty()).ok_or_else(|| {
                    OrgMatchError::config(format!("{}: value must be a non-empty list", context()))
                })?;
                let list = items
                    .iter()
                    .map(|v| {
                        typed_literal(v, flag).ok_or_else(|| {
                            OrgMatchError::config(format!(
                                "{}: list element {} has the wrong type",
                                context(),
                                v
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Predicate::In(list)
            }
            Operator::Between => {
                let bounds: Vec<f64> = def
                    .value
                    .as_array()
                    .map(|a| a.iter().filter_map(number_literal).collect())
                    .unwrap_or_default();
                let two_numbers = def.value.as_array().map_or(false, |a| a.len() == 2);
                if flag || !two_numbers || bounds.len() != 2 {
                    return Err(OrgMatchError::config(format!(
                        "{}: between needs a numeric field and a two-element [low, high] list",
                        context()
                    )));
                }
                if bounds[0] > bounds[1] {
                    return Err(OrgMatchError::config(format!(
                        "{}: low bound is greater than high bound",
                        context()
                    )));
                }
                Predicate::Between {
                    low: bounds[0],
                    high: bounds[1],
                }
            }
        };

        Ok(Condition { operand, predicate })
    }
}

fn number_literal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn flag_literal(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn typed_literal(value: &Value, flag: bool) -> Option<Literal> {
    if flag {
        flag_literal(value).map(Literal::Flag)
    } else {
        number_literal(value).map(Literal::Number)
    }
}

// ============================================================================
// RULE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub action: Action,
    pub conditions: Vec<Condition>,
}

impl Rule {
    /// True when every condition holds
    pub fn matches(&self, metrics: &Metrics) -> bool {
        self.conditions.iter().all(|c| c.holds(metrics))
    }

    pub fn compile(def: &RuleDefinition) -> Result<Self> {
        let id = def.id.trim().to_string();
        if id.is_empty() {
            return Err(OrgMatchError::config("rule with empty id"));
        }
        if def.conditions.is_empty() {
            return Err(OrgMatchError::config(format!("rule {} has no conditions", id)));
        }

        let action: Action = def
            .action
            .parse()
            .map_err(|e| OrgMatchError::config(format!("rule {}: {}", id, e)))?;

        let conditions = def
            .conditions
            .iter()
            .map(|c| {
                Condition::compile(c).map_err(|e| OrgMatchError::config(format!("rule {}: {}", id, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Rule {
            id,
            name: def.name.trim().to_string(),
            description: def.description.trim().to_string(),
            enabled: def.enabled,
            action,
            conditions,
        })
    }
}

// ============================================================================
// TABULAR ROWS (Rules sheet + Conditions sheet)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RuleRow {
    #[serde(rename = "RuleID")]
    rule_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Enabled")]
    enabled: String,
}

#[derive(Debug, Deserialize)]
struct ConditionRow {
    #[serde(rename = "RuleID")]
    rule_id: String,
    #[serde(rename = "Field")]
    field: String,
    #[serde(rename = "Operator")]
    operator: String,
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "SecondaryField", default)]
    secondary_field: Option<String>,
}

fn parse_enabled(raw: &str, rule_id: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(OrgMatchError::config(format!(
            "rule {}: Enabled must be true/false, got '{}'",
            rule_id, other
        ))),
    }
}

/// Cell text → JSON value: bracketed lists, numbers, booleans, else text
fn parse_cell_value(raw: &str) -> Result<Value> {
    let text = raw.trim();
    if text.starts_with('[') && text.ends_with(']') {
        return serde_json::from_str(text)
            .map_err(|e| OrgMatchError::config(format!("malformed list value '{}': {}", text, e)));
    }
    if let Ok(n) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(n) {
            return Ok(Value::Number(number));
        }
    }
    match text.to_ascii_lowercase().as_str() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Ok(Value::String(text.to_string())),
    }
}

// ============================================================================
// RULE SET
// ============================================================================

#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
    fingerprint: String,
}

impl RuleSet {
    /// Compile authored rules, keeping declared order
    pub fn from_definitions(definitions: Vec<RuleDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definitions.len());

        for def in &definitions {
            let rule = Rule::compile(def)?;
            if !seen.insert(rule.id.clone()) {
                return Err(OrgMatchError::config(format!("duplicate rule id: {}", rule.id)));
            }
            debug!(rule_id = %rule.id, enabled = rule.enabled, conditions = rule.conditions.len(), "rule compiled");
            rules.push(rule);
        }

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&definitions)?);
        let fingerprint = format!("{:x}", hasher.finalize());

        info!(
            rules = rules.len(),
            enabled = rules.iter().filter(|r| r.enabled).count(),
            "rule set loaded"
        );

        Ok(RuleSet { rules, fingerprint })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: RuleDocument = serde_json::from_str(json)
            .map_err(|e| OrgMatchError::config(format!("failed to parse rules JSON: {}", e)))?;
        RuleSet::from_definitions(document.rules)
    }

    /// Load rules from a JSON file (`{"rules": [...]}`)
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        RuleSet::from_json_str(&content)
    }

    /// Load the Rules and Conditions sheets exported as CSV
    pub fn from_csv_files<P: AsRef<Path>>(rules_path: P, conditions_path: P) -> Result<Self> {
        let rules = fs::File::open(rules_path.as_ref())?;
        let conditions = fs::File::open(conditions_path.as_ref())?;
        RuleSet::from_csv_readers(rules, conditions)
    }

    pub fn from_csv_readers<R: Read, C: Read>(rules: R, conditions: C) -> Result<Self> {
        let mut rule_rows = Vec::new();
        for row in csv::Reader::from_reader(rules).deserialize() {
            let row: RuleRow =
                row.map_err(|e| OrgMatchError::config(format!("rules sheet row: {}", e)))?;
            rule_rows.push(row);
        }

        let mut by_rule: BTreeMap<String, Vec<ConditionDefinition>> = BTreeMap::new();
        for row in csv::Reader::from_reader(conditions).deserialize() {
            let row: ConditionRow =
                row.map_err(|e| OrgMatchError::config(format!("conditions sheet row: {}", e)))?;
            by_rule
                .entry(row.rule_id.trim().to_string())
                .or_default()
                .push(ConditionDefinition {
                    field: row.field,
                    operator: row.operator,
                    value: parse_cell_value(&row.value)?,
                    secondary_field: row.secondary_field.filter(|s| !s.trim().is_empty()),
                });
        }

        let mut definitions = Vec::with_capacity(rule_rows.len());
        for row in rule_rows {
            let id = row.rule_id.trim().to_string();
            definitions.push(RuleDefinition {
                enabled: parse_enabled(&row.enabled, &id)?,
                conditions: by_rule.remove(&id).unwrap_or_default(),
                id,
                name: row.name,
                description: row.description.unwrap_or_default(),
                action: row.action,
            });
        }

        if let Some(orphan) = by_rule.keys().next() {
            return Err(OrgMatchError::config(format!(
                "conditions reference unknown rule id: {}",
                orphan
            )));
        }

        RuleSet::from_definitions(definitions)
    }

    /// All rules in declared order, disabled ones included
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// First enabled rule (declared order) whose conditions all hold
    pub fn first_match(&self, metrics: &Metrics) -> Option<&Rule> {
        self.enabled_rules().find(|rule| rule.matches(metrics))
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// SHA-256 of the authored definitions
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(n1: usize, n2: usize, inter: usize) -> Metrics {
        Metrics::from_counts(n1, n2, inter, 2, 2, false)
    }

    fn cond(field: &str, operator: &str, value: Value) -> ConditionDefinition {
        ConditionDefinition {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
            secondary_field: None,
        }
    }

    fn rule(id: &str, action: &str, enabled: bool, conditions: Vec<ConditionDefinition>) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: format!("rule {}", id),
            description: String::new(),
            action: action.to_string(),
            enabled,
            conditions,
        }
    }

    #[test]
    fn test_operators() {
        let m = metrics(4, 5, 4); // jaccard 0.8
        let check = |operator: &str, value: Value| {
            Condition::compile(&cond("jaccard_index", operator, value))
                .unwrap()
                .holds(&m)
        };

        assert!(check(">=", json!(0.8)));
        assert!(!check(">", json!(0.8)));
        assert!(check("<=", json!(0.8)));
        assert!(check("<", json!(0.9)));
        assert!(check("==", json!(0.8)));
        assert!(check("!=", json!(0.5)));
        assert!(check("between", json!([0.5, 0.8])));
        assert!(!check("between", json!([0.81, 1.0])));

        let size_in = Condition::compile(&cond("intersection_size", "in", json!([1, 4]))).unwrap();
        assert!(size_in.holds(&m));
    }

    #[test]
    fn test_boolean_field() {
        let same = Metrics::from_counts(1, 1, 1, 1, 1, true);
        let c = Condition::compile(&cond("same_org_name", "==", json!(true))).unwrap();
        assert!(c.holds(&same));
        assert!(!c.holds(&metrics(1, 1, 1)));

        let err = Condition::compile(&cond("same_org_name", ">=", json!(1))).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(_)));
    }

    #[test]
    fn test_ratio_with_secondary_field() {
        let mut def = cond("intersection_size", ">=", json!(0.5));
        def.secondary_field = Some("num_users_df2".to_string());
        let c = Condition::compile(&def).unwrap();

        assert!(c.holds(&metrics(10, 4, 2)));
        assert!(!c.holds(&metrics(10, 5, 2)));
        // zero denominator reads as 0
        assert!(!c.holds(&metrics(10, 0, 0)));
    }

    #[test]
    fn test_load_time_errors() {
        let bad_field = cond("jacard_index", ">=", json!(0.5));
        assert!(Condition::compile(&bad_field).is_err());

        let bad_operator = cond("jaccard_index", "=>", json!(0.5));
        assert!(Condition::compile(&bad_operator).is_err());

        let three_bounds = cond("jaccard_index", "between", json!([0.1, 0.2, 0.3]));
        assert!(Condition::compile(&three_bounds).is_err());

        let inverted = cond("jaccard_index", "between", json!([0.9, 0.1]));
        assert!(Condition::compile(&inverted).is_err());

        let not_a_number = cond("jaccard_index", ">=", json!("high"));
        assert!(Condition::compile(&not_a_number).is_err());

        let empty_in = cond("rank_distance", "in", json!([]));
        assert!(Condition::compile(&empty_in).is_err());
    }

    #[test]
    fn test_rule_set_rejects_bad_rules() {
        let ok = cond("jaccard_index", ">=", json!(0.5));

        let dup = vec![
            rule("R1", "mark_similar", true, vec![ok.clone()]),
            rule("R1", "exclude", true, vec![ok.clone()]),
        ];
        assert!(RuleSet::from_definitions(dup).is_err());

        let bad_action = vec![rule("R1", "merge", true, vec![ok.clone()])];
        assert!(RuleSet::from_definitions(bad_action).is_err());

        let empty = vec![rule("R1", "exclude", true, vec![])];
        assert!(RuleSet::from_definitions(empty).is_err());

        // disabled rules are still validated
        let disabled_typo = vec![rule("R9", "exclude", false, vec![cond("nope", ">=", json!(1))])];
        assert!(RuleSet::from_definitions(disabled_typo).is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let set = RuleSet::from_definitions(vec![
            rule("R1", "mark_similar", true, vec![cond("jaccard_index", ">=", json!(0.5))]),
            rule("R2", "exclude", true, vec![cond("jaccard_index", ">=", json!(0.1))]),
        ])
        .unwrap();

        let hit = set.first_match(&metrics(4, 5, 4)).unwrap();
        assert_eq!(hit.id, "R1");
        assert_eq!(hit.action, Action::MarkSimilar);

        let second = set.first_match(&metrics(10, 10, 3)).unwrap();
        assert_eq!(second.id, "R2");

        assert!(set.first_match(&metrics(10, 10, 0)).is_none());
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let set = RuleSet::from_definitions(vec![
            rule("R1", "mark_similar", false, vec![cond("jaccard_index", ">=", json!(0.5))]),
            rule("R2", "needs_review", true, vec![cond("intersection_size", ">", json!(0))]),
        ])
        .unwrap();

        assert_eq!(set.rule_count(), 2);
        assert_eq!(set.enabled_rules().count(), 1);
        assert_eq!(set.first_match(&metrics(4, 5, 4)).unwrap().id, "R2");
    }

    #[test]
    fn test_rule_determinism_and_fingerprint() {
        let defs = vec![rule("R1", "mark_similar", true, vec![cond("movement_rate", ">=", json!(0.7))])];
        let a = RuleSet::from_definitions(defs.clone()).unwrap();
        let b = RuleSet::from_definitions(defs).unwrap();

        let m = metrics(10, 12, 8);
        for _ in 0..5 {
            assert_eq!(a.first_match(&m).map(|r| r.id.clone()), Some("R1".to_string()));
        }
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_json_document() {
        let set = RuleSet::from_json_str(
            r#"{"rules": [
                {"id": "RULE1", "name": "small move", "action": "mark_similar",
                 "conditions": [
                    {"field": "num_users_df1", "operator": "between", "value": [3, 5]},
                    {"field": "rank_distance", "operator": "==", "value": 0}
                 ]},
                {"id": "RULE4", "name": "exploratory", "action": "needs_review", "enabled": false,
                 "conditions": [{"field": "same_org_name", "operator": "==", "value": true}]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(set.rule_count(), 2);
        assert!(set.get("RULE1").unwrap().enabled);
        assert!(!set.get("RULE4").unwrap().enabled);
    }

    #[test]
    fn test_csv_sheets() {
        let rules = "RuleID,Name,Description,Action,Enabled\n\
                     RULE1,Large move,70% moved,mark_similar,TRUE\n\
                     RULE2,Same name,,needs_review,false\n";
        let conditions = "RuleID,Field,Operator,Value,SecondaryField\n\
                          RULE1,movement_rate,>=,0.7,\n\
                          RULE1,num_users_df1,between,\"[3, 50]\",\n\
                          RULE1,intersection_size,>=,0.5,num_users_df2\n\
                          RULE2,same_org_name,==,true,\n";

        let set = RuleSet::from_csv_readers(rules.as_bytes(), conditions.as_bytes()).unwrap();
        let r1 = set.get("RULE1").unwrap();
        assert_eq!(r1.conditions.len(), 3);
        assert_eq!(r1.conditions[1].predicate, Predicate::Between { low: 3.0, high: 50.0 });
        assert!(matches!(r1.conditions[2].operand, Operand::Ratio { .. }));
        assert!(!set.get("RULE2").unwrap().enabled);
    }

    #[test]
    fn test_csv_orphan_condition_is_config_error() {
        let rules = "RuleID,Name,Description,Action,Enabled\nRULE1,a,,exclude,true\n";
        let conditions = "RuleID,Field,Operator,Value,SecondaryField\n\
                          RULE1,jaccard_index,<,0.1,\n\
                          RULE7,jaccard_index,<,0.1,\n";
        let err = RuleSet::from_csv_readers(rules.as_bytes(), conditions.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(_)));
    }

    #[test]
    fn test_malformed_sheets_are_config_errors() {
        let rules = "RuleID,Name,Description,Action,Enabled\nRULE1,a,,exclude,true\n";

        // no Operator column
        let missing_column = "RuleID,Field,Value,SecondaryField\nRULE1,jaccard_index,0.1,\n";
        let err = RuleSet::from_csv_readers(rules.as_bytes(), missing_column.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(_)), "{:?}", err);
        assert!(err.is_input_error());

        let ragged = "RuleID,Field,Operator,Value,SecondaryField\nRULE1,jaccard_index,<\n";
        let err = RuleSet::from_csv_readers(rules.as_bytes(), ragged.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(_)), "{:?}", err);

        let conditions = "RuleID,Field,Operator,Value,SecondaryField\nRULE1,jaccard_index,<,0.1,\n";
        let bad_rules = "RuleID,Name,Action,Enabled\nRULE1,a\n";
        let err = RuleSet::from_csv_readers(bad_rules.as_bytes(), conditions.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(_)), "{:?}", err);
    }

    #[test]
    fn test_csv_unknown_operator_or_field_is_config_error() {
        let rules = "RuleID,Name,Description,Action,Enabled\nRULE1,a,,exclude,true\n";

        let bad_operator = "RuleID,Field,Operator,Value,SecondaryField\nRULE1,jaccard_index,=>,0.1,\n";
        let err = RuleSet::from_csv_readers(rules.as_bytes(), bad_operator.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(ref msg) if msg.contains("=>")), "{:?}", err);

        let bad_field = "RuleID,Field,Operator,Value,SecondaryField\nRULE1,jacard_index,<,0.1,\n";
        let err = RuleSet::from_csv_readers(rules.as_bytes(), bad_field.as_bytes()).unwrap_err();
        assert!(matches!(err, OrgMatchError::Config(ref msg) if msg.contains("jacard_index")), "{:?}", err);
    }
}
