use std::path::PathBuf;

use org_match::config::RunConfig;
use org_match::filter::FilterOptions;
use org_match::hierarchy::{load_membership_table, Hierarchy, HierarchyBuilder};
use org_match::org_tree::OrgTree;
use org_match::report::{self, ReportRow};
use org_match::rules::{Action, RuleSet};
use org_match::similarity::{MetricField, Pairing, SimilarityAnalyzer};
use org_match::MatchEngine;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn snapshot(name: &str) -> Hierarchy {
    let records = load_membership_table(&fixtures_dir().join(name)).unwrap();
    HierarchyBuilder::new(records).process().unwrap()
}

fn sample_rules() -> RuleSet {
    RuleSet::from_json_file(config_dir().join("rules.json")).unwrap()
}

type Label = (String, String, Option<String>, Action);

fn label(x: &str, y: &str, rule: &str, action: Action) -> Label {
    (x.to_string(), y.to_string(), Some(rule.to_string()), action)
}

fn labels(results: &[org_match::MatchResult]) -> Vec<Label> {
    results
        .iter()
        .map(|r| {
            (
                r.pair.path_x.clone(),
                r.pair.path_y.clone(),
                r.matched_rule_id.clone(),
                r.action,
            )
        })
        .collect()
}

// -------------------------------------------------------------------------
// One user moves from Hardware to a new Marketing unit
// -------------------------------------------------------------------------

#[test]
fn moved_user_keeps_hardware_similar() {
    let before = snapshot("before.csv");
    let after = snapshot("after.csv");
    let analyzer = SimilarityAnalyzer::new(&before, &after);

    let hardware = analyzer
        .compare("Company/Engineering/Hardware", "Company/Engineering/Hardware")
        .unwrap();
    assert_eq!(hardware.metrics.num_users_df1, 5);
    assert_eq!(hardware.metrics.num_users_df2, 4);
    assert_eq!(hardware.metrics.intersection_size, 4);
    assert!(hardware.metrics.jaccard_index >= 0.6);
    assert!((hardware.metrics.jaccard_index - 0.8).abs() < 1e-12);

    // Marketing does not exist before the move
    let marketing = analyzer.compare("Company/Marketing", "Company/Marketing").unwrap();
    assert_eq!(marketing.metrics.num_users_df1, 0);
    assert_eq!(marketing.metrics.num_users_df2, 1);
    for field in MetricField::ALL.iter().filter(|f| f.is_ratio()) {
        assert_eq!(marketing.metrics.number(*field), 0.0, "{}", field);
    }
}

#[test]
fn sample_rules_label_the_move() {
    let before = snapshot("before.csv");
    let after = snapshot("after.csv");
    let report = MatchEngine::default().run(&sample_rules(), &before, &after).unwrap();

    assert_eq!(report.candidate_count, 4);
    assert_eq!(
        labels(&report.results),
        vec![
            label("Company", "Company", "RULE1", Action::MarkSimilar),
            label("Company/Engineering", "Company/Marketing", "RULE5", Action::NeedsReview),
            label("Company/Engineering", "Company/Engineering", "RULE1", Action::MarkSimilar),
            label(
                "Company/Engineering/Hardware",
                "Company/Engineering/Hardware",
                "RULE1",
                Action::MarkSimilar
            ),
        ]
    );
    assert_eq!(report.similar_count(), 3);
    assert!(report
        .results
        .iter()
        .all(|r| r.matched_rule_id.as_deref() != Some("RULE4")));
}

#[test]
fn csv_rule_sheets_match_json_rules() {
    let before = snapshot("before.csv");
    let after = snapshot("after.csv");
    let from_csv = RuleSet::from_csv_files(
        config_dir().join("rules.csv"),
        config_dir().join("conditions.csv"),
    )
    .unwrap();

    assert_eq!(from_csv.rule_count(), 5);
    assert!(!from_csv.get("RULE4").unwrap().enabled);

    let engine = MatchEngine::default();
    let json_report = engine.run(&sample_rules(), &before, &after).unwrap();
    let csv_report = engine.run(&from_csv, &before, &after).unwrap();
    assert_eq!(labels(&json_report.results), labels(&csv_report.results));
}

#[test]
fn org_codes_resolve_to_the_same_snapshot() {
    let translate = |orgs: &str, members: &str| {
        let tree = OrgTree::from_csv(&fixtures_dir().join(orgs)).unwrap();
        let records = load_membership_table(&fixtures_dir().join(members)).unwrap();
        HierarchyBuilder::new(tree.translate_memberships(&records).unwrap())
            .process()
            .unwrap()
    };

    let before = translate("orgs_before.csv", "codes_before.csv");
    let after = translate("orgs_after.csv", "codes_after.csv");

    let engine = MatchEngine::default();
    let by_code = engine.run(&sample_rules(), &before, &after).unwrap();
    let by_path = engine
        .run(&sample_rules(), &snapshot("before.csv"), &snapshot("after.csv"))
        .unwrap();
    assert_eq!(labels(&by_code.results), labels(&by_path.results));
}

#[test]
fn shared_members_with_related_exclusion() {
    let before = snapshot("before.csv");
    let after = snapshot("after.csv");

    let config = RunConfig::from_toml_str(
        r#"
        [analysis]
        pairing = "shared_members"

        [filter]
        retain_unmatched = true
        exclude_related = true
        "#,
    )
    .unwrap();
    let report = MatchEngine::new(config).run(&sample_rules(), &before, &after).unwrap();

    // 3 units before, each sharing users with all 4 units after
    assert_eq!(report.candidate_count, 12);
    assert_eq!(report.results.len(), 12);
    assert_eq!(report.pairing, Pairing::SharedMembers);
    assert!(report.results.iter().all(|r| r.pair.metrics.intersection_size > 0));

    // Every unit takes part in a similar pair, so nothing is left for review
    assert_eq!(report.similar_count(), 3);
    assert!(report
        .results
        .iter()
        .filter(|r| !r.is_similar())
        .all(|r| r.action == Action::Exclude));
}

#[test]
fn reports_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("matches.csv");
    let json_path = dir.path().join("report.json");

    let run_report = MatchEngine::new(RunConfig {
        filter: FilterOptions {
            retain_unmatched: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .run(&sample_rules(), &snapshot("before.csv"), &snapshot("after.csv"))
    .unwrap();

    assert_eq!(report::write_csv_file(&csv_path, &run_report.results).unwrap(), 4);
    report::write_json_file(&json_path, &run_report).unwrap();

    let mut rdr = csv::Reader::from_path(&csv_path).unwrap();
    let rows: Vec<ReportRow> = rdr
        .deserialize::<ReportRow>()
        .collect::<Result<_, _>>()
        .unwrap();
    let expected: Vec<ReportRow> = run_report.results.iter().map(ReportRow::from_result).collect();
    assert_eq!(rows, expected);

    let reloaded = report::read_json_file(&json_path).unwrap();
    assert_eq!(reloaded.run_id, run_report.run_id);
    assert_eq!(labels(&reloaded.results), labels(&run_report.results));
    assert_eq!(reloaded.rules_fingerprint, run_report.rules_fingerprint);
}

#[cfg(feature = "sqlite")]
#[test]
fn run_is_stored_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let conn = rusqlite::Connection::open(dir.path().join("org-match.db")).unwrap();
    org_match::setup_database(&conn).unwrap();

    let report = MatchEngine::default()
        .run(&sample_rules(), &snapshot("before.csv"), &snapshot("after.csv"))
        .unwrap();

    assert_eq!(org_match::insert_run(&conn, &report).unwrap(), 4);
    assert_eq!(org_match::count_results(&conn, &report.run_id).unwrap(), 4);

    let runs = org_match::get_runs(&conn).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].rules_fingerprint, report.rules_fingerprint);

    let stored = org_match::get_results_for_run(&conn, &report.run_id).unwrap();
    assert_eq!(stored[1].matched_rule_id.as_deref(), Some("RULE5"));
    assert_eq!(stored[1].action, Some(Action::NeedsReview));
}
