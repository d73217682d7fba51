use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use org_match::{
    load_membership_table, report, Hierarchy, HierarchyBuilder, MatchEngine, MembershipRecord,
    MetricField, Operator, OrgTree, Pairing, RuleSet, RunConfig, SimilarityAnalyzer,
};

#[derive(Parser)]
#[command(name = "org-match", version, about = "Match organizations across two hierarchy snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build both snapshots, compute metrics, apply rules, write reports
    Run {
        #[command(flatten)]
        snapshots: SnapshotArgs,

        #[command(flatten)]
        rules: RuleArgs,

        /// Run configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write labeled pairs as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the full run report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Store the run in a SQLite database
        #[arg(long)]
        sqlite: Option<PathBuf>,

        /// Keep pairs no rule matched (labeled needs_review)
        #[arg(long)]
        retain_unmatched: bool,
    },
    /// Compute metrics without rules
    Compare {
        #[command(flatten)]
        snapshots: SnapshotArgs,

        /// same_rank or shared_members
        #[arg(long, default_value = "same_rank")]
        pairing: String,

        /// Compare a single pair instead of the whole candidate space
        #[arg(long, requires = "path_y")]
        path_x: Option<String>,

        #[arg(long, requires = "path_x")]
        path_y: Option<String>,

        /// Write the candidate table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Load a rule set and list what it contains
    CheckRules {
        #[command(flatten)]
        rules: RuleArgs,
    },
    /// List supported operators and metric fields
    Operators,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Membership table of snapshot 1 (user_code,group)
    #[arg(long)]
    before: PathBuf,

    /// Membership table of snapshot 2
    #[arg(long)]
    after: PathBuf,

    /// Org table for snapshot 1; groups are then org codes
    #[arg(long)]
    orgs_before: Option<PathBuf>,

    /// Org table for snapshot 2
    #[arg(long)]
    orgs_after: Option<PathBuf>,
}

#[derive(Args)]
struct RuleArgs {
    /// Rule file: .json document, or the rules sheet as .csv
    #[arg(long)]
    rules: PathBuf,

    /// Conditions sheet (.csv), required with a CSV rules sheet
    #[arg(long)]
    conditions: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("org_match=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            snapshots,
            rules,
            config,
            csv,
            json,
            sqlite,
            retain_unmatched,
        } => {
            let mut config = match config {
                Some(path) => RunConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => RunConfig::default(),
            };
            if retain_unmatched {
                config.filter.retain_unmatched = true;
            }
            config.output.csv = csv.or(config.output.csv);
            config.output.json = json.or(config.output.json);
            config.output.sqlite = sqlite.or(config.output.sqlite);
            config.validate()?;

            run(config, &snapshots, &rules)
        }
        Commands::Compare {
            snapshots,
            pairing,
            path_x,
            path_y,
            csv,
        } => {
            let pairing: Pairing = pairing.parse()?;
            compare(&snapshots, pairing, path_x.zip(path_y), csv.as_deref())
        }
        Commands::CheckRules { rules } => check_rules(&rules),
        Commands::Operators => {
            list_operators();
            Ok(())
        }
    }
}

// ============================================================================
// INPUTS
// ============================================================================

fn load_rules(args: &RuleArgs) -> Result<RuleSet> {
    let is_json = args
        .rules
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let rules = if is_json {
        RuleSet::from_json_file(&args.rules)
    } else {
        match &args.conditions {
            Some(conditions) => RuleSet::from_csv_files(args.rules.as_path(), conditions.as_path()),
            None => bail!("--conditions is required with a CSV rules sheet"),
        }
    };
    rules.with_context(|| format!("Failed to load rules from {}", args.rules.display()))
}

fn load_memberships(path: &Path, orgs: Option<&Path>) -> Result<Vec<MembershipRecord>> {
    let records = load_membership_table(path)
        .with_context(|| format!("Failed to read membership table {}", path.display()))?;

    match orgs {
        Some(orgs) => {
            let tree = OrgTree::from_csv(orgs)
                .with_context(|| format!("Failed to read org table {}", orgs.display()))?;
            Ok(tree.translate_memberships(&records)?)
        }
        None => Ok(records),
    }
}

fn load_snapshots(args: &SnapshotArgs) -> Result<(Hierarchy, Hierarchy)> {
    let before = load_memberships(&args.before, args.orgs_before.as_deref())?;
    let after = load_memberships(&args.after, args.orgs_after.as_deref())?;

    let before = HierarchyBuilder::new(before)
        .process()
        .context("Snapshot 1 is invalid")?;
    let after = HierarchyBuilder::new(after)
        .process()
        .context("Snapshot 2 is invalid")?;
    Ok((before, after))
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run(config: RunConfig, snapshots: &SnapshotArgs, rule_args: &RuleArgs) -> Result<()> {
    println!("🏢 Org Match - Snapshot Reconciliation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let rules = load_rules(rule_args)?;
    println!(
        "✓ Loaded {} rules ({} enabled)",
        rules.rule_count(),
        rules.enabled_rules().count()
    );

    let (before, after) = load_snapshots(snapshots)?;
    println!(
        "✓ Snapshot 1: {} units, {} users | Snapshot 2: {} units, {} users",
        before.unit_count(),
        before.user_count(),
        after.unit_count(),
        after.user_count()
    );

    let engine = MatchEngine::new(config);
    let run_report = engine.run(&rules, &before, &after)?;
    println!("✓ {}", run_report.summary_line());
    for (action, count) in &run_report.summary.by_action {
        println!("   {:<14} {}", action, count);
    }

    let output = &engine.config().output;
    if let Some(path) = &output.csv {
        let rows = report::write_csv_file(path, &run_report.results)?;
        println!("💾 {} rows → {}", rows, path.display());
    }
    if let Some(path) = &output.json {
        report::write_json_file(path, &run_report)?;
        println!("💾 Run report → {}", path.display());
    }
    if let Some(path) = &output.sqlite {
        store_run(path, &run_report)?;
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
fn store_run(path: &Path, report: &org_match::RunReport) -> Result<()> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    org_match::setup_database(&conn)?;
    let stored = org_match::insert_run(&conn, report)?;
    println!("💾 {} rows → {} (run {})", stored, path.display(), report.run_id);
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
fn store_run(_path: &Path, _report: &org_match::RunReport) -> Result<()> {
    bail!("SQLite output not available; rebuild with --features sqlite")
}

fn compare(
    snapshots: &SnapshotArgs,
    pairing: Pairing,
    single: Option<(String, String)>,
    csv: Option<&Path>,
) -> Result<()> {
    let (before, after) = load_snapshots(snapshots)?;
    let analyzer = SimilarityAnalyzer::new(&before, &after).with_pairing(pairing);

    if let Some((x, y)) = single {
        let pair = analyzer.compare(&x, &y)?;
        println!("{}", serde_json::to_string_pretty(&pair)?);
        return Ok(());
    }

    let pairs = analyzer.compute_similarities()?;
    println!("✓ {} candidate pairs ({})", pairs.len(), pairing.as_str());

    match csv {
        Some(path) => {
            let rows = report::write_candidates_csv_file(path, &pairs)?;
            println!("💾 {} rows → {}", rows, path.display());
        }
        None => report::write_candidates_csv(std::io::stdout().lock(), &pairs).map(|_| ())?,
    }
    Ok(())
}

fn check_rules(args: &RuleArgs) -> Result<()> {
    let rules = load_rules(args)?;

    println!("📋 {} rules, fingerprint {}", rules.rule_count(), rules.fingerprint());
    for rule in rules.rules() {
        let status = if rule.enabled { "✅" } else { "⏸️ " };
        println!(
            "{} {:<10} {:<14} {} ({} conditions)",
            status,
            rule.id,
            rule.action.as_str(),
            rule.name,
            rule.conditions.len()
        );
    }
    Ok(())
}

fn list_operators() {
    println!("Operators:");
    for op in Operator::ALL {
        println!("  {:<8} {}", op.symbol(), op.description());
    }

    println!("\nMetric fields:");
    for field in MetricField::ALL {
        let kind = if field.is_flag() {
            "bool"
        } else if field.is_ratio() {
            "ratio"
        } else {
            "number"
        };
        println!("  {:<20} {}", field.name(), kind);
    }
}
