use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod adapter;
mod aggregate;
mod alerts;
mod config;
mod db;
mod enrich;
mod models;
mod report;
#[cfg(test)]
mod test_support;

use config::Config;
use models::{Dashboard, GroupSnapshot, RequestContext};

#[derive(Parser)]
#[command(name = "group-performance-dashboard")]
#[command(about = "Group performance statistics and advisory alerts for course groups", long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to .dashboard.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo group with students, activities and grades
    Seed,
    /// Import submissions and grades for a group from a CSV file
    Import {
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print group statistics and alerts
    #[command(group(
        ArgGroup::new("source")
            .args(["group", "snapshot"])
            .required(true)
            .multiple(false)
    ))]
    Stats {
        #[arg(long)]
        group: Option<Uuid>,
        /// JSON snapshot exported from the backend
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Print the full dashboard as JSON
        #[arg(long)]
        json: bool,
        /// Generate alert descriptions with the configured model
        #[arg(long)]
        enrich: bool,
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Generate a markdown report
    #[command(group(
        ArgGroup::new("source")
            .args(["group", "snapshot"])
            .required(true)
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        group: Option<Uuid>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        enrich: bool,
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let group_id = db::seed(&pool).await?;
            println!("Seed data inserted for group {group_id}.");
        }
        Commands::Import { group, csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, group, &csv).await?;
            println!("Inserted {inserted} submissions from {}.", csv.display());
        }
        Commands::Stats {
            group,
            snapshot,
            json,
            enrich,
            requested_by,
        } => {
            config.apply_overrides(enrich);
            let snapshot = load_snapshot(group, snapshot.as_deref()).await?;
            let ctx = RequestContext {
                group_id: group.unwrap_or(snapshot.group.id),
                requested_by,
            };
            let dashboard = build_dashboard(&ctx, &snapshot, &config).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                for line in report::summary_lines(&dashboard) {
                    println!("{line}");
                }
            }
        }
        Commands::Report {
            group,
            snapshot,
            out,
            enrich,
            requested_by,
        } => {
            config.apply_overrides(enrich);
            let snapshot = load_snapshot(group, snapshot.as_deref()).await?;
            let ctx = RequestContext {
                group_id: group.unwrap_or(snapshot.group.id),
                requested_by,
            };
            let dashboard = build_dashboard(&ctx, &snapshot, &config).await;
            let report = report::build_report(&dashboard, Utc::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write report to {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_snapshot(group: Option<Uuid>, path: Option<&Path>) -> anyhow::Result<GroupSnapshot> {
    if let Some(path) = path {
        let loaded = adapter::load_snapshot_file(path)?;
        if loaded.dropped_records > 0 {
            warn!(
                "{} records in {} were incomplete or malformed",
                loaded.dropped_records,
                path.display()
            );
        }
        return Ok(loaded.snapshot);
    }

    let group_id = group.context("either --group or --snapshot is required")?;
    let pool = connect().await?;
    db::fetch_snapshot(&pool, group_id).await
}

/// Statistics and alert decisions first; alert wording is filled in afterwards.
async fn build_dashboard(
    ctx: &RequestContext,
    snapshot: &GroupSnapshot,
    config: &Config,
) -> Dashboard {
    let statistics = aggregate::compute_statistics(ctx, snapshot, &config.thresholds);
    let drafts = alerts::evaluate(&statistics, &config.thresholds);
    info!(
        "Group {}: {} alerts from {} submissions",
        statistics.group_name,
        drafts.len(),
        statistics.submissions_count
    );

    let alerts = if config.enrichment.enabled {
        match enrich::OllamaEnricher::new(&config.enrichment) {
            Ok(enricher) => enrich::enrich_alerts(drafts, &enricher).await,
            Err(e) => {
                warn!("Alert enrichment unavailable, using fallback text: {}", e);
                alerts::finalize_alerts(drafts)
            }
        }
    } else {
        alerts::finalize_alerts(drafts)
    };

    Dashboard { statistics, alerts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityState;
    use crate::test_support::SnapshotBuilder;

    fn sample() -> SnapshotBuilder {
        let mut builder = SnapshotBuilder::new();
        let essay = builder.activity("Essay", ActivityState::Active);
        let top = builder.student("Top");
        builder.submit_graded(top, essay, 4.8);
        let low = builder.student("Low");
        builder.submit_graded(low, essay, 2.1);
        builder.student("Quiet");
        builder
    }

    #[tokio::test]
    async fn dashboard_without_enrichment_uses_fallback_text() {
        let builder = sample();
        let dashboard =
            build_dashboard(&builder.context(), &builder.build(), &Config::default()).await;

        assert_eq!(dashboard.statistics.active_students_count, 3);
        assert_eq!(dashboard.statistics.at_risk_students.len(), 1);
        assert!(!dashboard.alerts.is_empty());
        assert!(dashboard.alerts.iter().all(|a| !a.enriched));
    }

    #[tokio::test]
    async fn failed_enrichment_keeps_the_same_alerts() {
        let builder = sample();
        let plain =
            build_dashboard(&builder.context(), &builder.build(), &Config::default()).await;

        let mut config = Config::default();
        config.apply_overrides(true);
        config.enrichment.ollama_url = "http://127.0.0.1:9".to_string();
        config.enrichment.timeout_seconds = 2;
        let enriched = build_dashboard(&builder.context(), &builder.build(), &config).await;

        assert_eq!(plain, enriched);
    }

    #[test]
    fn dashboard_serializes_flat_statistics_with_alerts() {
        let builder = sample();
        let thresholds = config::Thresholds::default();
        let statistics =
            aggregate::compute_statistics(&builder.context(), &builder.build(), &thresholds);
        let alerts = alerts::finalize_alerts(alerts::evaluate(&statistics, &thresholds));
        let value = serde_json::to_value(Dashboard { statistics, alerts }).unwrap();

        for field in [
            "active_students_count",
            "general_average",
            "submission_rate",
            "pending_submissions",
            "weekly_progress",
            "grade_distribution",
            "at_risk_students",
            "alerts",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["alerts"][0]["severity"], "warning");
    }

    #[test]
    fn stats_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["dashboard", "stats"]).is_err());
        assert!(Cli::try_parse_from([
            "dashboard",
            "stats",
            "--group",
            "5b0c7a43-5f8e-4d0c-9d1a-2f6b8e1c4a10",
            "--snapshot",
            "snap.json",
        ])
        .is_err());
        assert!(Cli::try_parse_from(["dashboard", "stats", "--snapshot", "snap.json", "--json"]).is_ok());
    }
}
