use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod config;
mod db;
mod error;
mod logging;
mod models;
mod notify;
mod pattern;
mod report;
mod risk;
mod stats;

#[derive(Parser)]
#[command(name = "notebook-defaulters")]
#[command(about = "Notebook submission tracker and defaulter predictor", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("scope")
        .args(["class_name", "scholar"])
        .multiple(false)
))]
struct Scope {
    #[arg(long = "class")]
    class_name: Option<String>,
    #[arg(long)]
    scholar: Option<String>,
    #[arg(long, default_value_t = 60)]
    since_days: i64,
    /// Missing submissions needed before the volume factor counts
    #[arg(long, default_value_t = risk::DEFAULT_THRESHOLD)]
    threshold: usize,
}

impl Scope {
    fn label(&self) -> Option<&str> {
        self.class_name.as_deref().or(self.scholar.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with eight weeks of cycles
    Seed,
    /// Import submission records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Predict defaulters
    Predict {
        #[command(flatten)]
        scope: Scope,
        /// Rows to print; ignored with --json, which prints every prediction
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print the full prediction list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Compose parent warnings into an outbox CSV
    Notify {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value_t = notify::DEFAULT_MIN_PROBABILITY)]
        min_probability: u32,
        /// Message template with {{placeholder}} markers
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long, default_value = "outbox.csv")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json)?;
    let settings = config::Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let summary = db::seed(&pool).await?;
            println!(
                "Seed data written ({} new, {} updated submissions).",
                summary.inserted, summary.updated
            );
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv).await?;
            tracing::info!(
                inserted = summary.inserted,
                updated = summary.updated,
                unchanged = summary.unchanged,
                path = %csv.display(),
                "csv import finished"
            );
            println!(
                "Inserted {} and updated {} submissions from {} ({} unchanged).",
                summary.inserted,
                summary.updated,
                csv.display(),
                summary.unchanged
            );
        }
        Commands::Predict { scope, limit, json } => {
            let since = risk::cutoff_date(scope.since_days)?;
            let histories = db::fetch_histories(
                &pool,
                since,
                scope.class_name.as_deref(),
                scope.scholar.as_deref(),
            )
            .await?;
            let predictions = risk::predict_defaulters(&histories, scope.threshold);

            if json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
                return Ok(());
            }

            if predictions.is_empty() {
                println!("No defaulters found for this window.");
                return Ok(());
            }

            println!("Students most at risk of missing notebooks:");
            for prediction in predictions.iter().take(limit) {
                println!(
                    "- {} ({}) risk {}% with {} missing: {}",
                    prediction.student_name,
                    prediction.scholar_number,
                    prediction.default_probability,
                    prediction.missing_count,
                    prediction.history_pattern
                );
            }
        }
        Commands::Report { scope, out } => {
            let since = risk::cutoff_date(scope.since_days)?;
            let histories = db::fetch_histories(
                &pool,
                since,
                scope.class_name.as_deref(),
                scope.scholar.as_deref(),
            )
            .await?;
            let report = report::build_report(scope.label(), since, &histories, scope.threshold);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Notify {
            scope,
            min_probability,
            template,
            out,
        } => {
            let template = match template {
                Some(path) => {
                    let source = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read template {}", path.display()))?;
                    notify::MessageTemplate::parse(source.trim_end())
                        .with_context(|| format!("invalid template {}", path.display()))?
                }
                None => notify::MessageTemplate::parse(notify::DEFAULT_TEMPLATE)?,
            };

            let since = risk::cutoff_date(scope.since_days)?;
            let histories = db::fetch_histories(
                &pool,
                since,
                scope.class_name.as_deref(),
                scope.scholar.as_deref(),
            )
            .await?;
            let predictions = risk::predict_defaulters(&histories, scope.threshold);
            let student_ids: Vec<String> = predictions
                .iter()
                .map(|prediction| prediction.student_id.clone())
                .collect();
            let contacts = db::fetch_parent_contacts(&pool, &student_ids).await?;
            let messages = notify::compose_notifications(
                &predictions,
                &histories,
                &contacts,
                min_probability,
                &template,
            );

            notify::write_outbox(&out, &messages)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Queued {} parent messages in {}.", messages.len(), out.display());
        }
    }

    Ok(())
}
