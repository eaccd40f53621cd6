use anyhow::{Context, Result};
use apod_core::parse_date;
use apod_storage::SqlApodRepository;
use apod_sync::{build_from_config, NoticeLevel, SyncConfig, SyncOutcome};
use apod_web::WebConfig;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "apod-cli")]
#[command(about = "Astronomy Picture of the Day archive")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the browse UI and sync endpoints.
    Serve,
    /// Create the apod table if missing.
    Migrate,
    /// Archive the upstream's current picture.
    SyncToday,
    /// Archive every picture in an inclusive range of at most 30 days.
    SyncRange {
        #[arg(long, value_parser = parse_cli_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_cli_date)]
        end: NaiveDate,
    },
}

fn parse_cli_date(raw: &str) -> Result<NaiveDate, String> {
    parse_date(raw).map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

/// Print the outcome; fetch failures and rejected ranges exit non-zero.
fn report(outcome: &SyncOutcome) -> Result<()> {
    let notice = outcome.notice();
    if notice.level == NoticeLevel::Error {
        anyhow::bail!(notice.text);
    }
    println!("{}", notice.text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let sync = build_from_config(&config).await?;
            apod_web::serve(WebConfig::from_env(), sync).await?;
        }
        Commands::Migrate => {
            let repository = SqlApodRepository::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            repository.migrate().await.context("creating apod table")?;
            println!("migrate complete: backend={:?}", repository.backend());
        }
        Commands::SyncToday => {
            let sync = build_from_config(&config).await?;
            report(&sync.sync_today().await?)?;
        }
        Commands::SyncRange { start, end } => {
            let sync = build_from_config(&config).await?;
            report(&sync.sync_range(start, end).await?)?;
        }
    }

    Ok(())
}
