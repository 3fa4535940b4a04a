use anyhow::Result;
use clap::{Parser, Subcommand};
use reelscout_sync::RunOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reelscout-cli")]
#[command(about = "Mine discussion threads for movie and series recommendations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one discovery pass (the default command).
    Sync {
        /// Run even when the last run is still fresh.
        #[arg(long)]
        force: bool,
        /// Keep results in memory instead of writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Print a digest of recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reelscout=info".parse()?))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync {
        force: false,
        dry_run: false,
    });

    match command {
        Commands::Sync { force, dry_run } => {
            let options = RunOptions { force, dry_run };
            let summary = reelscout_sync::run_sync_once_from_env(options).await?;
            if summary.skipped() {
                info!(reason = %summary.reason, "nothing to do");
                println!("sync skipped: {}", summary.reason);
            } else {
                println!(
                    "sync complete: run_id={} titles={} saved={} failed={} elapsed_ms={} reports={}",
                    summary.run_id,
                    summary.unique_titles,
                    summary.saved,
                    summary.failed,
                    summary.elapsed_ms,
                    summary.reports_dir.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Migrate => {
            reelscout_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Report { runs } => {
            println!("{}", reelscout_sync::report_from_env(runs)?);
        }
    }

    Ok(())
}
