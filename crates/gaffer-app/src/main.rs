// Gaffer entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is reserved for the report)
// 2. Parse arguments
// 3. Load config, copying defaults on first run
// 4. Open the snapshot store
// 5. Run the gameweek and print the report as JSON

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gaffer_app::config;
use gaffer_app::pipeline;
use gaffer_app::store::SnapshotStore;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "gaffer")]
#[command(about = "Pick a fantasy-football squad and plan weekly transfers", long_about = None)]
struct Args {
    /// Gameweek to run (defaults to the one after the latest saved squad)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    gameweek: Option<u32>,

    /// Ignore earlier squads and select from scratch
    #[arg(short, long)]
    wildcard: bool,

    /// Directory holding config/ and defaults/ (defaults to the current directory)
    #[arg(short = 'c', long = "config", value_name = "DIR")]
    base_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Gaffer starting up");

    // 2. Parse arguments
    let args = Args::parse();

    // 3. Load config
    let base_dir = match args.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let config = config::load_config(&base_dir).context("failed to load configuration")?;
    info!(
        "Config loaded: budget {}, max {} per club, {} free transfers",
        config.squad.budget, config.squad.max_per_club, config.transfers.free_transfers
    );

    // 4. Open the snapshot store
    let db_path = base_dir.join(&config.db_path);
    let db_path = db_path.to_string_lossy();
    let store = SnapshotStore::open(&db_path).context("failed to open database")?;
    info!("Database opened at {db_path}");

    // Default to the gameweek after the latest saved one.
    let gameweek = match args.gameweek {
        Some(gw) => gw,
        None => store
            .latest_before(u32::MAX)?
            .map_or(1, |snap| snap.gameweek + 1),
    };

    // 5. Run
    let report = match pipeline::run_gameweek(&config, &base_dir, &store, gameweek, args.wildcard).await {
        Ok(report) => report,
        Err(e) => {
            error!("Gameweek {gameweek} failed: {e:#}");
            return Err(e);
        }
    };

    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    println!("{json}");

    info!("Gaffer finished gameweek {gameweek}");
    Ok(())
}

/// Initialize the tracing subscriber, writing to logs/gaffer.log.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("gaffer.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gaffer_app=info,gaffer_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
