//! rewatch - rebuild watch-behavior statistics from a media server
//!
//! One-shot batch driver for the refresh pipeline: back up the database,
//! sync the library catalog, pull every user's playback history, and rebuild
//! raw events, sessions, and per-(user, item) statistics.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/rewatch/watch.db (~/.local/share/rewatch/watch.db)
//! - Logs: $XDG_STATE_HOME/rewatch/rewatch.log (~/.local/state/rewatch/rewatch.log)
//! - Config: $XDG_CONFIG_HOME/rewatch/config.toml (~/.config/rewatch/config.toml)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use rewatch_core::catalog::sync_catalog;
use rewatch_core::db::backup_database;
use rewatch_core::source::{MediaServerClient, StaticEvents};
use rewatch_core::types::UserWatchHistory;
use rewatch_core::{Config, Database, RefreshCoordinator};

#[derive(Parser)]
#[command(name = "rewatch")]
#[command(about = "Rebuild watch-behavior statistics from a media server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full refresh: catalog, raw events, sessions, stats, ratios
    Refresh {
        /// Skip the catalog sync (fallback thresholds apply to new items)
        #[arg(long)]
        skip_catalog: bool,

        /// Skip the pre-refresh database backup
        #[arg(long)]
        no_backup: bool,

        /// Days of history to request, overriding the configured lookback
        #[arg(long)]
        lookback_days: Option<u32>,
    },

    /// Back up the database file and exit
    Backup,

    /// Show the highest-adherence (user, item) pairs
    Top {
        /// Number of rows to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    // Logging goes to the state-dir file; stdout stays for the summaries
    let _log_guard =
        rewatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("rewatch starting");

    match cli.command {
        Command::Refresh {
            skip_catalog,
            no_backup,
            lookback_days,
        } => run_refresh(&config, skip_catalog, no_backup, lookback_days),
        Command::Backup => run_backup(),
        Command::Top { limit } => run_top(limit),
    }
}

fn run_refresh(
    config: &Config,
    skip_catalog: bool,
    no_backup: bool,
    lookback_days: Option<u32>,
) -> Result<()> {
    let db_path = Config::database_path();

    if !no_backup && db_path.exists() {
        let backup = backup_database(&db_path, &Config::backup_dir())
            .context("failed to back up database")?;
        println!("Backup: {}", backup.display());
    }

    println!("Database: {}", db_path.display());
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let client = MediaServerClient::new(config.server.clone())
        .context("media server is not configured; set [server] in config.toml")?;
    client.ping().context("media server is unreachable")?;

    if skip_catalog {
        println!("Catalog sync: skipped");
    } else {
        let result = sync_catalog(&db, &client).context("catalog sync failed")?;
        println!(
            "Catalog: {} item(s) synced, {} pruned",
            result.upserted, result.pruned
        );
    }

    let lookback = lookback_days.unwrap_or(config.server.lookback_days);
    let history = fetch_history_with_progress(&client, lookback)?;

    let coordinator = RefreshCoordinator::new(db, config.engine.clone());
    let summary = coordinator
        .run_full(&StaticEvents::new(history), lookback)
        .context("refresh failed; re-run after fixing the cause")?;

    println!("\nRefresh complete:");
    println!(
        "  Raw events: {} inserted ({} duplicates ignored, {} timezone-corrected)",
        summary.events_inserted, summary.duplicate_events, summary.events_shifted
    );
    println!(
        "  Sessions:   {} built ({} without catalog runtime)",
        summary.sessions_built, summary.fallback_sessions
    );
    println!(
        "    completed {}, partial {}, sampled {}, abandoned {}, unknown {}",
        summary.outcomes.completed,
        summary.outcomes.partial,
        summary.outcomes.sampled,
        summary.outcomes.abandoned,
        summary.outcomes.unknown
    );
    println!("  Stats:      {} user-item row(s)", summary.stat_rows);
    println!("  Ratios:     {} session(s) refreshed", summary.ratios_refreshed);

    tracing::info!(
        events = summary.events_inserted,
        sessions = summary.sessions_built,
        stats = summary.stat_rows,
        "Refresh complete"
    );

    Ok(())
}

/// Fetch per-user history with a progress bar, reusing the same source
/// interface the engine consumes.
fn fetch_history_with_progress(
    client: &MediaServerClient,
    lookback_days: u32,
) -> Result<UserWatchHistory> {
    let users = client.list_users().context("failed to list users")?;
    println!("Fetching {} day(s) of history for {} user(s)", lookback_days, users.len());

    let bar = ProgressBar::new(users.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("  [{bar:30}] {pos}/{len} {msg}")
            .expect("static template is valid")
            .progress_chars("=> "),
    );

    let mut history = UserWatchHistory::new();
    for (name, id) in users {
        bar.set_message(name.clone());
        let events = client
            .user_watch_history(&id, lookback_days, false)
            .with_context(|| format!("failed to fetch history for {}", name))?;
        history.insert(name, events);
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(history)
}

fn run_backup() -> Result<()> {
    let db_path = Config::database_path();
    let backup =
        backup_database(&db_path, &Config::backup_dir()).context("failed to back up database")?;
    println!("Backup: {}", backup.display());
    Ok(())
}

fn run_top(limit: usize) -> Result<()> {
    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let stats = db
        .top_stats_by_adherence(limit)
        .context("failed to query statistics")?;

    if stats.is_empty() {
        println!("No statistics yet - run `rewatch refresh` first");
        return Ok(());
    }

    println!(
        "{:<16} {:<12} {:>8} {:>10} {:>8} {:>9}",
        "user", "item", "sessions", "minutes", "best", "adherence"
    );
    for stat in stats {
        println!(
            "{:<16} {:<12} {:>8} {:>10.1} {:>8} {:>9.3}",
            stat.user_id,
            stat.item_id,
            stat.total_sessions,
            stat.total_minutes_watched,
            stat.best_completion_ratio
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "-".to_string()),
            stat.adherence_score
        );
    }

    Ok(())
}
