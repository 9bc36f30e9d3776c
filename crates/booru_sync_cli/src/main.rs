//! booru-sync CLI - reconcile a local post mirror with the remote API.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use booru_sync::IdRange;

#[derive(Parser)]
#[command(name = "booru-sync")]
#[command(version)]
#[command(about = "Reconcile a local image-board mirror with the remote API")]
#[command(
    long_about = "booru-sync compares every post in a local mirror database with the \
remote API, records the differences in an append-only cache, and optionally patches \
the mirror so scalar fields and tag sets match the remote again."
)]
#[command(after_long_help = r#"EXAMPLES
    Record drift for every local post without changing anything:
        $ booru-sync reconcile --all

    Patch posts 1000 through 2000 with 10 workers:
        $ booru-sync reconcile --start-idx 1000 --end-idx 2000 --threads 10 --submit

    Apply the drift recorded by an earlier dry run:
        $ booru-sync commit

    Export posts as JSON documents:
        $ booru-sync export --output ./dump

    Generate shell completions:
        $ booru-sync completions bash > ~/.local/share/bash-completion/completions/booru-sync

CONFIGURATION
    booru-sync reads configuration from:
      1. ~/.config/booru-sync/config.toml (or $XDG_CONFIG_HOME/booru-sync/config.toml)
      2. ./booru-sync.toml
      3. Environment variables (BOORU_SYNC_* prefix, e.g., BOORU_SYNC_DATABASE_URL)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    BOORU_SYNC_DATABASE_URL   Database connection string (default: ~/.local/state/booru-sync/booru-sync.db)
    RUST_LOG                  Log filter (default: booru_sync=info,booru_sync_cli=info)
"#)]
struct Cli {
    /// Write log events to this file
    #[arg(long, global = true)]
    logging_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff local posts against the remote and optionally patch drift
    Reconcile(ReconcileArgs),
    /// Apply the drift recorded in the difference cache without refetching
    Commit {
        #[command(flatten)]
        cache: CacheOptions,
    },
    /// Write local posts as JSON documents
    Export {
        #[command(flatten)]
        range: RangeOptions,

        /// Output directory; files land in <OUTPUT>/posts/<id>.json
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

/// Which local post ids to visit.
#[derive(Debug, Clone, Default, clap::Args)]
struct RangeOptions {
    /// Visit every local post
    #[arg(long, conflicts_with_all = ["start_idx", "end_idx"])]
    all: bool,

    /// First post id (inclusive, default 0)
    #[arg(long)]
    start_idx: Option<i64>,

    /// Last post id (inclusive, default unbounded)
    #[arg(long)]
    end_idx: Option<i64>,
}

impl RangeOptions {
    fn id_range(&self) -> IdRange {
        if self.all {
            IdRange::all()
        } else {
            IdRange::new(self.start_idx.unwrap_or(0), self.end_idx)
        }
    }
}

/// Journal file overrides. Relative paths resolve against `[cache] dir`.
#[derive(Debug, Clone, Default, clap::Args)]
struct CacheOptions {
    /// Difference cache journal
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Patch-state journal
    #[arg(long)]
    patch_state_file: Option<PathBuf>,

    /// Tag-creation journal
    #[arg(long)]
    tag_creation_file: Option<PathBuf>,
}

/// Proxy rotation flags.
#[derive(Debug, Clone, Default, clap::Args)]
struct ProxyOptions {
    /// Route requests through a rotating proxy pool
    #[arg(long)]
    proxy: bool,

    /// Local proxy list, one proxy per line (implies --proxy)
    #[arg(long)]
    proxy_file: Option<PathBuf>,

    /// URL of a raw proxy list; `*` is replaced by `http` (implies --proxy)
    #[arg(long, conflicts_with = "proxy_file")]
    proxy_address: Option<String>,

    /// Proxy credentials as user:password
    #[arg(long)]
    proxy_auth: Option<String>,
}

#[derive(Debug, Clone, clap::Args)]
struct ReconcileArgs {
    #[command(flatten)]
    range: RangeOptions,

    /// Number of posts diffed concurrently (default from config or 5)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Patch drift into the local store (default: only record it)
    #[arg(short = 's', long)]
    submit: bool,

    /// Retry budget per post (default from config or 5)
    #[arg(short = 'r', long)]
    retry: Option<usize>,

    /// Visit posts in random order
    #[arg(long)]
    shuffle: bool,

    /// Remote base URL (default from config)
    #[arg(long)]
    base_url: Option<String>,

    /// Response cache journal keyed by request URL
    #[arg(long)]
    requests_cache: Option<PathBuf>,

    #[command(flatten)]
    proxy: ProxyOptions,

    #[command(flatten)]
    cache: CacheOptions,
}

/// Install the tracing subscriber.
///
/// With a log file every event goes there. Otherwise the subscriber is only
/// installed when stdout is not a TTY; interactive runs get progress bars.
fn init_logging(logging_file: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = || match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("booru_sync=info,booru_sync_cli=info"),
    };

    match logging_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .init();
        }
        None if !Term::stdout().is_term() => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
        }
        None => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Set up graceful shutdown handler (Ctrl+C)
    shutdown::setup_shutdown_handler();

    let cli = Cli::parse();

    // Handle commands that don't require configuration or database access first
    match &cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(*shell)?;
            return Ok(());
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.clone())?;
            return Ok(());
        }
        _ => {}
    }

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let logging_file = cli.logging_file.clone().or_else(|| config.logging.file.clone());
    init_logging(logging_file.as_ref())?;

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set BOORU_SYNC_DATABASE_URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        // Warn if using a relative path (can cause issues depending on cwd)
        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Reconcile(args) => {
            commands::reconcile::handle_reconcile(args, &config, &database_url).await?;
        }
        Commands::Commit { cache } => {
            commands::commit::handle_commit(cache, &config, &database_url).await?;
        }
        Commands::Export { range, output } => {
            commands::export::handle_export(range.id_range(), output, &database_url).await?;
        }
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
