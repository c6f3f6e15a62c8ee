use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use threadline::cli::{feeds, replay, resolutions, sessions, show};
use threadline::config::Config;
use threadline::feed::FeedRegistry;
use threadline::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Reconcile live and logged conversation messages into an ordered transcript")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "threadline.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured feeds
    Feeds,

    /// Discover sessions and show stored replay state
    Sessions {
        /// Only sessions from this feed (e.g. claude:ClaudeCode)
        #[arg(short, long)]
        feed: Option<String>,
    },

    /// Replay a session from its feed and store the snapshot
    Replay {
        /// Session ID (or prefix)
        session: String,

        /// Ignore the stored snapshot and start from the beginning
        #[arg(long)]
        fresh: bool,

        /// Show full content instead of previews
        #[arg(long)]
        full: bool,

        /// Print render items as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show render items from the stored snapshot
    Show {
        /// Session ID (or prefix)
        session: String,

        /// Show full content instead of previews
        #[arg(long)]
        full: bool,

        /// Print render items as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the temporary id resolutions of a session
    Resolutions {
        /// Session ID (or prefix)
        session: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize store
    let store = SnapshotStore::open(&config.database_path())?;

    // Initialize feed registry
    let registry = FeedRegistry::new(&config);

    match cli.command {
        Commands::Feeds => {
            feeds::run(&config, &registry)?;
        }
        Commands::Sessions { feed } => {
            sessions::run(&store, &registry, feed)?;
        }
        Commands::Replay {
            session,
            fresh,
            full,
            json,
        } => {
            replay::run(&store, &registry, &session, fresh, full, json)?;
        }
        Commands::Show {
            session,
            full,
            json,
        } => {
            show::run(&store, &session, full, json)?;
        }
        Commands::Resolutions { session } => {
            resolutions::run(&store, &session)?;
        }
    }

    Ok(())
}
