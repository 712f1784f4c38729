//! rekal — append-only, git-transported memory for AI coding sessions.

use clap::{CommandFactory, Parser, Subcommand};
use rekal_cli::commands;
use tracing_subscriber::EnvFilter;

use rekal_search::RecallFilters;

#[derive(Parser)]
#[command(name = "rekal")]
#[command(about = "Rekal gives your agent precise memory of past coding sessions")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Filter by file path (regex)
    #[arg(long)]
    file: Option<String>,

    /// Filter by git commit SHA prefix
    #[arg(long)]
    commit: Option<String>,

    /// Filter by author email
    #[arg(long)]
    author: Option<String>,

    /// Filter by actor type (human|agent)
    #[arg(long)]
    actor: Option<String>,

    /// Max results (0 = default)
    #[arg(short = 'n', long, default_value_t = 0)]
    limit: usize,

    /// Search query
    query: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize rekal in the current git repository
    Init,
    /// Remove rekal setup from this repository (local only)
    Clean,
    /// Capture the current session after a commit
    Checkpoint,
    /// Export new checkpoints and push to the remote branch
    Push {
        /// Overwrite the remote branch with local data
        #[arg(short, long)]
        force: bool,
    },
    /// Sync team context from remote rekal branches
    Sync {
        /// Only fetch your own rekal branch (not the whole team)
        #[arg(long = "self")]
        self_only: bool,
    },
    /// Rebuild the index store from the data store
    Index,
    /// Show recent checkpoints
    Log {
        /// Max entries to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Run raw SQL or drill into a session
    Query {
        /// A read-only SELECT statement
        sql: Option<String>,
        /// Run against the index store instead of the data store
        #[arg(long)]
        index: bool,
        /// Show a session conversation by id
        #[arg(long)]
        session: Option<String>,
        /// Include tool calls and files in session output
        #[arg(long)]
        full: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("rekal: {err:#}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Init) => commands::init::run(),
        Some(Commands::Clean) => commands::clean::run(),
        Some(Commands::Checkpoint) => commands::checkpoint::run(),
        Some(Commands::Push { force }) => commands::push::run(force),
        Some(Commands::Sync { self_only }) => commands::sync::run(self_only),
        Some(Commands::Index) => commands::index_cmd::run(),
        Some(Commands::Log { limit }) => commands::log::run(limit),
        Some(Commands::Query {
            sql,
            index,
            session,
            full,
        }) => commands::query::run(sql, index, session, full),
        None => {
            let filters = RecallFilters {
                query: cli.query.join(" "),
                file: cli.file.unwrap_or_default(),
                commit: cli.commit.unwrap_or_default(),
                author: cli.author.unwrap_or_default(),
                actor: cli.actor.unwrap_or_default(),
                limit: cli.limit,
            };

            // Bare invocation with nothing to search for: show help.
            if filters.query.is_empty()
                && filters.file.is_empty()
                && filters.commit.is_empty()
                && filters.author.is_empty()
                && filters.actor.is_empty()
            {
                Cli::command().print_help()?;
                return Ok(());
            }

            commands::recall::run(filters)
        }
    }
}
