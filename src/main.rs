//! # Code Harness CLI (`chx`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx init` | Create the SQLite database and run schema migrations |
//! | `chx repo add <name> <path>` | Register a repository and index it |
//! | `chx repo remove <id>` | Deregister a repository and drop its chunks |
//! | `chx repo list` | List repositories with status and counts |
//! | `chx repo reindex <id>` | Full reindex of one repository |
//! | `chx search "<query>"` | Hybrid search across repositories |
//! | `chx get <chunk-id>` | Print one chunk |
//! | `chx watch [ids...]` | Watch for changes and reindex, until Ctrl-C |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `code_harness=info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use code_harness::progress::ProgressMode;
use code_harness::{config, db, get, migrate, repo_cmd, search, Engine};
use code_harness_core::models::{AccessGroup, AccessRule, Role};
use code_harness_core::search::SearchOptions;

/// Code Harness CLI: index local codebases and search them.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Code Harness: local codebase indexing with hybrid semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chx.toml")]
    config: PathBuf,

    /// Bearer token resolved against `[[auth.tokens]]`. Omit for local ADMIN.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Act as the local user with a lower role (viewer, developer).
    #[arg(long, global = true)]
    role: Option<Role>,

    /// Progress on stderr: `off`, `human`, or `json`. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage registered repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Search indexed chunks.
    Search {
        query: String,

        /// Restrict to these repository ids (repeatable).
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Lexical search only.
        #[arg(long)]
        no_hybrid: bool,

        /// Skip the reranker even when one is configured.
        #[arg(long)]
        no_rerank: bool,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a chunk by id.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Reindex and watch repositories until interrupted.
    Watch {
        /// Repository ids; all when omitted.
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register a repository root.
    Add {
        name: String,
        path: PathBuf,

        /// Ignore glob (repeatable). Replaces the configured default set.
        #[arg(long)]
        ignore: Vec<String>,

        /// Access rule as `PATTERN=GROUP` (repeatable, first match wins).
        #[arg(long = "access", value_parser = repo_cmd::parse_access_rule)]
        access: Vec<AccessRule>,

        /// Group for paths no rule matches.
        #[arg(long, default_value = "public")]
        default_access: AccessGroup,

        /// Register without indexing.
        #[arg(long)]
        no_index: bool,
    },
    /// Deregister a repository and delete its chunks.
    Remove { id: String },
    /// List repositories.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Full reindex of one repository.
    Reindex { id: String },
}

fn progress_mode(arg: Option<&str>) -> anyhow::Result<ProgressMode> {
    match arg {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = progress_mode(cli.progress.as_deref())?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::open(cfg).await?;
    let mut principal = engine.resolve(cli.token.as_deref())?;
    if let Some(role) = cli.role {
        // Only narrows; a token's role is never raised.
        if role_rank(role) < role_rank(principal.role) {
            principal.role = role;
        }
    }

    match cli.command {
        Commands::Init => {}
        Commands::Repo { action } => match action {
            RepoAction::Add {
                name,
                path,
                ignore,
                access,
                default_access,
                no_index,
            } => {
                repo_cmd::run_add(
                    &engine,
                    &principal,
                    &name,
                    &path,
                    ignore,
                    access,
                    default_access,
                    no_index,
                    progress,
                )
                .await?;
            }
            RepoAction::Remove { id } => repo_cmd::run_remove(&engine, &id).await?,
            RepoAction::List { json } => repo_cmd::run_list(&engine, json).await?,
            RepoAction::Reindex { id } => {
                repo_cmd::run_reindex(&engine, &principal, &id, progress).await?
            }
        },
        Commands::Search {
            query,
            repos,
            no_hybrid,
            no_rerank,
            limit,
            json,
        } => {
            let options = SearchOptions {
                use_hybrid: !no_hybrid,
                use_rerank: !no_rerank,
                limit,
            };
            search::run_search(&engine, &principal, &query, repos, options, json).await?;
        }
        Commands::Get { id, json } => get::run_get(&engine, &principal, &id, json).await?,
        Commands::Watch { ids } => repo_cmd::run_watch(&engine, &principal, ids, progress).await?,
    }

    Ok(())
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Viewer => 0,
        Role::Developer => 1,
        Role::Admin => 2,
    }
}
