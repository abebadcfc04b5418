//! # RAG Client CLI (`rag`)
//!
//! The `rag` binary signs in to the question-answering backend, asks
//! questions, browses past answers and rates them.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag login --email <email>` | Sign in and save the session |
//! | `rag logout` | Sign out and remove the saved session |
//! | `rag whoami` | Show the signed-in user |
//! | `rag search "<question>"` | Ask a question |
//! | `rag history` | List past questions, newest first |
//! | `rag feedback <query_id> --rating <1-5>` | Rate an answer |
//! | `rag health` | Check backend status |
//!
//! Set `RUST_LOG=rag_client=debug` to see request logs on stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rag_client::commands;
use rag_client::config;
use rag_client::models::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use rag_client::RagClient;
use tracing_subscriber::{fmt, EnvFilter};

/// RAG Client CLI: ask the internal knowledge base questions from the
/// terminal.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Client: query the internal knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`. A missing file means built-in
    /// defaults. `RAG_API_URL` overrides `[api].base_url`.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and save the session.
    ///
    /// Prompts for the password on stdin when `--password` is omitted.
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: Option<String>,
    },

    /// Sign out. The local session is removed even if the backend is
    /// unreachable.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// Ask a question (5 to 200 characters).
    Search {
        query: String,

        /// Maximum number of source passages.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List past questions and answers.
    History {
        #[arg(long, default_value_t = DEFAULT_PAGE)]
        page: u32,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },

    /// Rate an answer.
    Feedback {
        /// The `query_id` printed by `rag search` or `rag history`.
        query_id: String,

        /// Rating from 1 to 5.
        #[arg(long)]
        rating: u8,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Check backend status.
    Health {
        /// Keep polling at `[health].poll_interval_secs` until Ctrl-C.
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", commands::describe_error(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let client = RagClient::from_config(&cfg)?;
    let (_, _listener) = client.init()?;

    match cli.command {
        Commands::Login { email, password } => {
            commands::run_login(&client, &email, password).await?;
        }
        Commands::Logout => {
            commands::run_logout(&client).await?;
        }
        Commands::Whoami => {
            commands::run_whoami(&client)?;
        }
        Commands::Search { query, limit } => {
            commands::run_search(&client, &query, limit).await?;
        }
        Commands::History { page, page_size } => {
            commands::run_history(&client, page, page_size).await?;
        }
        Commands::Feedback {
            query_id,
            rating,
            comment,
        } => {
            commands::run_feedback(&client, &query_id, rating, comment).await?;
        }
        Commands::Health { watch } => {
            commands::run_health(&client, watch).await?;
        }
    }

    Ok(())
}
