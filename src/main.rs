use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};

use lockstep::model::Document;
use lockstep::session::SessionCode;
use lockstep::storage::Store;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(
    about = "Server-ordered state synchronization over WebSockets with git-backed snapshot history",
    version
)]
#[command(after_help = "Sessions:
- Any number of clients share one session over ws://host:port/<code>
- The server applies and rebroadcasts mutations in one total order
- After every effective mutation the full snapshot is committed to git,
  so `lockstep log <code>` is the change history of a session

A session must be provisioned with `lockstep new <code>` before clients
can connect; unknown codes are refused.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data root
    Init {
        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Provision a new session with empty state
    New {
        /// Session code, one or more of [A-Za-z0-9_-]
        code: String,

        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Serve sessions over WebSocket
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Show the mutation history of a session
    Log {
        code: String,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },

    /// Print the current snapshot of a session
    Show {
        code: String,

        #[arg(short, long, default_value = "data")]
        data: PathBuf,
    },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 10)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lockstep=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data } => {
            println!("{}", "🚀 Initializing data root...".cyan().bold());
            Store::init(&data)?;
            println!(
                "{} Data root ready at {}",
                "✓".green(),
                data.display().to_string().bright_white()
            );
            println!("\n{}", "Next steps:".yellow());
            println!(
                "  1. {} - Provision a session",
                "lockstep new <code>".bright_white()
            );
            println!("  2. {} - Serve it", "lockstep serve".bright_white());
        }

        Commands::New { code, data } => {
            let code: SessionCode = code.parse()?;
            let store = open_store(&data)?;
            let id = store.create::<Document>(&code)?;
            println!(
                "{} Created session {} ({})",
                "✓".green(),
                code.to_string().bright_yellow(),
                short(&id).bright_black()
            );
            println!(
                "  Connect at {}",
                format!("ws://<host>:<port>/{code}").bright_blue()
            );
        }

        Commands::Serve { port, bind, data } => {
            println!(
                "{}",
                format!("🌐 Serving sessions from {} on port {}...", data.display(), port)
                    .cyan()
                    .bold()
            );
            lockstep::serve::<Document>(port, &bind, &data).await?;
        }

        Commands::Log { code, limit, data } => {
            let code: SessionCode = code.parse()?;
            let store = open_store(&data)?;
            let entries = store.entries(&code, limit.unwrap_or(50))?;

            println!("{}", format!("History of {}", code).cyan().bold());
            if let Some(latest) = store.latest() {
                println!("{}", format!("HEAD {}", short(&latest)).bright_black());
            }
            println!("{}", "═".repeat(60).bright_black());

            if entries.is_empty() {
                println!("{}", "no commits touch this session".bright_black());
            }
            for entry in entries {
                let time = chrono::DateTime::from_timestamp(entry.seconds, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| entry.seconds.to_string());
                let mut lines = entry.message.lines();
                let name = lines.next().unwrap_or("");
                let args = lines.nth(1).unwrap_or("");
                println!(
                    "{} {} {} {}",
                    format!("[{}]", time).bright_black(),
                    short(&entry.id).bright_yellow(),
                    name.bold(),
                    args.bright_black()
                );
            }
        }

        Commands::Show { code, data } => {
            let code: SessionCode = code.parse()?;
            let store = open_store(&data)?;
            let contents = tokio::fs::read_to_string(store.snapshot_path(&code))
                .await
                .with_context(|| format!("no snapshot for session {code}"))?;
            println!("{contents}");
        }
    }

    Ok(())
}

fn open_store(data: &Path) -> Result<Store> {
    Store::open(data).with_context(|| {
        format!(
            "no data root at {}; run `lockstep init` first",
            data.display()
        )
    })
}

fn short(id: &git2::Oid) -> String {
    id.to_string().chars().take(7).collect()
}
