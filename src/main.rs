use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rumpbot_lib::config;
use rumpbot_lib::events::StatusEmitter;
use rumpbot_lib::invocations::InvocationLog;
use rumpbot_lib::memory::MemoryStore;
use rumpbot_lib::runtime::Runtime;
use rumpbot_lib::types::NoteSource;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rumpbot")]
#[command(about = "Chat-driven agent orchestration runtime for the Claude CLI")]
#[command(version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one chat message through the full pipeline
    Send {
        /// Chat identifier (session and memory are keyed by it)
        chat_id: String,
        /// The message text
        message: Vec<String>,
        /// Working directory handed to workers (defaults to the current dir)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// List or add memory notes for a chat
    Memory {
        /// Chat identifier
        chat_id: String,
        /// Add a note instead of listing
        #[arg(long)]
        add: Option<String>,
    },

    /// Show invocation-log aggregates
    Usage {
        /// How many days of per-day rollups to show
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red());
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Send {
            chat_id,
            message,
            cwd,
        } => send(config, chat_id, message.join(" "), cwd).await,
        Commands::Memory { chat_id, add } => memory(config, chat_id, add).await,
        Commands::Usage { days } => usage(config, days),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", "Error:".red());
        std::process::exit(1);
    }
}

async fn send(
    config: config::RumpbotConfig,
    chat_id: String,
    message: String,
    cwd: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cwd = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let runtime = Arc::new(Runtime::new(config).await?);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Cancelling...".yellow());
            ctrl_c_cancel.cancel();
        }
    });

    // Out-of-band control: `kill <n>` / `retry <n>` lines on stdin act on
    // the running orchestration.
    spawn_control_loop(runtime.clone(), chat_id.clone());

    let status = StatusEmitter::new(Arc::new(|update| {
        if update.important {
            println!("{} {}", "»".yellow().bold(), update.message.bold());
        } else {
            println!("  {}", update.message.dimmed());
        }
    }));

    let outcome = runtime
        .handle_message(&chat_id, &message, &cwd, status, cancel)
        .await?;

    println!("\n{}", outcome.chat_text);
    if let Some(summary) = outcome.summary {
        let headline = if summary.overall_success {
            summary.headline().green().to_string()
        } else {
            summary.headline().red().to_string()
        };
        println!("\n{headline}");
        println!("{}", summary.summary);
        if summary.needs_restart {
            println!("{}", "A service restart looks necessary.".yellow());
        }
    }
    Ok(())
}

fn spawn_control_loop(runtime: Arc<Runtime>, chat_id: String) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next().and_then(|n| n.parse::<usize>().ok())) {
                (Some("kill"), Some(number)) => {
                    if runtime.kill_worker(&chat_id, number) {
                        println!("{}", format!("killed worker #{number}").yellow());
                    } else {
                        println!("{}", format!("no running worker #{number}").dimmed());
                    }
                }
                (Some("retry"), Some(number)) => {
                    if runtime.retry_worker(&chat_id, number) {
                        println!("{}", format!("requested retry of worker #{number}").yellow());
                    } else {
                        println!("{}", format!("no orchestration to retry #{number}").dimmed());
                    }
                }
                _ => {}
            }
        }
    });
}

async fn memory(
    config: config::RumpbotConfig,
    chat_id: String,
    add: Option<String>,
) -> anyhow::Result<()> {
    let store = MemoryStore::load(config.memory_path()).await?;
    if let Some(text) = add {
        match store.add(&chat_id, &text, NoteSource::Manual).await {
            Some(note) => {
                store.save().await?;
                println!("Added note {}", note.id.dimmed());
            }
            None => println!("{}", "Empty note ignored".dimmed()),
        }
        return Ok(());
    }

    let notes = store.notes(&chat_id).await;
    if notes.is_empty() {
        println!("No memory notes for chat {chat_id}");
        return Ok(());
    }
    for note in notes {
        let source = match note.source {
            NoteSource::Auto => "auto",
            NoteSource::Manual => "manual",
        };
        println!(
            "{} [{}] {}",
            note.created_at.format("%Y-%m-%d").to_string().dimmed(),
            source.dimmed(),
            note.text
        );
    }
    Ok(())
}

fn usage(config: config::RumpbotConfig, days: usize) -> anyhow::Result<()> {
    let log = InvocationLog::new(config.invocations_path());
    let totals = log.totals()?;
    println!("{}", "Totals".bold());
    println!(
        "  {} invocations ({} errors), ${:.4}, {} input / {} output tokens",
        totals.invocations,
        totals.errors,
        totals.cost_usd,
        totals.input_tokens,
        totals.output_tokens
    );

    let daily = log.daily(days)?;
    if !daily.is_empty() {
        println!("{}", format!("Last {days} day(s)").bold());
        for (date, day) in daily {
            println!(
                "  {date}  {} calls  ${:.4}",
                day.invocations, day.cost_usd
            );
        }
    }
    Ok(())
}
