//! Session Lens - browse and watch AI coding tool sessions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use session_lens::config::{ConfigLoader, EngineConfig};
use session_lens::model::{sort_recent_first, Message, SessionSummary, SourceKind, UsageStats};
use session_lens::sources::{adapter_for, all_adapters, SourceAdapter, SourceError};
use session_lens::watcher::WatcherManager;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Claude,
    Codex,
    Gemini,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Claude => SourceKind::ClaudeCode,
            SourceArg::Codex => SourceKind::Codex,
            SourceArg::Gemini => SourceKind::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "session-lens",
    about = "Browse and watch AI coding tool sessions",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file path (defaults to .session-lens.toml, then the user
    /// config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions for a project, most recent first.
    List {
        /// Project root (defaults to the current directory; use / for all).
        #[arg(short, long)]
        project: Option<PathBuf>,
        /// Restrict to one source.
        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show the conversation of a session.
    Show {
        session_id: String,
        /// Source to look in (searched in all when omitted).
        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,
        #[arg(long)]
        json: bool,
    },
    /// Token usage and estimated cost of a session.
    Usage {
        session_id: String,
        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,
        #[arg(long)]
        json: bool,
    },
    /// Watch sessions and print change events as they happen.
    Watch {
        #[arg(short, long)]
        project: Option<PathBuf>,
        #[arg(short, long, value_enum)]
        source: Option<SourceArg>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let loader = match cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;

    match cli.command {
        Commands::List {
            project,
            source,
            json,
        } => {
            let root = project_root(project)?;
            let adapters = build_adapters(source, &config)?;
            let mut summaries = Vec::new();
            for adapter in &adapters {
                summaries.extend(adapter.sessions(&root)?);
            }
            sort_recent_first(&mut summaries);
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_session_table(&summaries);
            }
        }
        Commands::Show {
            session_id,
            source,
            json,
        } => {
            let adapters = build_adapters(source, &config)?;
            let adapter = adapter_with_session(&adapters, &session_id)?;
            let messages = adapter.messages(&session_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                print_conversation(&messages);
            }
        }
        Commands::Usage {
            session_id,
            source,
            json,
        } => {
            let adapters = build_adapters(source, &config)?;
            let adapter = adapter_with_session(&adapters, &session_id)?;
            let usage = adapter.usage(&session_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else {
                print_usage(&usage);
            }
        }
        Commands::Watch { project, source } => {
            let root = project_root(project)?;
            let adapters = build_adapters(source, &config)?;
            watch_loop(&adapters, &root, &config).await;
        }
    }

    Ok(())
}

fn project_root(arg: Option<PathBuf>) -> std::io::Result<PathBuf> {
    match arg {
        Some(path) => Ok(path),
        None => std::env::current_dir(),
    }
}

fn build_adapters(
    source: Option<SourceArg>,
    config: &EngineConfig,
) -> Result<Vec<Box<dyn SourceAdapter>>, SourceError> {
    match source {
        Some(arg) => Ok(vec![adapter_for(arg.into(), config)?]),
        None => all_adapters(config),
    }
}

/// Pick the adapter that knows a session, erroring with the not-found it
/// would itself report.
fn adapter_with_session<'a>(
    adapters: &'a [Box<dyn SourceAdapter>],
    session_id: &str,
) -> Result<&'a dyn SourceAdapter, SourceError> {
    for adapter in adapters {
        if matches!(adapter.session_by_id(session_id), Ok(Some(_))) {
            return Ok(adapter.as_ref());
        }
    }
    Err(SourceError::SessionNotFound(session_id.to_string()))
}

fn print_session_table(summaries: &[SessionSummary]) {
    if summaries.is_empty() {
        println!("No sessions found.");
        return;
    }
    println!(
        "{:<12} {:<36} {:>6} {:>10} {:>9}  {:<16} {}",
        "SOURCE", "SESSION", "MSGS", "TOKENS", "COST", "LAST ACTIVITY", "FIRST MESSAGE"
    );
    for summary in summaries {
        let meta = &summary.metadata;
        let last = meta
            .last_timestamp
            .map_or_else(|| "-".to_string(), |ts| ts.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<12} {:<36} {:>6} {:>10} {:>9}  {:<16} {}",
            meta.source.to_string(),
            meta.session_id,
            meta.message_count,
            meta.usage.total(),
            format!("${:.4}", meta.estimated_cost),
            last,
            meta.first_user_excerpt.as_deref().unwrap_or(""),
        );
    }
}

fn print_conversation(messages: &[Message]) {
    for message in messages {
        let when = message
            .timestamp
            .map_or_else(String::new, |ts| format!(" [{}]", ts.format("%H:%M:%S")));
        println!("{:?}{}: {}", message.role, when, message.text);
        for call in &message.tool_calls {
            let status = match (&call.result, call.is_error) {
                (None, _) => "pending",
                (Some(_), true) => "error",
                (Some(_), false) => "ok",
            };
            println!("  [tool {} {}] {}", call.name, status, call.call_id);
        }
    }
}

fn print_usage(usage: &UsageStats) {
    println!(
        "messages: {} ({} user, {} assistant), tool calls: {}",
        usage.message_count, usage.user_messages, usage.assistant_messages, usage.tool_calls
    );
    println!(
        "tokens: {} in, {} out, {} cache-read, {} cache-write",
        usage.tokens.input, usage.tokens.output, usage.tokens.cache_read, usage.tokens.cache_creation
    );
    for (model, tokens) in &usage.per_model {
        println!("  {model}: {} in, {} out", tokens.input, tokens.output);
    }
    println!("estimated cost: ${:.4}", usage.estimated_cost);
}

async fn watch_loop(adapters: &[Box<dyn SourceAdapter>], root: &std::path::Path, config: &EngineConfig) {
    let mut manager = WatcherManager::start(adapters, root, config);
    let Some(mut events) = manager.take_events() else {
        return;
    };
    println!("Watching {} (ctrl-c to stop)", root.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => {
                    println!("{} {} {}", event.source, event.kind, event.session_id);
                }
                None => break,
            },
        }
    }

    manager.shutdown().await;
    let dropped = manager.dropped_events();
    if dropped > 0 {
        tracing::warn!(dropped, "Change events dropped under backpressure");
    }
}
