//! Command-line interface for inspecting stored sessions and context budgets.

use crate::compaction::{ContextProfiles, TokenCounter};
use crate::config::Config;
use crate::conversation::{ConversationItem, Role};
use crate::session::{SessionStore, SessionSummary};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

/// Conversation store and context budget tools
#[derive(Parser, Debug)]
#[command(name = "tack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Session store file (overrides config and TACK_SESSION_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub session_path: Option<PathBuf>,

    /// Config file to load instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect or modify stored sessions
    Sessions(SessionsArgs),
    /// Show a session's token estimate against a model's budget
    Budget(BudgetArgs),
    /// Show resolved configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub action: SessionsAction,
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List sessions, most recently updated first
    List {
        #[arg(short = 'o', long, default_value = "text", value_enum)]
        output_format: OutputFormat,
    },
    /// Print a session's items
    Show {
        id: String,
        #[arg(short = 'o', long, default_value = "text", value_enum)]
        output_format: OutputFormat,
    },
    /// Remove the last item of a session
    Pop { id: String },
    /// Remove a session
    Clear { id: String },
}

#[derive(Parser, Debug)]
pub struct BudgetArgs {
    pub id: String,

    /// Model whose window to measure against (defaults to the configured model)
    #[arg(short, long)]
    pub model: Option<String>,

    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show config file path
    Path,
    /// Show the resolved configuration as TOML
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct BudgetReport<'a> {
    session_id: &'a str,
    model: Option<&'a str>,
    items: usize,
    estimated_tokens: usize,
    context_limit: usize,
    trigger_tokens: usize,
    needs_compaction: bool,
}

/// Initialize tracing: `TACK_LOG` logs the crate at debug to `tack.log`,
/// otherwise `RUST_LOG` controls stderr output.
pub fn init_logging() {
    if std::env::var("TACK_LOG").is_ok() {
        use std::fs::File;
        use tracing_subscriber::prelude::*;
        match File::create("tack.log") {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = tracing_subscriber::EnvFilter::new("tack=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file: {err}");
            }
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Run a CLI command.
pub async fn run(cli: Cli) -> ExitCode {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    if cli.config.is_some() {
        config.apply_env(|key| std::env::var(key).ok());
    }
    if let Some(path) = cli.session_path {
        config.session_path = Some(path);
    }

    let store = SessionStore::file(config.sessions_path());
    tracing::debug!(store = %store.location(), "Opened session store");

    match cli.command {
        Commands::Sessions(args) => sessions_command(&store, args.action).await,
        Commands::Budget(args) => budget_command(&store, &config, &args).await,
        Commands::Config(args) => config_command(&config, args.action),
    }
}

async fn sessions_command(store: &SessionStore, action: SessionsAction) -> Result<ExitCode> {
    match action {
        SessionsAction::List { output_format } => {
            let sessions = store.list().await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
                OutputFormat::Text => print_session_list(&sessions),
            }
        }
        SessionsAction::Show { id, output_format } => {
            if !store.contains(&id).await? {
                eprintln!("No session: {id}");
                return Ok(ExitCode::from(1));
            }
            let items = store.items(&id).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
                OutputFormat::Text => {
                    for item in &items {
                        println!("{}", render_item(item));
                    }
                }
            }
        }
        SessionsAction::Pop { id } => match store.pop_last(&id).await? {
            Some(item) => println!("Removed: {}", render_item(&item)),
            None => {
                eprintln!("Nothing to pop in {id}");
                return Ok(ExitCode::from(1));
            }
        },
        SessionsAction::Clear { id } => {
            if store.clear(&id).await? {
                println!("Cleared {id}");
            } else {
                eprintln!("No session: {id}");
                return Ok(ExitCode::from(1));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn budget_command(
    store: &SessionStore,
    config: &Config,
    args: &BudgetArgs,
) -> Result<ExitCode> {
    let items = store.items(&args.id).await?;
    let count = TokenCounter::new().count_items(&items);
    let profiles = ContextProfiles::with_overrides(&config.compaction.context_windows);
    let model = args.model.as_deref().or(config.model.as_deref());
    let trigger = profiles.trigger_tokens(model, config.compaction.trigger_fraction);

    let report = BudgetReport {
        session_id: &args.id,
        model,
        items: count.item_count,
        estimated_tokens: count.total,
        context_limit: profiles.limit_for(model),
        trigger_tokens: trigger,
        needs_compaction: count.total >= trigger,
    };

    match args.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("session:  {}", report.session_id);
            println!("model:    {}", report.model.unwrap_or("(default)"));
            println!("items:    {}", report.items);
            println!(
                "tokens:   {} (system {}, user {}, assistant {}, tool calls {}, tool results {})",
                count.total,
                count.by_kind.system,
                count.by_kind.user,
                count.by_kind.assistant,
                count.by_kind.tool_call,
                count.by_kind.tool_result,
            );
            println!("limit:    {}", report.context_limit);
            println!("trigger:  {}", report.trigger_tokens);
            if report.needs_compaction {
                println!("status:   over budget, compaction needed");
            } else {
                println!("status:   ok");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn config_command(config: &Config, action: Option<ConfigAction>) -> Result<ExitCode> {
    match action {
        Some(ConfigAction::Path) => println!("{}", Config::config_path().display()),
        Some(ConfigAction::Show) | None => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{rendered}");
            println!("# session store: {}", config.sessions_path().display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_session_list(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    for s in sessions {
        let preview = s.first_user_message.as_deref().unwrap_or("");
        println!(
            "{}  {:>4} items  {}  {}",
            s.id,
            s.item_count,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            preview
        );
    }
}

/// One-line rendering of an item for terminal output.
fn render_item(item: &ConversationItem) -> String {
    const PREVIEW: usize = 120;
    match item {
        ConversationItem::Message { role, content } => {
            let label = match role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{label}: {}", preview(&content.as_text(), PREVIEW))
        }
        ConversationItem::ToolCall {
            call_id,
            name,
            arguments,
        } => format!("> {name}({}) [{call_id}]", preview(&arguments.to_string(), PREVIEW)),
        ConversationItem::ToolResult { call_id, output } => {
            let text = match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("  -> {} [{call_id}]", preview(&text, PREVIEW))
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max || text.lines().nth(1).is_some() {
        let head: String = line.chars().take(max).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}
