use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_core::controller::SendOutcome;
use parley_core::formatter::display_text;
use parley_core::{
    export_html, export_text, filter_models, ApiClient, AppState, Config, ConversationStore,
    FileStorage, HtmlView, Role, SessionController, Turn,
};

mod app;
mod handler;
mod tui;
mod ui;
mod view;

use app::{chat_store, App};

const EXPORT_TITLE: &str = "Parley Conversation";

#[derive(Parser)]
#[command(name = "parley")]
#[command(version, about = "Terminal chat client with markdown rendering and conversation history")]
struct Cli {
    /// Model to use instead of the configured default
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Open this saved server conversation when the TUI starts
    #[arg(short, long)]
    session: Option<i64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Send {
        /// Message text
        message: String,
    },
    /// List saved server conversations
    Sessions,
    /// Print a saved server conversation
    Open {
        /// Session id
        id: i64,
    },
    /// Delete a saved server conversation
    Delete {
        /// Session id
        id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List available models
    Models {
        /// Only show models whose name, id, or provider contains this
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Export the local conversation
    Export {
        #[arg(short, long, value_enum, default_value = "text")]
        format: ExportFormat,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Clear the local conversation
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// End the server session
    Logout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Text,
    Html,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable config file, using defaults");
        Config::new()
    });
    if let Some(model) = cli.model {
        config.default_model = Some(model);
    }

    match cli.command {
        None => run_tui(config, cli.session).await?,
        Some(Commands::Send { message }) => send_message(&config, &message).await?,
        Some(Commands::Sessions) => list_sessions(&config).await?,
        Some(Commands::Open { id }) => open_session(&config, id).await?,
        Some(Commands::Delete { id, yes }) => delete_session(&config, id, yes).await?,
        Some(Commands::Models { filter }) => list_models(&config, filter.as_deref()).await?,
        Some(Commands::Export { format, output }) => export(&config, format, output.as_deref())?,
        Some(Commands::Clear { yes }) => clear_history(&config, yes)?,
        Some(Commands::Logout) => logout(&config).await?,
    }

    Ok(())
}

/// Log to a file in the data directory; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let log_dir = Config::data_dir()?;
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("parley.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley=info,parley_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run_tui(config: Config, session: Option<i64>) -> Result<()> {
    let mut app = App::new(config)?;
    app.connect().await;
    if let Some(id) = session {
        app.open_session(id).await;
    }

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new(tui::TICK_RATE);

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

fn local_store(config: &Config) -> Result<ConversationStore> {
    if !config.persist_history {
        return Ok(ConversationStore::new());
    }
    let storage = FileStorage::new(Config::data_dir()?)?;
    Ok(ConversationStore::with_storage(Box::new(storage)))
}

/// Client with the configured login applied, if any.
async fn connect(config: &Config) -> Result<ApiClient> {
    let client = ApiClient::from_config(config);
    if let (Some(username), Some(password)) = (config.username.as_deref(), Config::password()) {
        client.login(username, &password).await?;
    }
    Ok(client)
}

fn print_turn(turn: &Turn) {
    match turn.role {
        Role::User => println!("{}", "You:".bold().cyan()),
        Role::Assistant => println!("{}", "Assistant:".bold().yellow()),
    }
    println!("{}\n", display_text(&turn.content));
}

async fn send_message(config: &Config, message: &str) -> Result<()> {
    let client = connect(config).await?;
    let mut store = chat_store(config)?;
    store.restore();

    let state = AppState::new(config.model(), config.mode);
    let mut controller = SessionController::new(client, store, HtmlView::new(), state);

    println!("🤖 Sending to {}...\n", config.model().bold().magenta());
    match controller.submit(message).await {
        Ok(SendOutcome::Success { reply, .. }) => {
            print_turn(&Turn::assistant(reply));
            if let Some(session) = &controller.state().session {
                println!("{} {}", "Session:".dimmed(), session.route().dimmed());
            }
        }
        Ok(SendOutcome::Failed { reason }) => {
            println!("{}", reason.red());
        }
        Err(e) => {
            println!("{}", e.to_string().yellow());
        }
    }
    Ok(())
}

async fn list_sessions(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    let sessions = client.list_sessions().await?;

    println!("\n{}", "💬 Saved Conversations".bold().blue());
    println!("{}", "=".repeat(40).dimmed());

    if sessions.is_empty() {
        println!("{}", "No saved conversations".yellow());
        return Ok(());
    }

    for session in sessions {
        println!(
            "  {} {} {}",
            session.id.to_string().bold().blue(),
            session.title,
            session.updated_at.unwrap_or_default().dimmed()
        );
    }
    Ok(())
}

async fn open_session(config: &Config, id: i64) -> Result<()> {
    let client = connect(config).await?;
    let detail = client.get_session(id).await?;

    println!("\n{}", detail.session.title.bold().green());
    println!("{}\n", "=".repeat(50).dimmed());
    for turn in detail.turns() {
        print_turn(&turn);
    }
    Ok(())
}

async fn delete_session(config: &Config, id: i64, yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Delete conversation {}?", id))
            .default(false)
            .interact()?;
    if !confirmed {
        return Ok(());
    }

    let client = connect(config).await?;
    client.delete_session(id).await?;
    println!("{}", "Conversation deleted".green());
    Ok(())
}

async fn list_models(config: &Config, filter: Option<&str>) -> Result<()> {
    let client = ApiClient::from_config(config);

    println!("\n{}", "🤖 Available Models".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    match client.list_models().await {
        Ok(models) => {
            let shown = filter_models(&models, filter.unwrap_or(""));
            if shown.is_empty() {
                println!("{}", "No models found".yellow());
            }
            for model in shown {
                let marker = if model.id == config.model() { "*" } else { "•" };
                println!(
                    "  {} {} {}",
                    marker,
                    model.name.green(),
                    format!("({}, {})", model.provider, model.id).dimmed()
                );
            }
        }
        Err(e) => {
            println!("{}: {}", "Error connecting to server".red(), e);
            println!("Check the server address: {}", config.base_url.bold());
        }
    }
    Ok(())
}

fn render_export(turns: &[Turn], format: ExportFormat) -> Result<String> {
    Ok(match format {
        ExportFormat::Text => export_text(turns, EXPORT_TITLE),
        ExportFormat::Html => export_html(turns, EXPORT_TITLE),
        ExportFormat::Json => serde_json::to_string_pretty(turns)?,
    })
}

fn export(config: &Config, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let mut store = local_store(config)?;
    let turns = store.restore().to_vec();
    export_turns(&turns, format, output)
}

fn export_turns(turns: &[Turn], format: ExportFormat, output: Option<&Path>) -> Result<()> {
    if turns.is_empty() {
        return Err(anyhow!("No conversation to export"));
    }

    let rendered = render_export(turns, format)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!(path = %path.display(), turns = turns.len(), "Exported conversation");
            println!("{} {}", "Exported to".green(), path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn clear_history(config: &Config, yes: bool) -> Result<()> {
    let mut store = local_store(config)?;
    if store.restore().is_empty() {
        println!("{}", "Nothing to clear".dimmed());
        return Ok(());
    }

    let confirmed = yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Start a new chat? Current conversation will be cleared.")
            .default(false)
            .interact()?;
    if confirmed {
        store.clear();
        println!("{}", "Conversation cleared".green());
    }
    Ok(())
}

async fn logout(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    client.logout().await?;
    println!("{}", "Logged out".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_export_flags() {
        let cli = Cli::parse_from(["parley", "export", "--format", "html", "-o", "chat.html"]);
        match cli.command {
            Some(Commands::Export { format, output }) => {
                assert_eq!(format, ExportFormat::Html);
                assert_eq!(output, Some(PathBuf::from("chat.html")));
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_no_subcommand_runs_tui() {
        let cli = Cli::parse_from(["parley", "--model", "m1"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.model.as_deref(), Some("m1"));
    }

    #[test]
    fn test_json_export_round_trips_turns() {
        let turns = vec![Turn::user("q"), Turn::assistant("a")];
        let json = render_export(&turns, ExportFormat::Json).unwrap();
        let parsed: Vec<Turn> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, turns);
    }

    #[test]
    fn test_cli_parses_session_flag() {
        let cli = Cli::parse_from(["parley", "--session", "42"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.session, Some(42));

        let cli = Cli::parse_from(["parley", "-s", "7", "--model", "m1"]);
        assert_eq!(cli.session, Some(7));
    }

    #[test]
    fn test_text_export_written_to_output_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.txt");
        let turns = vec![Turn::user("q")];
        export_turns(&turns, ExportFormat::Text, Some(&path)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(EXPORT_TITLE));
        assert!(written.contains("User:\nq"));
    }

    #[test]
    fn test_empty_conversation_is_not_exported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.html");
        assert!(export_turns(&[], ExportFormat::Html, Some(&path)).is_err());
        assert!(!path.exists());
    }
}
