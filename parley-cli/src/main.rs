//! CLI entry point for parley

mod render;
mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input};
use parley_agent::ChatService;
use parley_core::config::{Config, ConfigLoader};
use parley_core::logging::init_logging;
use parley_core::Database;
use parley_providers::{ChatModel, GeminiClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::render::{conversation_label, message_line, model_label};
use crate::shell::Shell;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat with Gemini models from your terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize parley configuration
    Onboard,
    /// Show configuration and storage status
    Status,
    /// List stored conversations
    List,
    /// Print the messages of a conversation
    Show {
        /// Conversation ID
        id: String,
    },
    /// List models that can be used for chat
    Models,
    /// Delete a conversation and its messages
    Delete {
        /// Conversation ID
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    if let Some(Commands::Onboard) = cli.command {
        return run_onboard(&loader).await;
    }

    let config = loader
        .load()
        .with_context(|| format!("Failed to load {}", loader.config_path().display()))?;
    let _log_guard = init_logging(&config.logging);
    info!("parley {} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        None => run_shell(&loader, config).await,
        Some(Commands::Status) => run_status(&loader, &config),
        Some(Commands::List) => run_list(&loader, &config),
        Some(Commands::Show { id }) => run_show(&loader, &config, &id),
        Some(Commands::Models) => run_models(&config).await,
        Some(Commands::Delete { id, yes }) => run_delete(&loader, &config, &id, yes),
        Some(Commands::Onboard) => Ok(()),
    };

    if let Err(e) = &result {
        error!("parley exited with error: {:#}", e);
    }
    result
}

fn open_database(loader: &ConfigLoader, config: &Config) -> Result<Arc<Database>> {
    let path = loader.database_path(config);
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    let client = GeminiClient::from_config(&config.gemini).context(
        "Gemini client unavailable: set GEMINI_API_KEY (or run `parley onboard`)",
    )?;
    Ok(Arc::new(client))
}

/// Start the interactive menu
async fn run_shell(loader: &ConfigLoader, config: Config) -> Result<()> {
    let db = open_database(loader, &config)?;
    let model = build_model(&config)?;
    let service = ChatService::new(db, model, &config.chat, config.generation.clone());

    Shell::new(service, config.chat).run().await
}

async fn run_onboard(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("Welcome to parley!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let api_key: String = Input::new()
        .with_prompt("Enter your Gemini API key (leave empty to use GEMINI_API_KEY)")
        .allow_empty(true)
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Default model")
        .default("gemini-1.5-flash".to_string())
        .interact_text()?;

    let database_path: String = Input::new()
        .with_prompt("Conversation database")
        .default(Config::default().storage.database_path)
        .interact_text()?;

    let mut config = Config::default();
    config.gemini.api_key = api_key.trim().to_string();
    config.chat.default_model = Some(model.trim().to_string()).filter(|m| !m.is_empty());
    config.storage.database_path = database_path;

    loader.save(&config)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start chatting", style("parley").cyan());
    println!("  {} - See available models", style("parley models").cyan());

    Ok(())
}

fn run_status(loader: &ConfigLoader, config: &Config) -> Result<()> {
    println!("{}", style("parley status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    let file_status = if loader.config_path().exists() {
        style("present").green()
    } else {
        style("missing (defaults in use)").yellow()
    };
    println!("  Config file: {}", file_status);
    println!("  API base: {}", config.gemini.api_base);
    let key_status = if config.gemini.api_key.is_empty() {
        style("not configured").red()
    } else {
        style("configured").green()
    };
    println!("  API key: {}", key_status);
    println!(
        "  Default model: {}",
        config.chat.default_model.as_deref().unwrap_or("(choose at start)")
    );
    println!("  Exit token: {}", config.chat.exit_token);
    println!();

    println!("{}", style("Storage:").bold());
    let db_path = loader.database_path(config);
    println!("  Database: {}", db_path.display());
    if db_path.exists() {
        let db = open_database(loader, config)?;
        println!("  Conversations: {}", db.list_conversations()?.len());
    } else {
        println!("  Conversations: {}", style("none yet").dim());
    }
    println!("  Logs: {}", config.logging.dir);

    Ok(())
}

fn run_list(loader: &ConfigLoader, config: &Config) -> Result<()> {
    let db = open_database(loader, config)?;
    let conversations = db.list_conversations()?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for conversation in &conversations {
        println!(
            "{}  {}",
            style(&conversation.id).dim(),
            conversation_label(conversation)
        );
    }
    Ok(())
}

fn run_show(loader: &ConfigLoader, config: &Config, id: &str) -> Result<()> {
    let db = open_database(loader, config)?;
    let conversation = db
        .get_conversation(id)?
        .with_context(|| format!("Conversation not found: {}", id))?;

    println!(
        "{} ({})",
        style(&conversation.title).bold(),
        conversation.model
    );
    for message in db.messages_for_conversation(id)? {
        println!("{}", message_line(&message));
    }
    Ok(())
}

async fn run_models(config: &Config) -> Result<()> {
    let model = build_model(config)?;
    let models = model.list_models().await?;

    for info in models.iter().filter(|m| m.supports_generation()) {
        println!("{}", model_label(info));
    }
    Ok(())
}

fn run_delete(loader: &ConfigLoader, config: &Config, id: &str, yes: bool) -> Result<()> {
    let db = open_database(loader, config)?;
    let conversation = db
        .get_conversation(id)?
        .with_context(|| format!("Conversation not found: {}", id))?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete \"{}\" and all its messages?",
                conversation.title
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Deletion cancelled.");
            return Ok(());
        }
    }

    db.delete_conversation(id)?;
    println!("{}", style("Conversation deleted.").green());
    Ok(())
}
