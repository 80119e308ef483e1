//! Interactive menu

use anyhow::Result;
use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use parley_agent::{AgentError, ChatService, ReplySink};
use parley_core::config::ChatConfig;
use parley_core::Conversation;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::render::{conversation_label, message_line, model_label, transcript_line, TerminalSink};

const MENU_ITEMS: [&str; 6] = [
    "List conversations",
    "Start new conversation",
    "Continue a conversation",
    "List available models",
    "Delete conversation",
    "Exit",
];

pub struct Shell {
    service: ChatService,
    chat: ChatConfig,
    term: Term,
    theme: ColorfulTheme,
}

impl Shell {
    pub fn new(service: ChatService, chat: ChatConfig) -> Self {
        Self {
            service,
            chat,
            term: Term::stdout(),
            theme: ColorfulTheme::default(),
        }
    }

    /// Run the menu until the user picks Exit
    pub async fn run(&self) -> Result<()> {
        info!("Interactive session started");
        println!("{}", style("Welcome to parley").bold().cyan());

        loop {
            println!();
            let choice = Select::with_theme(&self.theme)
                .with_prompt("What would you like to do?")
                .items(&MENU_ITEMS)
                .default(0)
                .interact_on(&self.term)?;

            let outcome = match choice {
                0 => self.list_conversations(),
                1 => self.start_conversation().await,
                2 => self.continue_conversation().await,
                3 => self.list_models().await,
                4 => self.delete_conversation(),
                _ => break,
            };

            if let Err(e) = outcome {
                error!("Menu action failed: {:#}", e);
                println!("{}", style(format!("Error: {:#}", e)).red());
            }
        }

        info!("Interactive session finished");
        println!("Goodbye!");
        Ok(())
    }

    fn list_conversations(&self) -> Result<()> {
        let conversations = self.service.conversations()?;
        if conversations.is_empty() {
            println!("No conversations yet.");
            return Ok(());
        }

        println!("{}", style("Conversations:").bold());
        for conversation in &conversations {
            println!("  {}", conversation_label(conversation));
        }

        let Some(conversation) = self.pick_conversation(&conversations, "Show messages of")? else {
            return Ok(());
        };

        println!();
        println!("{}", style(&conversation.title).bold());
        for message in self.service.messages(&conversation.id)? {
            println!("{}", message_line(&message));
        }
        Ok(())
    }

    async fn start_conversation(&self) -> Result<()> {
        let models = self.fetch_models().await?;
        if models.is_empty() {
            println!("No chat-capable models are available for this API key.");
            return Ok(());
        }

        let labels: Vec<String> = models.iter().map(model_label).collect();
        let default = self
            .chat
            .default_model
            .as_deref()
            .and_then(|wanted| models.iter().position(|m| m.id == wanted))
            .unwrap_or(0);
        let selected = Select::with_theme(&self.theme)
            .with_prompt("Choose a model")
            .items(&labels)
            .default(default)
            .interact_on_opt(&self.term)?;
        let Some(index) = selected else {
            return Ok(());
        };
        let model_id = models[index].id.clone();

        let initial: String = Input::with_theme(&self.theme)
            .with_prompt("Your first message")
            .validate_with(|input: &String| {
                if input.trim().is_empty() {
                    Err("message cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text_on(&self.term)?;

        let spinner = spinner("Starting conversation...");
        let started = self
            .service
            .start_conversation(&model_id, initial.trim())
            .await;
        spinner.finish_and_clear();
        let started = started?;

        println!(
            "{} {}",
            style("Conversation:").bold(),
            style(&started.conversation.title).cyan()
        );
        print!("{} ", style("Agent:").green().bold());
        TerminalSink::stdout(self.chat.typing_delay_ms)
            .fragment(started.reply())
            .await;
        println!();

        self.chat_loop(&started.conversation).await
    }

    async fn continue_conversation(&self) -> Result<()> {
        let conversations = self.service.conversations()?;
        if conversations.is_empty() {
            println!("No conversations yet.");
            return Ok(());
        }

        let Some(conversation) = self.pick_conversation(&conversations, "Continue")? else {
            return Ok(());
        };

        self.term.clear_screen()?;
        println!(
            "{} {} ({})",
            style("Conversation:").bold(),
            style(&conversation.title).cyan(),
            conversation.model
        );
        for message in self.service.messages(&conversation.id)? {
            println!("{}", transcript_line(&message));
        }

        self.chat_loop(conversation).await
    }

    async fn list_models(&self) -> Result<()> {
        let models = self.fetch_models().await?;
        if models.is_empty() {
            println!("No chat-capable models are available for this API key.");
            return Ok(());
        }

        println!("{}", style("Available models:").bold());
        for model in &models {
            println!("  {}", style(model_label(model)).cyan());
            if !model.description.is_empty() {
                println!("      {}", style(&model.description).dim());
            }
        }
        Ok(())
    }

    fn delete_conversation(&self) -> Result<()> {
        let conversations = self.service.conversations()?;
        if conversations.is_empty() {
            println!("No conversations to delete.");
            return Ok(());
        }

        let Some(conversation) = self.pick_conversation(&conversations, "Delete")? else {
            return Ok(());
        };

        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt(format!("Delete \"{}\" and all its messages?", conversation.title))
            .default(false)
            .interact_on(&self.term)?;
        if !confirmed {
            println!("Deletion cancelled.");
            return Ok(());
        }

        if self.service.delete_conversation(&conversation.id)? {
            println!("{}", style("Conversation deleted.").green());
        } else {
            println!("Conversation was already gone.");
        }
        Ok(())
    }

    /// Read messages until the exit token, sending each one and echoing the reply
    async fn chat_loop(&self, conversation: &Conversation) -> Result<()> {
        println!(
            "{}",
            style(format!(
                "Type your message, or {} to return to the menu. Ctrl+C stops a reply.",
                self.chat.exit_token
            ))
            .dim()
        );

        loop {
            let text: String = Input::with_theme(&self.theme)
                .with_prompt("You")
                .allow_empty(true)
                .interact_text_on(&self.term)?;
            let text = text.trim();

            if text == self.chat.exit_token {
                break;
            }
            if text.is_empty() {
                continue;
            }

            print!("{} ", style("Agent:").green().bold());
            let mut sink = TerminalSink::stdout(self.chat.typing_delay_ms);
            let outcome = self
                .send_with_interrupt(&conversation.id, text, &mut sink)
                .await;
            println!();

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    println!("{}", style("Reply cancelled; nothing was saved.").yellow());
                }
                Err(e) => {
                    error!("Failed to send message in {}: {}", conversation.id, e);
                    println!("{}", style(format!("Error: {}", e)).red());
                }
            }
        }
        Ok(())
    }

    /// Send one message, cancelling the reply if Ctrl+C arrives first
    async fn send_with_interrupt(
        &self,
        conversation_id: &str,
        text: &str,
        sink: &mut dyn ReplySink,
    ) -> Result<(), AgentError> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let outcome = self
            .service
            .send_message(conversation_id, text, sink, cancel)
            .await;
        watcher.abort();
        outcome.map(|_| ())
    }

    async fn fetch_models(&self) -> Result<Vec<parley_providers::ModelInfo>> {
        let spinner = spinner("Fetching models...");
        let models = self.service.list_models().await;
        spinner.finish_and_clear();
        Ok(models?)
    }

    fn pick_conversation<'a>(
        &self,
        conversations: &'a [Conversation],
        action: &str,
    ) -> Result<Option<&'a Conversation>> {
        let labels: Vec<String> = conversations.iter().map(conversation_label).collect();
        let selected = Select::with_theme(&self.theme)
            .with_prompt(format!("{} which conversation? (Esc to go back)", action))
            .items(&labels)
            .default(0)
            .interact_on_opt(&self.term)?;
        Ok(selected.map(|index| &conversations[index]))
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(spinner_style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
