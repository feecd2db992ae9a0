//! Message CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::open_foreman;
use crate::cli::id_resolver::{resolve_message_id, resolve_task_id};
use crate::cli::output::{output, ActionOutput, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{Message, MessageCursor, MessageFilter, MessageIntent};

#[derive(Args, Debug)]
pub struct MessageArgs {
    #[command(subcommand)]
    pub command: MessageCommands,
}

#[derive(Subcommand, Debug)]
pub enum MessageCommands {
    /// Send a message between actors
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// request, inform, propose, confirm, alert, or any snake_case
        /// name for a domain-specific intent
        #[arg(long)]
        intent: String,
        #[arg(long)]
        task: Option<String>,
        /// Parent message id (or prefix)
        #[arg(long = "reply-to")]
        reply_to: Option<String>,
        #[arg(long)]
        key: Option<String>,
        body: String,
    },
    /// Show messages addressed to an actor
    Inbox {
        actor: String,
        /// Only messages after the actor's processed cursor
        #[arg(long)]
        unprocessed: bool,
        /// Advance the cursor past the messages shown
        #[arg(long, conflicts_with = "intent")]
        ack: bool,
        #[arg(long)]
        intent: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Show the reply chain ending at a message
    Thread { id: String },
    /// Messages sent or received by an actor
    History {
        actor: String,
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

#[derive(Debug, Serialize)]
pub struct MessageListOutput {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub acknowledged: bool,
}

impl CommandOutput for MessageListOutput {
    fn to_human(&self) -> String {
        if self.messages.is_empty() {
            return "No messages.".to_string();
        }
        let mut out = TableFormatter::new().format_messages(&self.messages);
        if self.acknowledged {
            out.push_str(&format!("\nAcknowledged {} message(s)", self.messages.len()));
        }
        out
    }
}

pub async fn execute(args: MessageArgs, json_mode: bool) -> Result<()> {
    let foreman = open_foreman().await?;
    let pool = &foreman.pool;

    match args.command {
        MessageCommands::Send {
            from,
            to,
            intent,
            task,
            reply_to,
            key,
            body,
        } => {
            let intent = MessageIntent::parse(&intent).map_err(|e| anyhow!(e))?;
            let mut message = Message::new(from, to, intent, body);
            if let Some(task) = task {
                message = message.with_task(resolve_task_id(pool, &task).await?);
            }
            if let Some(parent) = reply_to {
                message = message.with_parent(resolve_message_id(pool, &parent).await?);
            }
            if let Some(key) = key {
                message = message.with_idempotency_key(key);
            }
            let sent = foreman.messages.send(message).await?;
            output(&ActionOutput::ok(format!("Message sent: {}", sent.id), sent), json_mode);
        }
        MessageCommands::Inbox {
            actor,
            unprocessed,
            ack,
            intent,
            limit,
        } => {
            let cursor = if unprocessed {
                foreman.messages.cursor(&actor).await?
            } else {
                None
            };
            let mut filter = MessageFilter::after(cursor);
            filter.limit = Some(limit);
            if let Some(intent) = intent {
                filter = filter.with_intent(MessageIntent::parse(&intent).map_err(|e| anyhow!(e))?);
            }
            let messages = foreman.messages.receive(&actor, &filter).await?;
            let acknowledged = ack && !messages.is_empty();
            if let Some(marker) = MessageCursor::covering(&messages).filter(|_| acknowledged) {
                foreman.messages.acknowledge(&actor, marker).await?;
            }
            output(&MessageListOutput { messages, acknowledged }, json_mode);
        }
        MessageCommands::Thread { id } => {
            let message_id = resolve_message_id(pool, &id).await?;
            let messages = foreman.messages.thread(message_id).await?;
            output(
                &MessageListOutput {
                    messages,
                    acknowledged: false,
                },
                json_mode,
            );
        }
        MessageCommands::History { actor, limit } => {
            let messages = foreman.messages.history(&actor, None, None, limit).await?;
            output(
                &MessageListOutput {
                    messages,
                    acknowledged: false,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
