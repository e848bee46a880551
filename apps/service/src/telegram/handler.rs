use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::TelegramClient;
use super::types::Update;
use crate::dispatch::RecipientStore;
use crate::monitoring::ReportBuilder;

/// Bound for subscribe/unsubscribe storage calls
const STORAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after a failed poll before trying again
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

const HELP_TEXT: &str = "Бот для мониторинга серверов.\n\n\
    Команды:\n\
    /subscribe - подписаться на уведомления\n\
    /unsubscribe - отписаться от уведомлений\n\
    /ping_now - проверить серверы сейчас\n\
    /config - посмотреть список пингуемых серверов\n";

/// Turns an incoming chat message into the reply text
pub struct CommandRouter {
    builder: Arc<ReportBuilder>,
    store: Arc<dyn RecipientStore>,
    servers: Arc<BTreeMap<String, String>>,
}

impl CommandRouter {
    pub fn new(
        builder: Arc<ReportBuilder>,
        store: Arc<dyn RecipientStore>,
        servers: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self { builder, store, servers }
    }

    pub async fn respond(&self, chat_id: i64, text: &str) -> String {
        let Some(command) = parse_command(text) else {
            return text.to_string();
        };

        debug!(chat_id, command, "Handling command");
        match command {
            "start" | "help" => HELP_TEXT.to_string(),
            "subscribe" => self.subscribe(chat_id).await,
            "unsubscribe" => self.unsubscribe(chat_id).await,
            "ping_now" => {
                let report = self.builder.build_report(&self.servers).await;
                if report.is_empty() { "No servers configured.".to_string() } else { report.to_string() }
            }
            "config" => self.server_list(),
            _ => "Unknown command".to_string(),
        }
    }

    async fn subscribe(&self, chat_id: i64) -> String {
        let outcome = tokio::time::timeout(STORAGE_TIMEOUT, self.store.add_recipient(&chat_id.to_string())).await;
        match outcome {
            Ok(Ok(())) => "You've been successfully subscribed to notifications!".to_string(),
            Ok(Err(e)) => {
                warn!(chat_id, "Failed to subscribe chat: {}", e);
                "Failed to subscribe. Please try again later.".to_string()
            }
            Err(_) => {
                warn!(chat_id, "Failed to subscribe chat: storage timeout");
                "Failed to subscribe. Please try again later.".to_string()
            }
        }
    }

    async fn unsubscribe(&self, chat_id: i64) -> String {
        let outcome =
            tokio::time::timeout(STORAGE_TIMEOUT, self.store.remove_recipient(&chat_id.to_string())).await;
        match outcome {
            Ok(Ok(())) => "You've been successfully unsubscribed from notifications!".to_string(),
            Ok(Err(e)) => {
                warn!(chat_id, "Failed to unsubscribe chat: {}", e);
                "Failed to unsubscribe. Please try again later.".to_string()
            }
            Err(_) => {
                warn!(chat_id, "Failed to unsubscribe chat: storage timeout");
                "Failed to unsubscribe. Please try again later.".to_string()
            }
        }
    }

    fn server_list(&self) -> String {
        self.servers.iter().map(|(name, address)| format!("{} - {}\n", name, address)).collect()
    }
}

/// `/cmd@botname args` -> `cmd`
fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    let command = command.split('@').next().unwrap_or(command);
    (!command.is_empty()).then_some(command)
}

/// Long-polls the Bot API and answers every message until cancelled
pub struct BotHandler {
    client: Arc<TelegramClient>,
    router: CommandRouter,
    poll_timeout_seconds: u64,
}

impl BotHandler {
    pub fn new(client: Arc<TelegramClient>, router: CommandRouter, poll_timeout_seconds: u64) -> Self {
        Self { client, router, poll_timeout_seconds }
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut offset = 0;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Bot handler stopped");
                    return Ok(());
                }
                polled = self.client.get_updates(offset, self.poll_timeout_seconds) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to fetch updates: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.filter(|t| !t.is_empty()) else {
            return;
        };

        let reply = self.router.respond(message.chat.id, &text).await;
        if let Err(e) = self.client.send_message(message.chat.id, &reply).await {
            warn!(chat_id = message.chat.id, "Error sending message: {}", e);
        }
    }
}
