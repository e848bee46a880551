/// Telegram Bot API integration
///
/// - [`TelegramClient`]: HTTP client and the report [`crate::dispatch::Transport`]
/// - [`BotHandler`]: long-polling loop answering chat commands
pub mod client;
pub mod handler;
pub mod types;

pub use client::TelegramClient;
pub use handler::{BotHandler, CommandRouter};
