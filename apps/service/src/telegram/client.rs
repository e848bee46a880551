use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{ApiResponse, GetUpdates, SendMessage, Update, User};
use crate::dispatch::Transport;
use crate::error::TransportError;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Requests other than long polling must answer within this bound
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimal Bot API client
pub struct TelegramClient {
    http: reqwest::Client,
    base: Url,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        Self::with_api_url(DEFAULT_API_URL, token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("{}/bot{}/", api_url.trim_end_matches('/'), token))?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, base })
    }

    fn method_url(&self, method: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(method)?)
    }

    async fn call<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R, TransportError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method)?)
            .json(params)
            .timeout(timeout)
            .send()
            .await?;

        response.json::<ApiResponse<R>>().await?.into_result()
    }

    pub async fn get_me(&self) -> Result<User, TransportError> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT).await
    }

    /// Long-poll for updates newer than `offset`
    pub async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Update>, TransportError> {
        let params = GetUpdates { offset, timeout: timeout_seconds, allowed_updates: &["message"] };
        self.call("getUpdates", &params, Duration::from_secs(timeout_seconds) + REQUEST_TIMEOUT).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let _: serde_json::Value =
            self.call("sendMessage", &SendMessage { chat_id, text }, REQUEST_TIMEOUT).await?;
        Ok(())
    }
}

/// Recipients are decimal chat ids, negative for groups
pub fn parse_chat_id(recipient: &str) -> Result<i64, TransportError> {
    recipient.trim().parse().map_err(|_| TransportError::InvalidRecipient(recipient.to_string()))
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let chat_id = parse_chat_id(recipient)?;
        self.send_message(chat_id, text).await
    }
}
