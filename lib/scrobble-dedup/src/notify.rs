use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::{
    error::{DedupError, Result},
    traits::Notifier,
};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends run reports to a Telegram chat through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    endpoint: Url,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Self::with_base_url(TELEGRAM_API, bot_token, chat_id)
    }

    pub fn with_base_url(base_url: &str, bot_token: &str, chat_id: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "{}/bot{bot_token}/sendMessage",
            base_url.trim_end_matches('/')
        ))?;
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            endpoint,
            chat_id: chat_id.to_string(),
        })
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: message,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(DedupError::Api {
                status: status.as_u16(),
                message,
            });
        }
        debug!("Telegram message sent");
        Ok(())
    }
}
