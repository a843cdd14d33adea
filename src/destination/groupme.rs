//! GroupMe bot destination.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use super::MessageSink;
use crate::error::SendError;

/// Public API host.
pub const DEFAULT_BASE_URL: &str = "https://api.groupme.com";

const POST_PATH: &str = "/v3/bots/post";

/// Posts messages on behalf of a single GroupMe bot.
pub struct GroupMeBot {
    client: reqwest::Client,
    base_url: String,
    bot_id: String,
}

impl GroupMeBot {
    /// Fails with [`SendError::MissingBotId`] when `bot_id` is blank.
    pub fn new(bot_id: impl Into<String>, client: reqwest::Client) -> Result<Self, SendError> {
        let bot_id = bot_id.into();
        if bot_id.trim().is_empty() {
            return Err(SendError::MissingBotId);
        }
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            bot_id,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct BotMessage<'a> {
    bot_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl MessageSink for GroupMeBot {
    fn name(&self) -> &str {
        "groupme"
    }

    async fn send(&self, text: &str) -> Result<(), SendError> {
        let response = self
            .client
            .post(format!("{}{POST_PATH}", self.base_url))
            .json(&BotMessage {
                bot_id: &self.bot_id,
                text,
            })
            .send()
            .await?;

        // GroupMe acknowledges bot posts with 202 and nothing else.
        match response.status() {
            StatusCode::ACCEPTED => {
                debug!(destination = "groupme", "message accepted");
                Ok(())
            }
            StatusCode::TOO_MANY_REQUESTS => Err(SendError::RateLimited),
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND) => {
                Err(SendError::Unauthorized(status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    destination = "groupme",
                    status = %status,
                    body = %body,
                    "bot post rejected"
                );
                Err(SendError::UnexpectedStatus { status, body })
            }
        }
    }
}
