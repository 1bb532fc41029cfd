use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::archive::model::{Attachment, Author, Message};

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl WireUser {
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAttachment {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub author: WireUser,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireGuild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub retry_after: f64,
}

impl TryFrom<WireMessage> for Message {
    type Error = anyhow::Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let created_at = DateTime::parse_from_rfc3339(&wire.timestamp)
            .with_context(|| format!("invalid timestamp on message {}", wire.id))?
            .with_timezone(&Utc);
        let author = Author {
            display_name: wire.author.display_name().to_string(),
            id: wire.author.id,
        };
        Ok(Message {
            id: wire.id,
            author,
            content: wire.content,
            created_at,
            attachments: wire
                .attachments
                .into_iter()
                .map(|att| Attachment::new(att.filename, att.url))
                .collect(),
        })
    }
}
