use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Bot,
}

/// Interactive affordances attached to a bot message. The presentation layer
/// renders these; the core only decides which one a message carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageButtons {
    TokenSelect { tokens: Vec<Token> },
    Confirm,
    ConnectWallet { action: String },
    QuickBuy { symbol: String },
}

/// One chat bubble. `text` may carry pre-approved HTML fragments (quote and
/// confirmation cards, explorer links); plain user text is escaped by the
/// presentation layer, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub id: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<MessageButtons>,
}

impl MessageData {
    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            message_type: MessageType::Bot,
            text: text.into(),
            buttons: None,
        }
    }

    pub fn bot_with_buttons(text: impl Into<String>, buttons: MessageButtons) -> Self {
        Self {
            buttons: Some(buttons),
            ..Self::bot(text)
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            message_type: MessageType::User,
            text: text.into(),
            buttons: None,
        }
    }
}

fn next_message_id() -> i64 {
    Utc::now().timestamp_millis()
}

pub const ORDER_KEY_PREFIX: &str = "order_";

/// Storage key for a submitted order, keyed by transaction hash.
pub fn order_key(tx_hash: &str) -> String {
    format!("{ORDER_KEY_PREFIX}{tx_hash}")
}

/// A submitted, unsettled transaction tracked until it reaches a terminal
/// status. Persisted as JSON under `order_<txHash>`.
///
/// `last_announced` records the most recent status already surfaced to the
/// user, so a restarted process does not repeat notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub tx_hash: String,
    pub from_token: String,
    pub to_token: String,
    pub amount: f64,
    pub to_amount: f64,
    pub status: String,
    pub order_id: String,
    pub last_checked: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_announced: Option<String>,
}

impl PendingOrder {
    pub fn storage_key(&self) -> String {
        order_key(&self.tx_hash)
    }
}
