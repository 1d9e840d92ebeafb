//! Channel-specific message rendering.
//!
//! Each channel type is a small template over a shared (subject, body)
//! pair; nothing here talks to the network.

use serde_json::json;

use crate::alerts::{AlertEvent, AlertEventKind};
use crate::config::types::ChannelKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    pub subject: String,
    pub body: String,
}

/// Render an alert event into the shared subject/body pair.
pub fn render_event(event: &AlertEvent) -> FormattedMessage {
    match event.kind {
        AlertEventKind::Opened => FormattedMessage {
            subject: event.alert_type.subject().to_string(),
            body: format!(
                "Server: {}\n\n{}:\n{}",
                event.server_name,
                event.alert_type.label(),
                event.message
            ),
        },
        AlertEventKind::Cleared => FormattedMessage {
            subject: format!("{} Cleared", event.alert_type.subject()),
            body: format!("Server: {}", event.server_name),
        },
    }
}

/// Message used by the user-triggered channel test path.
pub fn render_test() -> FormattedMessage {
    FormattedMessage {
        subject: "Zephyr Test Notification".to_string(),
        body: "This is a test message confirming the channel is reachable.".to_string(),
    }
}

/// Build the channel-specific JSON payload.
pub fn webhook_payload(
    kind: ChannelKind,
    message: &FormattedMessage,
    chat_id: Option<&str>,
) -> serde_json::Value {
    match kind {
        ChannelKind::Slack => json!({
            "text": format!("*{}*\n{}", message.subject, message.body),
        }),
        ChannelKind::Teams => json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "content": {
                    "type": "AdaptiveCard",
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "version": "1.4",
                    "body": [
                        {
                            "type": "TextBlock",
                            "size": "Medium",
                            "weight": "Bolder",
                            "text": message.subject,
                        },
                        { "type": "TextBlock", "text": message.body, "wrap": true },
                    ],
                },
            }],
        }),
        ChannelKind::Discord => json!({
            "content": format!("**{}**\n{}", message.subject, message.body),
        }),
        ChannelKind::Telegram => json!({
            "chat_id": chat_id.unwrap_or_default(),
            "text": format!("{}\n{}", message.subject, message.body),
        }),
    }
}

/// The URL to post to. Webhook channels store the full URL as their
/// endpoint secret; Telegram stores the bot token and derives the URL.
pub fn delivery_url(kind: ChannelKind, endpoint: &str) -> String {
    match kind {
        ChannelKind::Telegram => {
            format!("https://api.telegram.org/bot{endpoint}/sendMessage")
        }
        _ => endpoint.to_string(),
    }
}
