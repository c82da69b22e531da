//! Message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a message, using UUID v7 (time-sortable)
///
/// Generated on the client for creates so a replayed create is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new unique message ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    /// Millisecond-timestamp prefix of the hyphenated form, used for compact display
    #[must_use]
    pub fn short(&self) -> String {
        self.0.hyphenated().to_string()[..13].to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A message as cached locally
///
/// The server owns messages; the local copy may be provisional (pending
/// operations exist for it) or stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: MessageId,
    /// Owner, when the server reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Plain text content
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Create a provisional local message that has not reached the server yet
    #[must_use]
    pub fn draft(id: MessageId, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: None,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// First line with whitespace collapsed, cut to `max_chars` with an ellipsis
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let first_line = self.content.lines().next().unwrap_or("");
        let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.chars().count() <= max_chars {
            collapsed
        } else {
            let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
            truncated.push_str("...");
            truncated
        }
    }
}

/// Display order: `created_at` descending, ties broken by id descending
pub fn newest_first(a: &Message, b: &Message) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort messages into display order
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(newest_first);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_message_id_unique() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_message_id_parse() {
        let id = MessageId::new();
        let parsed: MessageId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 13);
        assert!(id.as_str().starts_with(&id.short()));
    }

    #[test]
    fn test_message_id_serializes_as_plain_uuid() {
        let id: MessageId = "0194a3c2-0000-7000-8000-000000000001".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0194a3c2-0000-7000-8000-000000000001\"");
    }

    #[test]
    fn test_message_deserializes_without_user_id() {
        let json = r#"{
            "id": "0194a3c2-0000-7000-8000-000000000001",
            "content": "hello",
            "created_at": "2026-01-04T10:00:00Z",
            "updated_at": "2026-01-04T11:00:00+00:00"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.user_id, None);
        assert_eq!(message.created_at, at(10));
        assert_eq!(message.updated_at, at(11));
    }

    #[test]
    fn test_draft_uses_same_timestamps() {
        let message = Message::draft(MessageId::new(), "Hello world", at(9));
        assert_eq!(message.created_at, message.updated_at);
    }

    #[test]
    fn test_preview_first_line() {
        let message = Message::draft(MessageId::new(), "First   line\nSecond", at(9));
        assert_eq!(message.preview(100), "First line");
        assert_eq!(message.preview(10), "First line");
        assert_eq!(message.preview(8), "First...");
    }

    #[test]
    fn test_sort_newest_first_with_id_tiebreak() {
        let low: MessageId = "0194a3c2-0000-7000-8000-000000000001".parse().unwrap();
        let high: MessageId = "0194a3c2-0000-7000-8000-000000000002".parse().unwrap();
        let mut messages = vec![
            Message::draft(low, "old", at(8)),
            Message::draft(low, "tie low", at(10)),
            Message::draft(high, "tie high", at(10)),
        ];
        sort_messages(&mut messages);
        let order: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["tie high", "tie low", "old"]);
    }
}
