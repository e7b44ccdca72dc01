use serde::{Deserialize, Serialize};

/// Who authored a chat message. `System` and `Judge` entries are produced
/// only by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    System,
    Judge,
    Agree,
    Disagree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
    pub timestamp_ms: i64,
}

/// One accepted speaking turn, kept for the judge transcript and the
/// persisted match record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionEntry {
    pub user_id: String,
    pub text: String,
    pub stage: u8,
}

/// Append-only message list. An entry whose `(sender, text)` pair equals any
/// existing entry is dropped, adjacent or not.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the entry was elided as a duplicate.
    pub fn append(&mut self, sender: Sender, text: &str, now_ms: i64) -> bool {
        if self
            .entries
            .iter()
            .any(|m| m.sender == sender && m.text == text)
        {
            return false;
        }
        self.entries.push(ChatMessage {
            sender,
            text: text.to_string(),
            timestamp_ms: now_ms,
        });
        true
    }

    #[must_use]
    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
