use serde::{Deserialize, Serialize};

/// Whether a message has been answered; always derived from its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Answered,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
        }
    }

    /// Accepts the canonical names plus the labels older pages stored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" | "待回复" => Some(Self::Pending),
            "answered" | "已回复" => Some(Self::Answered),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instructor response attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub id: String,
    pub author: String,
    pub content: String,
    pub timestamp: String,
}

/// Canonical student inquiry, as held in memory and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub student_name: String,
    pub student_id: String,
    pub class_name: String,
    pub title: String,
    pub content: String,
    pub timestamp: String,
    pub(crate) status: MessageStatus,
    pub(crate) replies: Vec<Reply>,
}

impl Message {
    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }

    /// Appends a reply and flips the status in one step.
    pub(crate) fn push_reply(&mut self, reply: Reply) {
        self.replies.push(reply);
        self.sync_status();
    }

    pub(crate) fn sync_status(&mut self) {
        self.status = if self.replies.is_empty() {
            MessageStatus::Pending
        } else {
            MessageStatus::Answered
        };
    }
}

/// Which tier satisfied the most recent load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Primary,
    Backup,
    Memory,
    Default,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::Memory => "memory",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
