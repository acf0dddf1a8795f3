use serde::{Deserialize, Serialize};

mod catalog;
mod error;
mod lock;
mod store;

pub use catalog::{AttachmentIndex, FolderCatalog};
pub use error::{MailSyncError, Result};
pub use lock::{SyncLock, SyncLockGuard};
pub use store::{AttachmentStore, FolderStore, MailStore, MessageStore, SqliteMailStore};

/// Longest body snippet kept on a message row, in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    Ssl,
    StartTls,
    None,
}

impl Encryption {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ssl" => Some(Encryption::Ssl),
            "tls" | "starttls" => Some(Encryption::StartTls),
            "none" | "" => Some(Encryption::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub username: String,
    pub password: String,
    pub sender_name: String,
    pub imap: Endpoint,
    pub smtp: Option<Endpoint>,
    pub tenant: i64,
}

impl Account {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub path: String,
    pub display_name: String,
    pub delimiter: Option<String>,
    pub tenant: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Unread,
    Read,
    Flagged,
    Deleted,
    Answered,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Unread => "unread",
            MessageStatus::Read => "read",
            MessageStatus::Flagged => "flagged",
            MessageStatus::Deleted => "deleted",
            MessageStatus::Answered => "answered",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unread" => Some(MessageStatus::Unread),
            "read" => Some(MessageStatus::Read),
            "flagged" => Some(MessageStatus::Flagged),
            "deleted" => Some(MessageStatus::Deleted),
            "answered" => Some(MessageStatus::Answered),
            _ => None,
        }
    }
}

/// Whether a message came from this system's own outbound mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Personal,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Personal => "personal",
            MessageKind::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "personal" => Some(MessageKind::Personal),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// A message as assembled by the sync engine, before it has a local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub uid: u32,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: i64,
    pub content: String,
    pub status: MessageStatus,
    pub kind: MessageKind,
    pub folder_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub uid: u32,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: i64,
    pub content: String,
    pub status: MessageStatus,
    pub kind: MessageKind,
    pub folder_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub message_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub part_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub part_number: String,
}

/// Cuts `text` down to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Encryption, MessageKind, MessageStatus, truncate_chars};

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("żółw", 2), "żó");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn status_and_kind_round_trip_through_column_text() {
        for status in [
            MessageStatus::Unread,
            MessageStatus::Read,
            MessageStatus::Flagged,
            MessageStatus::Deleted,
            MessageStatus::Answered,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageKind::parse("system"), Some(MessageKind::System));
        assert_eq!(MessageKind::parse("bogus"), None);
    }

    #[test]
    fn encryption_accepts_config_spellings() {
        assert_eq!(Encryption::parse("SSL"), Some(Encryption::Ssl));
        assert_eq!(Encryption::parse("tls"), Some(Encryption::StartTls));
        assert_eq!(Encryption::parse("none"), Some(Encryption::None));
        assert_eq!(Encryption::parse("rot13"), None);
    }
}
