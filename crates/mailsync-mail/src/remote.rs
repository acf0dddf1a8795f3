use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use mailsync_content::{AttachmentPart, parse_message};
use mailsync_core::{Account, Result};

/// A selectable folder as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFolder {
    /// Raw server path, still modified UTF-7 encoded.
    pub path: String,
    /// Decoded last path segment.
    pub name: String,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteFlags {
    pub seen: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub answered: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub uid: u32,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: Option<i64>,
    pub body: String,
    pub flags: RemoteFlags,
    pub marker: Option<String>,
    pub attachments: Vec<AttachmentPart>,
}

impl RemoteMessage {
    pub fn from_raw(uid: u32, flags: RemoteFlags, raw: &[u8]) -> Result<Self> {
        let parsed = parse_message(raw)?;
        Ok(Self {
            uid,
            message_id: parsed.message_id,
            subject: parsed.subject,
            sender: parsed.sender,
            timestamp: parsed.timestamp,
            body: parsed.body,
            flags,
            marker: parsed.marker,
            attachments: parsed.attachments,
        })
    }
}

/// Opens authenticated sessions for an account.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Box<dyn RemoteSession>>;
}

/// One stateful server session. Every method requires exclusive access, and
/// message-level calls act on the folder chosen by the last `select_folder`.
#[async_trait]
pub trait RemoteSession: Send {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>>;
    async fn select_folder(&mut self, path: &str) -> Result<()>;
    async fn list_uids(&mut self) -> Result<HashSet<u32>>;
    /// Fails with `NotFound` when the uid is no longer in the folder.
    async fn fetch_message(&mut self, uid: u32) -> Result<RemoteMessage>;
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>>;
    async fn move_message(&mut self, uid: u32, target_path: &str) -> Result<()>;
    /// Sets `\Deleted` on the uid and expunges the folder.
    async fn mark_deleted(&mut self, uid: u32) -> Result<()>;
    async fn append(&mut self, folder_path: &str, raw: Vec<u8>, seen: bool) -> Result<()>;
    async fn logout(&mut self) -> Result<()>;
}

/// Anything a [`crate::FolderMatcher`] can pick from.
pub trait NamedFolder {
    fn folder_name(&self) -> &str;
    fn folder_path(&self) -> &str;
}

impl NamedFolder for RemoteFolder {
    fn folder_name(&self) -> &str {
        &self.name
    }

    fn folder_path(&self) -> &str {
        &self.path
    }
}
