//! Mail protocol integration: IMAP mirroring and SMTP write-back.

mod imap_client;
mod matcher;
mod remote;
mod sync;
mod worker;
mod writeback;

#[cfg(test)]
mod testing;

pub use imap_client::{ImapConnector, ImapSession};
pub use matcher::FolderMatcher;
pub use remote::{MailConnector, NamedFolder, RemoteFlags, RemoteFolder, RemoteMessage, RemoteSession};
pub use sync::{
    DEFAULT_FOLDER_DELAY, DEFAULT_MESSAGE_LIMIT, SyncEngine, SyncOptions, SyncReport,
    default_ignore_folders, kind_from_marker, status_from_flags,
};
pub use worker::{AccountOutcome, MailCommand, MailWorker, WorkerContext};
pub use writeback::{
    LettreSubmitter, MailSubmitter, MailWriteback, MailsyncType, OutgoingAttachment,
    OutgoingMessage, SentMessage, reply_body, reply_subject,
};
