use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use mailsync_content::MARKER_SYSTEM;
use mailsync_core::{
    Account, AttachmentIndex, Folder, FolderCatalog, MAX_CONTENT_CHARS, MailStore, MailSyncError,
    MessageKind, MessageStatus, MessageStore, NewAttachment, NewMessage, Result, truncate_chars,
};

use crate::remote::{MailConnector, RemoteFlags, RemoteMessage, RemoteSession};

pub const DEFAULT_MESSAGE_LIMIT: usize = 20;
pub const DEFAULT_FOLDER_DELAY: Duration = Duration::from_millis(500);

/// Groupware folders that hold no mail.
pub fn default_ignore_folders() -> Vec<String> {
    [
        "Calendar",
        "Contacts",
        "Tasks",
        "Notes",
        "Journal",
        "Kalendarz",
        "Kontakty",
        "Zadania",
        "Notatki",
        "Dziennik",
        "Kalender",
        "Kontakte",
        "Aufgaben",
        "Notizen",
        "Calendrier",
        "Tâches",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Highest uids fetched per folder per run.
    pub message_limit: usize,
    /// Pause between folders, to stay under server rate limits.
    pub folder_delay: Duration,
    /// Exact, case-sensitive display names skipped in phase two.
    pub ignore_folders: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            folder_delay: DEFAULT_FOLDER_DELAY,
            ignore_folders: default_ignore_folders(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub folders_catalogued: usize,
    pub folders_synced: usize,
    pub folders_skipped: usize,
    pub folders_failed: usize,
    pub messages_new: usize,
    pub messages_failed: usize,
    pub messages_pruned: u64,
    pub attachments_recorded: usize,
}

/// Mirrors one account into the local store.
///
/// Phase one lists the server's folders and brings the folder catalog up to
/// date. Phase two walks each catalogued folder with a fresh session: it prunes
/// local rows whose uid vanished remotely, then stores the newest
/// `message_limit` messages. Uids are assumed to grow with arrival time, so the
/// highest uids stand in for the most recent mail.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn MailStore>,
    connector: Arc<dyn MailConnector>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        store: impl MailStore + 'static,
        connector: Arc<dyn MailConnector>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store: Arc::new(store),
            connector,
            options,
        }
    }

    pub async fn sync(&self, account: &Account, folders_only: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        info!(account = %account.name, tenant = account.tenant, folders_only, "sync start");

        let folders = self.catalog_folders(account).await?;
        report.folders_catalogued = folders.len();
        if folders_only {
            info!(account = %account.name, folders = folders.len(), "sync folders only done");
            return Ok(report);
        }

        for folder in &folders {
            if self.options.ignore_folders.contains(&folder.display_name) {
                debug!(folder = %folder.path, "sync skip ignored folder");
                report.folders_skipped += 1;
                continue;
            }
            match self.sync_folder(account, folder, &mut report).await {
                Ok(()) => report.folders_synced += 1,
                Err(err @ MailSyncError::Persistence(_)) => return Err(err),
                Err(err) => {
                    warn!(folder = %folder.path, error = %err, "sync folder failed");
                    report.folders_failed += 1;
                }
            }
            if !self.options.folder_delay.is_zero() {
                tokio::time::sleep(self.options.folder_delay).await;
            }
        }

        info!(
            account = %account.name,
            synced = report.folders_synced,
            failed = report.folders_failed,
            skipped = report.folders_skipped,
            new = report.messages_new,
            messages_failed = report.messages_failed,
            pruned = report.messages_pruned,
            "sync done"
        );
        Ok(report)
    }

    async fn catalog_folders(&self, account: &Account) -> Result<Vec<Folder>> {
        let mut session = self.connector.connect(account).await?;
        let listed = session.list_folders().await;
        close_session(session.as_mut()).await;
        let remote = listed?;

        let catalog = FolderCatalog::new(self.store.as_folder_store());
        let mut folders = Vec::with_capacity(remote.len());
        for entry in remote {
            let folder = catalog
                .get_or_create(
                    &entry.path,
                    &entry.name,
                    entry.delimiter.as_deref(),
                    account.tenant,
                )
                .await?;
            folders.push(folder);
        }
        Ok(folders)
    }

    async fn open_folder(&self, account: &Account, path: &str) -> Result<Box<dyn RemoteSession>> {
        let mut session = self.connector.connect(account).await?;
        if let Err(err) = session.select_folder(path).await {
            close_session(session.as_mut()).await;
            return Err(err);
        }
        Ok(session)
    }

    async fn sync_folder(
        &self,
        account: &Account,
        folder: &Folder,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut session = self.open_folder(account, &folder.path).await?;
        let result = self
            .reconcile_folder(account, folder, &mut session, report)
            .await;
        close_session(session.as_mut()).await;
        result
    }

    async fn reconcile_folder(
        &self,
        account: &Account,
        folder: &Folder,
        session: &mut Box<dyn RemoteSession>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let remote = session.list_uids().await?;
        let local = self.store.uids_by_folder(folder.id).await?;

        let mut vanished: Vec<u32> = local.difference(&remote).copied().collect();
        if !vanished.is_empty() {
            vanished.sort_unstable();
            let pruned = self.store.delete_by_uids(&vanished, folder.id).await?;
            debug!(folder = %folder.path, pruned, "sync pruned vanished uids");
            report.messages_pruned += pruned;
        }
        if remote.is_empty() {
            return Ok(());
        }

        let mut uids: Vec<u32> = remote.into_iter().collect();
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.truncate(self.options.message_limit);

        let mut reconnected = false;
        for uid in uids {
            match self.store_message(session.as_mut(), folder, uid, &local, report).await {
                Ok(()) => {}
                Err(err @ MailSyncError::Persistence(_)) => return Err(err),
                Err(err) if err.is_session_lost() => {
                    report.messages_failed += 1;
                    if reconnected {
                        return Err(err);
                    }
                    warn!(folder = %folder.path, uid, error = %err, "sync session lost, reconnecting");
                    reconnected = true;
                    close_session(session.as_mut()).await;
                    *session = self.open_folder(account, &folder.path).await.map_err(|e| {
                        MailSyncError::Connection(format!(
                            "reconnect to {} failed, abandoning folder: {}",
                            folder.path, e
                        ))
                    })?;
                }
                Err(err) => {
                    warn!(folder = %folder.path, uid, error = %err, "sync message skipped");
                    report.messages_failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn store_message(
        &self,
        session: &mut dyn RemoteSession,
        folder: &Folder,
        uid: u32,
        known: &HashSet<u32>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let remote = session.fetch_message(uid).await?;
        let message = new_message(&remote, folder.id);
        let message_id = self.store.save_and_return_id(&message).await?;
        if !known.contains(&uid) {
            report.messages_new += 1;
        }

        let index = AttachmentIndex::new(self.store.as_attachment_store());
        for part in &remote.attachments {
            let recorded = index
                .record_if_absent(&NewAttachment {
                    message_id,
                    filename: part.filename.clone(),
                    mime_type: part.mime_type.clone(),
                    size: part.size,
                    part_number: part.part_number.clone(),
                })
                .await?;
            if recorded {
                report.attachments_recorded += 1;
            }
        }
        Ok(())
    }
}

async fn close_session(session: &mut dyn RemoteSession) {
    if let Err(err) = session.logout().await {
        debug!(error = %err, "imap logout failed");
    }
}

fn new_message(remote: &RemoteMessage, folder_id: i64) -> NewMessage {
    NewMessage {
        uid: remote.uid,
        message_id: remote.message_id.clone(),
        subject: remote.subject.clone(),
        sender: remote.sender.clone(),
        timestamp: remote
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        content: truncate_chars(&remote.body, MAX_CONTENT_CHARS),
        status: status_from_flags(&remote.flags),
        kind: kind_from_marker(remote.marker.as_deref()),
        folder_id,
    }
}

/// Deleted beats flagged, flagged beats seen.
pub fn status_from_flags(flags: &RemoteFlags) -> MessageStatus {
    if flags.deleted {
        MessageStatus::Deleted
    } else if flags.flagged {
        MessageStatus::Flagged
    } else if flags.seen {
        MessageStatus::Read
    } else {
        MessageStatus::Unread
    }
}

pub fn kind_from_marker(marker: Option<&str>) -> MessageKind {
    match marker {
        Some(value) if value.trim().eq_ignore_ascii_case(MARKER_SYSTEM) => MessageKind::System,
        _ => MessageKind::Personal,
    }
}
