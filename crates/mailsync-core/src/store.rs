use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions};
use tracing::debug;

use crate::{
    Attachment, Folder, Message, MessageKind, MessageStatus, NewAttachment, NewMessage, Result,
};

// SQLite caps bound parameters per statement; stay well under the limit.
const DELETE_CHUNK: usize = 500;

type MessageRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
);

const MESSAGE_COLUMNS: &str =
    "id, folder_id, uid, message_id, subject, sender, date_ts, content, status, message_type";

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts the message unless `(uid, folder_id)` already exists; either way
    /// returns the row id. Existing rows are never refreshed.
    async fn save_and_return_id(&self, message: &NewMessage) -> Result<i64>;
    async fn update_status(&self, uid: u32, folder_id: i64, status: MessageStatus) -> Result<()>;
    async fn uids_by_folder(&self, folder_id: i64) -> Result<HashSet<u32>>;
    async fn delete_by_uids(&self, uids: &[u32], folder_id: i64) -> Result<u64>;
    async fn message(&self, id: i64) -> Result<Option<Message>>;
    async fn list_messages(&self, folder_id: Option<i64>, limit: i64) -> Result<Vec<Message>>;
    async fn delete_message(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait FolderStore: Send + Sync {
    async fn folder_by_path(&self, path: &str, tenant: i64) -> Result<Option<Folder>>;
    async fn create_folder(
        &self,
        path: &str,
        name: &str,
        delimiter: Option<&str>,
        tenant: i64,
    ) -> Result<Folder>;
    async fn rename_folder(&self, id: i64, name: &str) -> Result<()>;
    async fn folder(&self, id: i64) -> Result<Option<Folder>>;
    async fn list_folders(&self, tenant: Option<i64>) -> Result<Vec<Folder>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn attachment_exists(&self, message_id: i64, part_number: &str) -> Result<bool>;
    async fn insert_attachment(&self, attachment: &NewAttachment) -> Result<i64>;
    async fn attachments_for_message(&self, message_id: i64) -> Result<Vec<Attachment>>;
    async fn attachment(&self, id: i64) -> Result<Option<Attachment>>;
}

/// The full repository surface the sync engine and write-back work against.
/// Narrow views are handed to helpers that need only one of them.
pub trait MailStore: MessageStore + FolderStore + AttachmentStore {
    fn as_folder_store(&self) -> &dyn FolderStore;
    fn as_attachment_store(&self) -> &dyn AttachmentStore;
}

impl<T: MessageStore + FolderStore + AttachmentStore> MailStore for T {
    fn as_folder_store(&self) -> &dyn FolderStore {
        self
    }

    fn as_attachment_store(&self) -> &dyn AttachmentStore {
        self
    }
}

#[derive(Clone)]
pub struct SqliteMailStore {
    pool: SqlitePool,
}

impl SqliteMailStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{}", path)
        };
        let options = SqliteConnectOptions::new()
            .filename(url.trim_start_matches("sqlite:"))
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Deletes folders (and through them messages and attachments) for one
    /// tenant, or for every tenant when `tenant` is `None`.
    pub async fn clear_tenant_data(&self, tenant: Option<i64>) -> Result<u64> {
        let result = match tenant {
            Some(tenant) => {
                sqlx::query("DELETE FROM folders WHERE tenant = ?")
                    .bind(tenant)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM folders").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    pub async fn count_messages(&self, folder_id: Option<i64>) -> Result<i64> {
        let row = match folder_id {
            Some(folder_id) => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM messages WHERE folder_id = ?")
                    .bind(folder_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM messages")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.0)
    }

    pub async fn count_attachments(&self, message_id: i64) -> Result<i64> {
        let row =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM attachments WHERE message_id = ?")
                .bind(message_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn message_by_uid(&self, uid: u32, folder_id: i64) -> Result<Option<i64>> {
        let row =
            sqlx::query_as::<_, (i64,)>("SELECT id FROM messages WHERE uid = ? AND folder_id = ?")
                .bind(uid as i64)
                .bind(folder_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: row.0,
        folder_id: row.1,
        uid: row.2 as u32,
        message_id: row.3,
        subject: row.4,
        sender: row.5,
        timestamp: row.6,
        content: row.7,
        status: MessageStatus::parse(&row.8).unwrap_or(MessageStatus::Unread),
        kind: MessageKind::parse(&row.9).unwrap_or(MessageKind::Personal),
    }
}

fn folder_from_row(row: (i64, String, String, Option<String>, i64)) -> Folder {
    Folder {
        id: row.0,
        path: row.1,
        display_name: row.2,
        delimiter: row.3,
        tenant: row.4,
    }
}

fn attachment_from_row(row: (i64, i64, String, String, i64, String)) -> Attachment {
    Attachment {
        id: row.0,
        message_id: row.1,
        filename: row.2,
        mime_type: row.3,
        size: row.4.max(0) as u64,
        part_number: row.5,
    }
}

#[async_trait]
impl MessageStore for SqliteMailStore {
    async fn save_and_return_id(&self, message: &NewMessage) -> Result<i64> {
        if let Some(id) = self.message_by_uid(message.uid, message.folder_id).await? {
            return Ok(id);
        }
        // Another writer may have inserted between the lookup and here; the
        // unique key turns that into a no-op and the re-read returns its id.
        sqlx::query(
            "INSERT INTO messages (folder_id, uid, message_id, subject, sender, date_ts, content, status, message_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(uid, folder_id) DO NOTHING",
        )
        .bind(message.folder_id)
        .bind(message.uid as i64)
        .bind(&message.message_id)
        .bind(&message.subject)
        .bind(&message.sender)
        .bind(message.timestamp)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.kind.as_str())
        .execute(&self.pool)
        .await?;
        self.message_by_uid(message.uid, message.folder_id)
            .await?
            .ok_or_else(|| {
                crate::MailSyncError::Persistence(format!(
                    "message uid={} folder={} missing after insert",
                    message.uid, message.folder_id
                ))
            })
    }

    async fn update_status(&self, uid: u32, folder_id: i64, status: MessageStatus) -> Result<()> {
        sqlx::query("UPDATE messages SET status = ? WHERE uid = ? AND folder_id = ?")
            .bind(status.as_str())
            .bind(uid as i64)
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn uids_by_folder(&self, folder_id: i64) -> Result<HashSet<u32>> {
        let rows = sqlx::query_as::<_, (i64,)>("SELECT uid FROM messages WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0 as u32).collect())
    }

    async fn delete_by_uids(&self, uids: &[u32], folder_id: i64) -> Result<u64> {
        let mut deleted = 0;
        for chunk in uids.chunks(DELETE_CHUNK) {
            let query = format!(
                "DELETE FROM messages WHERE folder_id = ? AND uid IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&query).bind(folder_id);
            for uid in chunk {
                q = q.bind(*uid as i64);
            }
            deleted += q.execute(&self.pool).await?.rows_affected();
        }
        debug!(folder_id, deleted, "store delete_by_uids");
        Ok(deleted)
    }

    async fn message(&self, id: i64) -> Result<Option<Message>> {
        let query = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(message_from_row))
    }

    async fn list_messages(&self, folder_id: Option<i64>, limit: i64) -> Result<Vec<Message>> {
        let mut query = format!("SELECT {} FROM messages", MESSAGE_COLUMNS);
        if folder_id.is_some() {
            query.push_str(" WHERE folder_id = ?");
        }
        query.push_str(" ORDER BY date_ts DESC, id DESC LIMIT ?");
        let mut q = sqlx::query_as::<_, MessageRow>(&query);
        if let Some(folder_id) = folder_id {
            q = q.bind(folder_id);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn delete_message(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FolderStore for SqliteMailStore {
    async fn folder_by_path(&self, path: &str, tenant: i64) -> Result<Option<Folder>> {
        let row = sqlx::query_as::<_, (i64, String, String, Option<String>, i64)>(
            "SELECT id, path, name, delimiter, tenant FROM folders WHERE path = ? AND tenant = ?",
        )
        .bind(path)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(folder_from_row))
    }

    async fn create_folder(
        &self,
        path: &str,
        name: &str,
        delimiter: Option<&str>,
        tenant: i64,
    ) -> Result<Folder> {
        let result = sqlx::query(
            "INSERT INTO folders (path, name, delimiter, tenant) VALUES (?, ?, ?, ?)",
        )
        .bind(path)
        .bind(name)
        .bind(delimiter)
        .bind(tenant)
        .execute(&self.pool)
        .await?;
        Ok(Folder {
            id: result.last_insert_rowid(),
            path: path.to_string(),
            display_name: name.to_string(),
            delimiter: delimiter.map(|d| d.to_string()),
            tenant,
        })
    }

    async fn rename_folder(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE folders SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn folder(&self, id: i64) -> Result<Option<Folder>> {
        let row = sqlx::query_as::<_, (i64, String, String, Option<String>, i64)>(
            "SELECT id, path, name, delimiter, tenant FROM folders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(folder_from_row))
    }

    async fn list_folders(&self, tenant: Option<i64>) -> Result<Vec<Folder>> {
        let mut query = String::from("SELECT id, path, name, delimiter, tenant FROM folders");
        if tenant.is_some() {
            query.push_str(" WHERE tenant = ?");
        }
        query.push_str(" ORDER BY path, id");
        let mut q = sqlx::query_as::<_, (i64, String, String, Option<String>, i64)>(&query);
        if let Some(tenant) = tenant {
            q = q.bind(tenant);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(folder_from_row).collect())
    }
}

#[async_trait]
impl AttachmentStore for SqliteMailStore {
    async fn attachment_exists(&self, message_id: i64, part_number: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM attachments WHERE message_id = ? AND part_number = ?",
        )
        .bind(message_id)
        .bind(part_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_attachment(&self, attachment: &NewAttachment) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO attachments (message_id, filename, mime_type, size, part_number)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(attachment.message_id)
        .bind(&attachment.filename)
        .bind(&attachment.mime_type)
        .bind(attachment.size as i64)
        .bind(&attachment.part_number)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn attachments_for_message(&self, message_id: i64) -> Result<Vec<Attachment>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, i64, String)>(
            "SELECT id, message_id, filename, mime_type, size, part_number
             FROM attachments WHERE message_id = ? ORDER BY part_number",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(attachment_from_row).collect())
    }

    async fn attachment(&self, id: i64) -> Result<Option<Attachment>> {
        let row = sqlx::query_as::<_, (i64, i64, String, String, i64, String)>(
            "SELECT id, message_id, filename, mime_type, size, part_number
             FROM attachments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(attachment_from_row))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{AttachmentStore, FolderStore, MessageStore, SqliteMailStore};
    use crate::{MessageKind, MessageStatus, NewAttachment, NewMessage};

    pub(crate) fn temp_db_path(tag: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "mailsync-core-{}-{}-{}.db",
            tag,
            std::process::id(),
            ts
        ))
    }

    pub(crate) async fn fresh_store(tag: &str) -> anyhow::Result<(SqliteMailStore, PathBuf)> {
        let db_path = temp_db_path(tag);
        let _ = std::fs::remove_file(&db_path);
        let store = SqliteMailStore::connect(
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("invalid temp db path"))?,
        )
        .await?;
        store.init().await?;
        Ok((store, db_path))
    }

    fn new_message(uid: u32, folder_id: i64, subject: &str) -> NewMessage {
        NewMessage {
            uid,
            message_id: format!("<{}@example.com>", uid),
            subject: subject.to_string(),
            sender: "alice@example.com".to_string(),
            timestamp: 1_700_000_000 + uid as i64,
            content: "hello".to_string(),
            status: MessageStatus::Unread,
            kind: MessageKind::Personal,
            folder_id,
        }
    }

    #[tokio::test]
    async fn init_creates_unique_keys_for_reconciliation() -> anyhow::Result<()> {
        let (store, db_path) = fresh_store("schema").await?;

        let indexes = sqlx::query_as::<_, (String,)>(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name IN ('folders', 'messages', 'attachments')",
        )
        .fetch_all(&store.pool)
        .await?;
        let ddl = indexes
            .into_iter()
            .map(|r| r.0)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(ddl.contains("UNIQUE (path, tenant)"));
        assert!(ddl.contains("UNIQUE (uid, folder_id)"));
        assert!(ddl.contains("UNIQUE (message_id, part_number)"));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[tokio::test]
    async fn save_is_idempotent_and_never_refreshes() -> anyhow::Result<()> {
        let (store, db_path) = fresh_store("save").await?;
        let folder = store.create_folder("INBOX", "INBOX", Some("/"), 1).await?;

        let first = store
            .save_and_return_id(&new_message(10, folder.id, "Original"))
            .await?;
        let second = store
            .save_and_return_id(&new_message(10, folder.id, "Edited"))
            .await?;
        assert_eq!(first, second);
        assert_eq!(store.count_messages(Some(folder.id)).await?, 1);

        let stored = store
            .message(first)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing message"))?;
        assert_eq!(stored.subject, "Original");

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[tokio::test]
    async fn delete_by_uids_only_touches_named_rows_in_folder() -> anyhow::Result<()> {
        let (store, db_path) = fresh_store("prune").await?;
        let inbox = store.create_folder("INBOX", "INBOX", Some("/"), 1).await?;
        let archive = store.create_folder("Archive", "Archive", Some("/"), 1).await?;
        for uid in [10, 11, 12] {
            store
                .save_and_return_id(&new_message(uid, inbox.id, "m"))
                .await?;
        }
        store
            .save_and_return_id(&new_message(10, archive.id, "m"))
            .await?;

        let deleted = store.delete_by_uids(&[10], inbox.id).await?;
        assert_eq!(deleted, 1);
        assert_eq!(
            store.uids_by_folder(inbox.id).await?,
            HashSet::from([11, 12])
        );
        assert_eq!(store.uids_by_folder(archive.id).await?, HashSet::from([10]));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[tokio::test]
    async fn update_status_overwrites_by_uid_and_folder() -> anyhow::Result<()> {
        let (store, db_path) = fresh_store("status").await?;
        let folder = store.create_folder("INBOX", "INBOX", None, 0).await?;
        let id = store
            .save_and_return_id(&new_message(5, folder.id, "m"))
            .await?;

        store
            .update_status(5, folder.id, MessageStatus::Answered)
            .await?;
        let stored = store
            .message(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing message"))?;
        assert_eq!(stored.status, MessageStatus::Answered);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[tokio::test]
    async fn clearing_a_tenant_cascades_to_messages_and_attachments() -> anyhow::Result<()> {
        let (store, db_path) = fresh_store("reset").await?;
        let mine = store.create_folder("INBOX", "INBOX", None, 1).await?;
        let theirs = store.create_folder("INBOX", "INBOX", None, 2).await?;
        let id = store
            .save_and_return_id(&new_message(1, mine.id, "m"))
            .await?;
        store
            .insert_attachment(&NewAttachment {
                message_id: id,
                filename: "a.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size: 10,
                part_number: "2".to_string(),
            })
            .await?;
        store
            .save_and_return_id(&new_message(1, theirs.id, "m"))
            .await?;

        assert_eq!(store.clear_tenant_data(Some(1)).await?, 1);
        assert!(store.folder(mine.id).await?.is_none());
        assert_eq!(store.count_attachments(id).await?, 0);
        assert_eq!(store.count_messages(None).await?, 1);
        assert_eq!(store.list_folders(None).await?.len(), 1);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
