//! Scripted in-memory server used by the engine, write-back and worker tests.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use mailsync_content::display_name_from_path;
use mailsync_core::{
    Account, Encryption, Endpoint, MailSyncError, Result, SqliteMailStore,
};

use crate::remote::{MailConnector, RemoteFlags, RemoteFolder, RemoteMessage, RemoteSession};

#[derive(Default)]
struct ServerState {
    folders: Vec<RemoteFolder>,
    messages: BTreeMap<String, BTreeMap<u32, (RemoteFlags, Vec<u8>)>>,
    refuse_connects: usize,
    refuse_after_drop: usize,
    drop_on_fetch: HashSet<u32>,
    hidden: HashSet<u32>,
    unselectable: HashSet<String>,
    connects: usize,
    fetched: Vec<(String, u32)>,
    appended: Vec<(String, Vec<u8>, bool)>,
    next_uid: u32,
}

#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut state = self.state.lock().expect("fake server poisoned");
        f(&mut state)
    }

    pub(crate) fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    pub(crate) fn add_folder(&self, path: &str, delimiter: Option<&str>) {
        let name = display_name_from_path(path, delimiter);
        self.add_folder_named(path, &name, delimiter);
    }

    pub(crate) fn add_folder_named(&self, path: &str, name: &str, delimiter: Option<&str>) {
        self.with(|s| {
            s.folders.push(RemoteFolder {
                path: path.to_string(),
                name: name.to_string(),
                delimiter: delimiter.map(|d| d.to_string()),
            });
            s.messages.entry(path.to_string()).or_default();
        });
    }

    pub(crate) fn rename_display(&self, path: &str, name: &str) {
        self.with(|s| {
            for folder in s.folders.iter_mut().filter(|f| f.path == path) {
                folder.name = name.to_string();
            }
        });
    }

    pub(crate) fn add_message(&self, path: &str, uid: u32, flags: RemoteFlags, raw: Vec<u8>) {
        self.with(|s| {
            s.messages
                .entry(path.to_string())
                .or_default()
                .insert(uid, (flags, raw));
            s.next_uid = s.next_uid.max(uid + 1);
        });
    }

    pub(crate) fn remove_message(&self, path: &str, uid: u32) {
        self.with(|s| {
            if let Some(folder) = s.messages.get_mut(path) {
                folder.remove(&uid);
            }
        });
    }

    pub(crate) fn uids(&self, path: &str) -> Vec<u32> {
        self.with(|s| {
            s.messages
                .get(path)
                .map(|m| m.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    pub(crate) fn remove_folder(&self, path: &str) {
        self.with(|s| {
            s.folders.retain(|f| f.path != path);
            s.messages.remove(path);
        });
    }

    /// Keeps the folder listed but makes `select_folder` fail on it.
    pub(crate) fn refuse_select(&self, path: &str) {
        self.with(|s| {
            s.unselectable.insert(path.to_string());
        });
    }

    pub(crate) fn refuse_connects(&self, count: usize) {
        self.with(|s| s.refuse_connects = count);
    }

    pub(crate) fn refuse_connects_after_drop(&self, count: usize) {
        self.with(|s| s.refuse_after_drop = count);
    }

    pub(crate) fn drop_session_on_fetch(&self, uid: u32) {
        self.with(|s| {
            s.drop_on_fetch.insert(uid);
        });
    }

    pub(crate) fn hide_on_fetch(&self, uid: u32) {
        self.with(|s| {
            s.hidden.insert(uid);
        });
    }

    pub(crate) fn connects(&self) -> usize {
        self.with(|s| s.connects)
    }

    pub(crate) fn fetched(&self) -> Vec<(String, u32)> {
        self.with(|s| s.fetched.clone())
    }

    pub(crate) fn appended(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.with(|s| s.appended.clone())
    }
}

pub(crate) struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl MailConnector for FakeConnector {
    async fn connect(&self, _account: &Account) -> Result<Box<dyn RemoteSession>> {
        let refused = self.server.with(|s| {
            if s.refuse_connects > 0 {
                s.refuse_connects -= 1;
                return true;
            }
            s.connects += 1;
            false
        });
        if refused {
            return Err(MailSyncError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            server: self.server.clone(),
            selected: None,
            alive: true,
        }))
    }
}

struct FakeSession {
    server: FakeServer,
    selected: Option<String>,
    alive: bool,
}

impl FakeSession {
    fn ensure_alive(&self) -> Result<()> {
        if self.alive {
            Ok(())
        } else {
            Err(MailSyncError::Connection("session dropped".to_string()))
        }
    }

    fn selected(&self) -> Result<String> {
        self.ensure_alive()?;
        self.selected
            .clone()
            .ok_or_else(|| MailSyncError::Folder("no folder selected".to_string()))
    }

    fn fetch(&mut self, uid: u32) -> Result<(RemoteFlags, Vec<u8>)> {
        let folder = self.selected()?;
        let dropped = self.server.with(|s| {
            if s.drop_on_fetch.remove(&uid) {
                s.refuse_connects = s.refuse_after_drop;
                return true;
            }
            s.fetched.push((folder.clone(), uid));
            false
        });
        if dropped {
            self.alive = false;
            return Err(MailSyncError::Connection("connection lost".to_string()));
        }
        self.server
            .with(|s| {
                if s.hidden.contains(&uid) {
                    return None;
                }
                s.messages.get(&folder).and_then(|m| m.get(&uid)).cloned()
            })
            .ok_or_else(|| MailSyncError::NotFound(format!("uid {}", uid)))
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>> {
        self.ensure_alive()?;
        Ok(self.server.with(|s| s.folders.clone()))
    }

    async fn select_folder(&mut self, path: &str) -> Result<()> {
        self.ensure_alive()?;
        let exists = self
            .server
            .with(|s| s.messages.contains_key(path) && !s.unselectable.contains(path));
        if !exists {
            return Err(MailSyncError::Folder(format!("{}: no such mailbox", path)));
        }
        self.selected = Some(path.to_string());
        Ok(())
    }

    async fn list_uids(&mut self) -> Result<HashSet<u32>> {
        let folder = self.selected()?;
        Ok(self
            .server
            .with(|s| {
                s.messages
                    .get(&folder)
                    .map(|m| m.keys().copied().collect())
            })
            .unwrap_or_default())
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<RemoteMessage> {
        let (flags, raw) = self.fetch(uid)?;
        RemoteMessage::from_raw(uid, flags, &raw)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        Ok(self.fetch(uid)?.1)
    }

    async fn move_message(&mut self, uid: u32, target_path: &str) -> Result<()> {
        let folder = self.selected()?;
        self.server.with(|s| {
            if !s.messages.contains_key(target_path) {
                return Err(MailSyncError::Folder(format!("{}: no such mailbox", target_path)));
            }
            let entry = s
                .messages
                .get_mut(&folder)
                .and_then(|m| m.remove(&uid))
                .ok_or_else(|| MailSyncError::NotFound(format!("uid {}", uid)))?;
            let new_uid = s.next_uid.max(1);
            s.next_uid = new_uid + 1;
            s.messages
                .entry(target_path.to_string())
                .or_default()
                .insert(new_uid, entry);
            Ok(())
        })
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        let folder = self.selected()?;
        self.server.with(|s| {
            s.messages
                .get_mut(&folder)
                .and_then(|m| m.remove(&uid))
                .map(|_| ())
                .ok_or_else(|| MailSyncError::NotFound(format!("uid {}", uid)))
        })
    }

    async fn append(&mut self, folder_path: &str, raw: Vec<u8>, seen: bool) -> Result<()> {
        self.ensure_alive()?;
        self.server.with(|s| {
            if !s.messages.contains_key(folder_path) {
                return Err(MailSyncError::Folder(format!("{}: no such mailbox", folder_path)));
            }
            s.appended.push((folder_path.to_string(), raw, seen));
            Ok(())
        })
    }

    async fn logout(&mut self) -> Result<()> {
        self.alive = false;
        Ok(())
    }
}

pub(crate) fn test_account() -> Account {
    Account {
        name: "Main".to_string(),
        username: "shop@example.com".to_string(),
        password: "secret".to_string(),
        sender_name: "Example Shop".to_string(),
        imap: Endpoint {
            host: "imap.example.com".to_string(),
            port: 993,
            encryption: Encryption::Ssl,
            skip_tls_verify: false,
        },
        smtp: Some(Endpoint {
            host: "smtp.example.com".to_string(),
            port: 465,
            encryption: Encryption::Ssl,
            skip_tls_verify: false,
        }),
        tenant: 7,
    }
}

pub(crate) fn raw_message(subject: &str) -> Vec<u8> {
    format!(
        concat!(
            "From: Alice <alice@example.com>\r\n",
            "To: shop@example.com\r\n",
            "Subject: {subject}\r\n",
            "Message-ID: <{subject}@example.com>\r\n",
            "Date: Tue, 14 Nov 2023 10:00:00 +0000\r\n",
            "\r\n",
            "Body of {subject}.\r\n",
        ),
        subject = subject
    )
    .into_bytes()
}

pub(crate) fn raw_with_attachment(subject: &str) -> Vec<u8> {
    format!(
        concat!(
            "From: billing@example.com\r\n",
            "Subject: {subject}\r\n",
            "Message-ID: <{subject}@example.com>\r\n",
            "Date: Tue, 14 Nov 2023 10:00:00 +0000\r\n",
            "X-Mailsync-Type: system\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "See attached.\r\n",
            "--b1\r\n",
            "Content-Type: application/pdf; name=\"{subject}.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"{subject}.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERi0xLjQ=\r\n",
            "--b1--\r\n",
        ),
        subject = subject
    )
    .into_bytes()
}

fn temp_db_path(tag: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "mailsync-mail-{}-{}-{}.db",
        tag,
        std::process::id(),
        ts
    ))
}

pub(crate) async fn test_store(tag: &str) -> anyhow::Result<(SqliteMailStore, PathBuf)> {
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
