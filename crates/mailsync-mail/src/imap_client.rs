use std::collections::HashSet;

use async_trait::async_trait;
use imap::{ClientBuilder, ConnectionMode};
use tracing::debug;

use mailsync_content::display_name_from_path;
use mailsync_core::{Account, Encryption, Endpoint, MailSyncError, Result};

use crate::remote::{MailConnector, RemoteFlags, RemoteFolder, RemoteMessage, RemoteSession};

type ImapSessionInner = imap::Session<imap::Connection>;

/// Connects over the blocking `imap` client, one call per blocking task.
#[derive(Debug, Clone, Default)]
pub struct ImapConnector;

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(&self, account: &Account) -> Result<Box<dyn RemoteSession>> {
        let endpoint = account.imap.clone();
        let username = account.username.clone();
        let password = account.password.clone();
        let session = tokio::task::spawn_blocking(move || {
            imap_connect(&endpoint, &username, &password)
        })
        .await
        .map_err(|e| MailSyncError::Connection(format!("imap connect task failed: {}", e)))??;
        Ok(Box::new(ImapSession {
            inner: Some(session),
        }))
    }
}

pub struct ImapSession {
    inner: Option<ImapSessionInner>,
}

impl ImapSession {
    // Moves the session into a blocking task and back. A lost connection
    // leaves the session empty so later calls fail fast.
    async fn run<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ImapSessionInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self
            .inner
            .take()
            .ok_or_else(|| MailSyncError::Connection("imap session closed".to_string()))?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailSyncError::Connection(format!("imap task failed: {}", e)))?;
        match &result {
            Err(err) if err.is_session_lost() => {}
            _ => self.inner = Some(session),
        }
        result
    }
}

#[async_trait]
impl RemoteSession for ImapSession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>> {
        self.run(fetch_imap_folders).await
    }

    async fn select_folder(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.run(move |session| {
            debug!(folder = %path, "imap select");
            session
                .select(&path)
                .map_err(|e| map_imap_error(e, |m| MailSyncError::Folder(format!("{}: {}", path, m))))?;
            Ok(())
        })
        .await
    }

    async fn list_uids(&mut self) -> Result<HashSet<u32>> {
        self.run(|session| {
            session
                .uid_search("ALL")
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))
        })
        .await
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<RemoteMessage> {
        let (flags, raw) = self.run(move |session| fetch_imap_full(session, uid)).await?;
        RemoteMessage::from_raw(uid, flags, &raw)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        let (_, raw) = self.run(move |session| fetch_imap_full(session, uid)).await?;
        Ok(raw)
    }

    async fn move_message(&mut self, uid: u32, target_path: &str) -> Result<()> {
        let target = target_path.to_string();
        self.run(move |session| {
            let uid_set = uid.to_string();
            session
                .uid_copy(&uid_set, &target)
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            session
                .uid_store(&uid_set, "+FLAGS.SILENT (\\Deleted)")
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            session
                .expunge()
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            Ok(())
        })
        .await
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        self.run(move |session| {
            session
                .uid_store(uid.to_string(), "+FLAGS.SILENT (\\Deleted)")
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            session
                .expunge()
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            Ok(())
        })
        .await
    }

    async fn append(&mut self, folder_path: &str, raw: Vec<u8>, seen: bool) -> Result<()> {
        let folder = folder_path.to_string();
        self.run(move |session| {
            let mut cmd = session.append(&folder, &raw);
            if seen {
                cmd.flag(imap::types::Flag::Seen);
            }
            cmd.finish()
                .map_err(|e| map_imap_error(e, MailSyncError::Folder))?;
            Ok(())
        })
        .await
    }

    async fn logout(&mut self) -> Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        let result = self
            .run(|session| {
                session
                    .logout()
                    .map_err(|e| map_imap_error(e, MailSyncError::Connection))
            })
            .await;
        self.inner = None;
        result
    }
}

fn imap_connect(endpoint: &Endpoint, username: &str, password: &str) -> Result<ImapSessionInner> {
    debug!(host = %endpoint.host, port = endpoint.port, "imap_connect start");
    let mode = match endpoint.encryption {
        Encryption::Ssl => ConnectionMode::Tls,
        Encryption::StartTls => ConnectionMode::StartTls,
        Encryption::None => ConnectionMode::Plaintext,
    };
    let client = ClientBuilder::new(endpoint.host.as_str(), endpoint.port)
        .tls_kind(imap::TlsKind::Native)
        .mode(mode)
        .danger_skip_tls_verify(endpoint.skip_tls_verify)
        .connect()
        .map_err(|e| MailSyncError::Connection(format!("{}:{}: {}", endpoint.host, endpoint.port, e)))?;
    debug!("imap_connect tcp connected");
    let session = client
        .login(username, password)
        .map_err(|e| MailSyncError::Connection(format!("login failed: {}", e.0)))?;
    debug!("imap_connect login ok");
    Ok(session)
}

fn fetch_imap_folders(session: &mut ImapSessionInner) -> Result<Vec<RemoteFolder>> {
    let list = session
        .list(None, Some("*"))
        .map_err(|e| map_imap_error(e, MailSyncError::Connection))?;
    debug!(raw_count = list.len(), "imap_fetch_folders");
    let mut folders = Vec::new();
    for folder in list.iter() {
        if folder
            .attributes()
            .iter()
            .any(|attr| matches!(attr, imap_proto::NameAttribute::NoSelect))
        {
            continue;
        }
        let path = folder.name().to_string();
        let delimiter = folder.delimiter().map(|d| d.to_string());
        let name = display_name_from_path(&path, delimiter.as_deref());
        folders.push(RemoteFolder {
            path,
            name,
            delimiter,
        });
    }
    Ok(folders)
}

fn fetch_imap_full(session: &mut ImapSessionInner, uid: u32) -> Result<(RemoteFlags, Vec<u8>)> {
    let fetches = session
        .uid_fetch(uid.to_string(), "(UID FLAGS BODY.PEEK[])")
        .map_err(|e| map_imap_error(e, MailSyncError::MessageFetch))?;
    let fetch = fetches
        .iter()
        .find(|f| f.uid == Some(uid) && f.body().is_some())
        .ok_or_else(|| MailSyncError::NotFound(format!("uid {}", uid)))?;
    let mut flags = RemoteFlags::default();
    for flag in fetch.flags().iter() {
        match flag {
            imap::types::Flag::Seen => flags.seen = true,
            imap::types::Flag::Flagged => flags.flagged = true,
            imap::types::Flag::Deleted => flags.deleted = true,
            imap::types::Flag::Answered => flags.answered = true,
            _ => {}
        }
    }
    let raw = fetch.body().map(|b| b.to_vec()).unwrap_or_default();
    Ok((flags, raw))
}

fn map_imap_error<F>(err: imap::Error, otherwise: F) -> MailSyncError
where
    F: FnOnce(String) -> MailSyncError,
{
    if is_connection_lost(&err) {
        return MailSyncError::Connection(err.to_string());
    }
    otherwise(err.to_string())
}

fn is_connection_lost(err: &imap::Error) -> bool {
    if matches!(err, imap::Error::Io(_) | imap::Error::ConnectionLost) {
        return true;
    }
    let text = err.to_string().to_lowercase();
    text.contains("bye response") || text.contains("connection reset")
}
