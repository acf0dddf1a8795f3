use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mailsync_core::{Account, MailSyncError, Result, SyncLock};

use crate::matcher::FolderMatcher;
use crate::remote::MailConnector;
use crate::sync::{SyncEngine, SyncReport};

const MAIL_CMD_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum MailCommand {
    /// Run the engine for every configured account. Repeats are harmless.
    Sync { folders_only: bool },
    /// File a sent message in the account's Sent folder.
    Archive { account: String, raw: Vec<u8> },
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    pub account: String,
    pub tenant: i64,
    pub report: Option<SyncReport>,
    pub error: Option<String>,
}

/// Everything the worker needs to serve commands.
#[derive(Clone)]
pub struct WorkerContext {
    pub engine: SyncEngine,
    pub connector: Arc<dyn MailConnector>,
    pub accounts: Vec<Account>,
    pub lock: SyncLock,
}

impl WorkerContext {
    pub async fn handle(&self, cmd: MailCommand) {
        match cmd {
            MailCommand::Sync { folders_only } => match self.sync_all(folders_only).await {
                Ok(Some(outcomes)) => {
                    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
                    info!(accounts = outcomes.len(), failed, "worker sync done");
                }
                Ok(None) => {}
                Err(err) => error!(error = %err, "worker sync failed"),
            },
            MailCommand::Archive { account, raw } => {
                if let Err(err) = self.archive(&account, raw).await {
                    warn!(account = %account, error = %err, "archive to sent failed");
                }
            }
        }
    }

    /// Syncs every account with credentials under the system-wide lock.
    /// Returns `None` when another run holds the lock.
    pub async fn sync_all(&self, folders_only: bool) -> Result<Option<Vec<AccountOutcome>>> {
        let Some(_guard) = self.lock.try_acquire()? else {
            info!(lock = %self.lock.path().display(), "sync skipped, lock held");
            return Ok(None);
        };
        let mut outcomes = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            if !account.has_credentials() {
                info!(account = %account.name, "sync skip account without credentials");
                continue;
            }
            let outcome = match self.engine.sync(account, folders_only).await {
                Ok(report) => AccountOutcome {
                    account: account.name.clone(),
                    tenant: account.tenant,
                    report: Some(report),
                    error: None,
                },
                Err(err) => {
                    warn!(account = %account.name, error = %err, "sync account failed");
                    AccountOutcome {
                        account: account.name.clone(),
                        tenant: account.tenant,
                        report: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(Some(outcomes))
    }

    pub async fn archive(&self, account_name: &str, raw: Vec<u8>) -> Result<()> {
        let account = self
            .accounts
            .iter()
            .find(|a| a.name == account_name)
            .ok_or_else(|| MailSyncError::NotFound(format!("account {}", account_name)))?;
        let mut session = self.connector.connect(account).await?;
        let result = async {
            let folders = session.list_folders().await?;
            let sent = FolderMatcher::sent()
                .find(&folders)
                .ok_or_else(|| MailSyncError::NotFound("sent folder".to_string()))?;
            debug!(folder = %sent.path, bytes = raw.len(), "archive append");
            session.append(&sent.path, raw, true).await
        }
        .await;
        if let Err(err) = session.logout().await {
            debug!(error = %err, "imap logout failed");
        }
        result
    }
}

/// Handle to the background worker task.
#[derive(Clone)]
pub struct MailWorker {
    tx: mpsc::Sender<MailCommand>,
}

impl MailWorker {
    /// Spawns the consumer loop. It exits once every handle is dropped.
    pub fn start(ctx: WorkerContext) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<MailCommand>(MAIL_CMD_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                ctx.handle(cmd).await;
            }
            debug!("mail worker stopped");
        });
        (Self { tx }, handle)
    }

    pub fn send(&self, cmd: MailCommand) -> Result<()> {
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                debug!(?cmd, "mail cmd queue full, dropping");
                Err(MailSyncError::Queue("mail command queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(MailSyncError::Queue(
                "mail command queue closed".to_string(),
            )),
        }
    }
}
