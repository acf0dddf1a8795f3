use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{info, warn};

use mailsync_core::{
    Account, AttachmentStore, FolderStore, MessageStore, SqliteMailStore, SyncLock,
};
use mailsync_mail::{
    ImapConnector, LettreSubmitter, MailCommand, MailConnector, MailWorker, MailWriteback,
    OutgoingMessage, SyncEngine, WorkerContext,
};

use crate::cli::{
    AttachmentCommand, CliCommand, FoldersCommand, MessageCommand, MessagesCommand, SyncCmd,
    WorkerCmd,
};
use crate::cli_runtime_helpers::{
    message_summary_json, output_error, output_ok, read_attachments, resolve_account,
    resolve_account_for_tenant,
};
use crate::config::AppConfig;

const SYNC_BUSY: &str = "sync already running";

struct Services {
    store: SqliteMailStore,
    connector: Arc<dyn MailConnector>,
    engine: SyncEngine,
    lock: SyncLock,
}

impl Services {
    fn new(store: SqliteMailStore, config: &AppConfig) -> Self {
        let connector: Arc<dyn MailConnector> = Arc::new(ImapConnector);
        let engine = SyncEngine::new(store.clone(), connector.clone(), config.sync.options());
        let lock = SyncLock::new(config.sync.lock_path.clone()).with_stale_after(config.sync.lock_stale);
        Self {
            store,
            connector,
            engine,
            lock,
        }
    }

    fn worker_context(&self, accounts: Vec<Account>) -> WorkerContext {
        WorkerContext {
            engine: self.engine.clone(),
            connector: self.connector.clone(),
            accounts,
            lock: self.lock.clone(),
        }
    }

    fn writeback(&self) -> MailWriteback {
        MailWriteback::new(
            self.store.clone(),
            self.connector.clone(),
            Arc::new(LettreSubmitter),
        )
    }

    async fn tenant_of_message(&self, message_id: i64) -> Result<i64> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or_else(|| anyhow!("Message {} not found", message_id))?;
        let folder = self
            .store
            .folder(message.folder_id)
            .await?
            .ok_or_else(|| anyhow!("Folder {} not found", message.folder_id))?;
        Ok(folder.tenant)
    }
}

pub(crate) fn run_cli(
    rt: &tokio::runtime::Runtime,
    command: CliCommand,
    config: &AppConfig,
    store: SqliteMailStore,
) -> Result<()> {
    let services = Services::new(store, config);

    match command {
        CliCommand::Sync(args) => rt.block_on(run_sync(&services, config, args)),
        CliCommand::Folders(cmd) => match cmd.command {
            FoldersCommand::List(args) => {
                let tenant = match args.account.as_deref() {
                    Some(name) => Some(resolve_account(config, Some(name))?.tenant),
                    None => None,
                };
                let folders = rt.block_on(services.store.list_folders(tenant))?;
                output_ok(json!(folders))
            }
        },
        CliCommand::Messages(cmd) => match cmd.command {
            MessagesCommand::List(args) => {
                let messages =
                    rt.block_on(services.store.list_messages(args.folder, args.limit.max(1)))?;
                let out: Vec<_> = messages.iter().map(message_summary_json).collect();
                output_ok(json!(out))
            }
        },
        CliCommand::Message(cmd) => match cmd.command {
            MessageCommand::Get(args) => rt.block_on(async {
                let Some(message) = services.store.message(args.id).await? else {
                    return output_error("Message not found");
                };
                let attachments = services.store.attachments_for_message(message.id).await?;
                let mut out = message_summary_json(&message);
                out["content"] = json!(message.content);
                out["attachments"] = json!(attachments);
                output_ok(out)
            }),
            MessageCommand::Move(args) => rt.block_on(async {
                let tenant = services.tenant_of_message(args.id).await?;
                let account = resolve_account_for_tenant(config, args.account.as_deref(), tenant)?;
                services
                    .writeback()
                    .move_message(account, args.id, args.folder)
                    .await?;
                output_ok(json!({ "moved": args.id, "folder": args.folder }))
            }),
            MessageCommand::Delete(args) => rt.block_on(async {
                let tenant = services.tenant_of_message(args.id).await?;
                let account = resolve_account_for_tenant(config, args.account.as_deref(), tenant)?;
                services.writeback().delete_message(account, args.id).await?;
                output_ok(json!({ "deleted": args.id }))
            }),
            MessageCommand::Reply(args) => rt.block_on(async {
                let tenant = services.tenant_of_message(args.id).await?;
                let account = resolve_account_for_tenant(config, args.account.as_deref(), tenant)?;
                let attachments = read_attachments(&args.attach)?;
                let sent = with_archive(&services, config, |writeback| async move {
                    writeback
                        .reply(account, args.id, &args.body, attachments)
                        .await
                })
                .await?;
                output_ok(json!(sent))
            }),
        },
        CliCommand::Send(args) => rt.block_on(async {
            let account = resolve_account(config, args.account.as_deref())?;
            let outgoing = OutgoingMessage {
                to: args.to,
                subject: args.subject,
                body: args.body,
                attachments: read_attachments(&args.attach)?,
                system: args.system,
            };
            let sent = with_archive(&services, config, |writeback| async move {
                writeback.send(account, &outgoing).await
            })
            .await?;
            output_ok(json!(sent))
        }),
        CliCommand::Attachment(cmd) => match cmd.command {
            AttachmentCommand::Download(args) => rt.block_on(async {
                let attachment = services
                    .store
                    .attachment(args.id)
                    .await?
                    .ok_or_else(|| anyhow!("Attachment {} not found", args.id))?;
                let tenant = services.tenant_of_message(attachment.message_id).await?;
                let account = resolve_account_for_tenant(config, args.account.as_deref(), tenant)?;
                let data = services
                    .writeback()
                    .download_attachment(account, args.id)
                    .await?;
                let path = Path::new(&args.path);
                tokio::fs::write(path, &data.data).await?;
                output_ok(json!({
                    "id": args.id,
                    "filename": data.filename,
                    "mime_type": data.mime_type,
                    "size": data.data.len(),
                    "path": path.display().to_string(),
                }))
            }),
        },
        CliCommand::Reset(args) => {
            if !args.yes {
                return output_error("Reset deletes mirrored data, pass --yes to confirm");
            }
            let tenant = match args.account.as_deref() {
                Some(name) => Some(resolve_account(config, Some(name))?.tenant),
                None => None,
            };
            let Some(_guard) = services.lock.try_acquire()? else {
                return output_error(SYNC_BUSY);
            };
            let removed = rt.block_on(services.store.clear_tenant_data(tenant))?;
            info!(?tenant, removed, "mirror reset");
            output_ok(json!({ "tenant": tenant, "folders_removed": removed }))
        }
        CliCommand::Trigger(args) => rt.block_on(async {
            let ctx = services.worker_context(config.accounts.clone());
            let (worker, handle) = MailWorker::start(ctx);
            worker.send(MailCommand::Sync {
                folders_only: args.folders_only,
            })?;
            drop(worker);
            handle.await?;
            output_ok(json!({ "triggered": true, "folders_only": args.folders_only }))
        }),
        CliCommand::Worker(args) => rt.block_on(run_worker(&services, config, args)),
    }
}

async fn run_sync(services: &Services, config: &AppConfig, args: SyncCmd) -> Result<()> {
    let accounts = if args.all {
        config.accounts.clone()
    } else {
        let account = resolve_account(config, args.account.as_deref())?;
        if !account.has_credentials() {
            return output_error(&format!("Account {} has no credentials", account.name));
        }
        vec![account.clone()]
    };
    let ctx = services.worker_context(accounts);
    match ctx.sync_all(args.folders_only).await? {
        Some(outcomes) => output_ok(json!(outcomes)),
        None => output_error(SYNC_BUSY),
    }
}

/// Runs a send with a short-lived worker that files the result in Sent.
async fn with_archive<F, Fut, T>(services: &Services, config: &AppConfig, op: F) -> Result<T>
where
    F: FnOnce(MailWriteback) -> Fut,
    Fut: Future<Output = mailsync_core::Result<T>>,
{
    let ctx = services.worker_context(config.accounts.clone());
    let (worker, handle) = MailWorker::start(ctx);
    let result = op(services.writeback().with_archive(worker)).await;
    // The writeback owned the only sender, so the worker drains and stops.
    if let Err(err) = handle.await {
        warn!(error = %err, "archive worker aborted");
    }
    Ok(result?)
}

async fn run_worker(services: &Services, config: &AppConfig, args: WorkerCmd) -> Result<()> {
    let ctx = services.worker_context(config.accounts.clone());
    let (worker, handle) = MailWorker::start(ctx);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    info!(interval_secs = args.interval_secs, "worker started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = worker.send(MailCommand::Sync { folders_only: args.folders_only }) {
                    warn!(error = %err, "sync trigger dropped");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("worker shutting down");
                break;
            }
        }
    }
    drop(worker);
    handle.await?;
    output_ok(json!({ "stopped": true }))
}
