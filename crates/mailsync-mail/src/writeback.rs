use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{
        Attachment, Mailbox, Message, MultiPart, SinglePart,
        header::{ContentType, Header, HeaderName, HeaderValue},
    },
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use mailparse::{MailAddr, addrparse};
use serde::Serialize;
use tracing::{debug, info, warn};

use mailsync_content::{AttachmentData, MARKER_HEADER, MARKER_SYSTEM, attachment_data};
use mailsync_core::{
    Account, AttachmentStore, Encryption, Folder, FolderStore, MailStore, MailSyncError,
    Message as StoredMessage, MessageStatus, MessageStore, Result,
};

use crate::matcher::FolderMatcher;
use crate::remote::{MailConnector, RemoteFolder, RemoteSession};
use crate::worker::{MailCommand, MailWorker};

static MESSAGE_ID_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<OutgoingAttachment>,
    /// Stamp the message as system-generated so a later sync classifies it.
    pub system: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub message_id: String,
    pub subject: String,
    pub to: String,
}

/// `X-Mailsync-Type` header carried by system mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailsyncType(String);

impl MailsyncType {
    pub fn system() -> Self {
        Self(MARKER_SYSTEM.to_string())
    }
}

impl Header for MailsyncType {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(MARKER_HEADER)
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Hands a finished message to the outbound transport.
#[async_trait]
pub trait MailSubmitter: Send + Sync {
    async fn submit(&self, account: &Account, message: Message) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LettreSubmitter;

#[async_trait]
impl MailSubmitter for LettreSubmitter {
    async fn submit(&self, account: &Account, message: Message) -> Result<()> {
        let smtp = account.smtp.as_ref().ok_or_else(|| {
            MailSyncError::Config(format!("account {} has no smtp endpoint", account.name))
        })?;
        let tls = match smtp.encryption {
            Encryption::None => Tls::None,
            encryption => {
                let mut tls_builder = TlsParameters::builder(smtp.host.clone());
                if smtp.skip_tls_verify {
                    tls_builder = tls_builder
                        .dangerous_accept_invalid_certs(true)
                        .dangerous_accept_invalid_hostnames(true);
                }
                let params = tls_builder
                    .build()
                    .map_err(|e| MailSyncError::Submission(e.to_string()))?;
                if encryption == Encryption::Ssl {
                    Tls::Wrapper(params)
                } else {
                    Tls::Required(params)
                }
            }
        };
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .tls(tls)
            .credentials(Credentials::new(
                account.username.clone(),
                account.password.clone(),
            ))
            .build();
        mailer
            .send(message)
            .await
            .map_err(|e| MailSyncError::Submission(e.to_string()))?;
        Ok(())
    }
}

/// Operations that change the server and keep the local mirror in step.
/// Move drops the local row after the server accepts the change; the next
/// sync recreates it in its new folder. Delete drops the row even when the
/// uid had already vanished remotely, but not when the folder is gone.
#[derive(Clone)]
pub struct MailWriteback {
    store: Arc<dyn MailStore>,
    connector: Arc<dyn MailConnector>,
    submitter: Arc<dyn MailSubmitter>,
    archive: Option<MailWorker>,
}

impl MailWriteback {
    pub fn new(
        store: impl MailStore + 'static,
        connector: Arc<dyn MailConnector>,
        submitter: Arc<dyn MailSubmitter>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            connector,
            submitter,
            archive: None,
        }
    }

    /// Sent mail is published to this worker for filing in the Sent folder.
    pub fn with_archive(mut self, worker: MailWorker) -> Self {
        self.archive = Some(worker);
        self
    }

    pub async fn send(&self, account: &Account, outgoing: &OutgoingMessage) -> Result<SentMessage> {
        self.submit(account, outgoing, None).await
    }

    pub async fn reply(
        &self,
        account: &Account,
        message_id: i64,
        body: &str,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<SentMessage> {
        let original = self.load_message(message_id).await?;
        if original.sender.trim().is_empty() {
            return Err(MailSyncError::Submission(format!(
                "message {} has no sender to reply to",
                message_id
            )));
        }
        let outgoing = OutgoingMessage {
            to: original.sender.clone(),
            subject: reply_subject(&original.subject),
            body: reply_body(body, &original),
            attachments,
            system: false,
        };
        let threading = Some(original.message_id.as_str()).filter(|id| !id.trim().is_empty());
        let sent = self.submit(account, &outgoing, threading).await?;
        self.store
            .update_status(original.uid, original.folder_id, MessageStatus::Answered)
            .await?;
        Ok(sent)
    }

    pub async fn move_message(
        &self,
        account: &Account,
        message_id: i64,
        target_folder_id: i64,
    ) -> Result<()> {
        let message = self.load_message(message_id).await?;
        let source = self.load_folder(message.folder_id).await?;
        let target = self.load_folder(target_folder_id).await?;

        let mut session = self.connector.connect(account).await?;
        let result = async {
            open_source(session.as_mut(), &source).await?;
            if !session.list_uids().await?.contains(&message.uid) {
                return Err(MailSyncError::NotFound(format!(
                    "uid {} in {}",
                    message.uid, source.path
                )));
            }
            session.move_message(message.uid, &target.path).await
        }
        .await;
        close_session(session.as_mut()).await;
        result?;

        info!(message_id, from = %source.path, to = %target.path, "message moved");
        self.store.delete_message(message.id).await
    }

    pub async fn delete_message(&self, account: &Account, message_id: i64) -> Result<()> {
        let message = self.load_message(message_id).await?;
        let source = self.load_folder(message.folder_id).await?;

        let mut session = self.connector.connect(account).await?;
        let result = async {
            let folders = open_source(session.as_mut(), &source).await?;
            if !session.list_uids().await?.contains(&message.uid) {
                debug!(message_id, uid = message.uid, folder = %source.path, "delete uid already gone remotely");
                return Ok(());
            }
            match FolderMatcher::trash().find(&folders) {
                Some(trash) if trash.path != source.path => {
                    session.move_message(message.uid, &trash.path).await
                }
                _ => session.mark_deleted(message.uid).await,
            }
        }
        .await;
        close_session(session.as_mut()).await;
        result?;

        info!(message_id, folder = %source.path, "message deleted");
        self.store.delete_message(message.id).await
    }

    pub async fn download_attachment(
        &self,
        account: &Account,
        attachment_id: i64,
    ) -> Result<AttachmentData> {
        let attachment = self
            .store
            .attachment(attachment_id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("attachment {}", attachment_id)))?;
        let message = self.load_message(attachment.message_id).await?;
        let folder = self.load_folder(message.folder_id).await?;

        let mut session = self.connector.connect(account).await?;
        let result = async {
            session.select_folder(&folder.path).await?;
            session.fetch_raw(message.uid).await
        }
        .await;
        close_session(session.as_mut()).await;
        let raw = result?;

        attachment_data(&raw, &attachment.part_number)?.ok_or_else(|| {
            MailSyncError::NotFound(format!(
                "part {} of message {}",
                attachment.part_number, message.id
            ))
        })
    }

    async fn submit(
        &self,
        account: &Account,
        outgoing: &OutgoingMessage,
        in_reply_to: Option<&str>,
    ) -> Result<SentMessage> {
        let message_id = new_message_id(&account.username);
        let email = build_message(account, outgoing, &message_id, in_reply_to)?;
        let raw = email.formatted();
        self.submitter.submit(account, email).await?;
        info!(account = %account.name, to = %outgoing.to, message_id = %message_id, "message sent");

        if let Some(worker) = &self.archive {
            let cmd = MailCommand::Archive {
                account: account.name.clone(),
                raw,
            };
            if let Err(err) = worker.send(cmd) {
                warn!(error = %err, "sent message not archived");
            }
        }
        Ok(SentMessage {
            message_id,
            subject: outgoing.subject.clone(),
            to: outgoing.to.clone(),
        })
    }

    async fn load_message(&self, id: i64) -> Result<StoredMessage> {
        self.store
            .message(id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("message {}", id)))
    }

    async fn load_folder(&self, id: i64) -> Result<Folder> {
        self.store
            .folder(id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("folder {}", id)))
    }
}

// Selects the folder after confirming it still exists remotely; returns the
// server's folder list for callers that need to look further.
async fn open_source(session: &mut dyn RemoteSession, source: &Folder) -> Result<Vec<RemoteFolder>> {
    let folders = session.list_folders().await?;
    if !folders.iter().any(|f| f.path == source.path) {
        return Err(MailSyncError::Folder(format!(
            "{} not found on server",
            source.path
        )));
    }
    session.select_folder(&source.path).await?;
    Ok(folders)
}

async fn close_session(session: &mut dyn RemoteSession) {
    if let Err(err) = session.logout().await {
        warn!(error = %err, "imap logout failed");
    }
}

fn build_message(
    account: &Account,
    outgoing: &OutgoingMessage,
    message_id: &str,
    in_reply_to: Option<&str>,
) -> Result<Message> {
    let from_addr = account
        .username
        .trim()
        .parse()
        .map_err(|e| MailSyncError::Submission(format!("invalid sender address: {}", e)))?;
    let sender_name = Some(account.sender_name.trim().to_string()).filter(|n| !n.is_empty());
    let recipients = parse_mailbox_list(&outgoing.to)?;
    if recipients.is_empty() {
        return Err(MailSyncError::Submission("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(Mailbox::new(sender_name, from_addr))
        .subject(outgoing.subject.clone())
        .message_id(Some(message_id.to_string()))
        .date_now();
    for addr in recipients {
        builder = builder.to(addr);
    }
    if let Some(parent) = in_reply_to {
        builder = builder
            .in_reply_to(parent.to_string())
            .references(parent.to_string());
    }
    if outgoing.system {
        builder = builder.header(MailsyncType::system());
    }

    let email = if outgoing.attachments.is_empty() {
        builder.body(outgoing.body.clone())
    } else {
        let mut multipart =
            MultiPart::mixed().singlepart(SinglePart::plain(outgoing.body.clone()));
        for attachment in &outgoing.attachments {
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type(&attachment.mime_type)),
            );
        }
        builder.multipart(multipart)
    };
    email.map_err(|e| MailSyncError::Submission(e.to_string()))
}

fn content_type(raw: &str) -> ContentType {
    let mime = raw
        .parse::<mime::Mime>()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    ContentType::parse(mime.as_ref()).unwrap_or(ContentType::TEXT_PLAIN)
}

fn parse_mailbox_list(input: &str) -> Result<Vec<Mailbox>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed = addrparse(trimmed)
        .map_err(|e| MailSyncError::Submission(format!("invalid recipients: {}", e)))?;
    Ok(mailaddrs_to_mailboxes(&parsed))
}

fn mailaddrs_to_mailboxes(addrs: &[MailAddr]) -> Vec<Mailbox> {
    let mut out = Vec::new();
    for addr in addrs {
        match addr {
            MailAddr::Single(info) => {
                if let Ok(parsed) = info.addr.parse() {
                    out.push(Mailbox::new(info.display_name.clone(), parsed));
                }
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    if let Ok(parsed) = info.addr.parse() {
                        out.push(Mailbox::new(info.display_name.clone(), parsed));
                    }
                }
            }
        }
    }
    out
}

fn new_message_id(username: &str) -> String {
    let domain = username
        .rsplit_once('@')
        .map(|(_, d)| d.trim())
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = MESSAGE_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("<{}.{}.{}@{}>", nanos, std::process::id(), seq, domain)
}

/// Adds `Re: ` unless the subject already starts with it, in any case.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let already = trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Reply text followed by an attribution line and the quoted original.
pub fn reply_body(reply: &str, original: &StoredMessage) -> String {
    let date = chrono::DateTime::from_timestamp(original.timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let mut out = String::new();
    out.push_str(reply.trim_end());
    out.push_str("\n\n");
    out.push_str(&format!("On {}, {} wrote:\n", date, original.sender));
    for line in original.content.lines() {
        if line.is_empty() {
            out.push_str(">\n");
        } else {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
