use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::{Value as JsonValue, json};

use mailsync_core::{Account, Message, truncate_chars};
use mailsync_mail::OutgoingAttachment;

use crate::config::AppConfig;

pub(crate) const CLI_SCHEMA_VERSION: u32 = 1;
const PREVIEW_CHARS: usize = 100;

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

pub(crate) fn resolve_account<'a>(
    config: &'a AppConfig,
    requested: Option<&str>,
) -> Result<&'a Account> {
    let accounts = &config.accounts;
    let selected = if let Some(name) = requested {
        accounts.iter().find(|acct| acct.name == name)
    } else if let Some(default_name) = config.default_account.as_deref() {
        accounts.iter().find(|acct| acct.name == default_name)
    } else if accounts.len() == 1 {
        accounts.first()
    } else {
        None
    };
    selected.ok_or_else(|| anyhow!("Account not found or not specified"))
}

/// Picks the account owning `tenant` unless one was named explicitly.
pub(crate) fn resolve_account_for_tenant<'a>(
    config: &'a AppConfig,
    requested: Option<&str>,
    tenant: i64,
) -> Result<&'a Account> {
    if requested.is_some() {
        return resolve_account(config, requested);
    }
    let mut owners = config.accounts.iter().filter(|a| a.tenant == tenant);
    match (owners.next(), owners.next()) {
        (Some(account), None) => Ok(account),
        (Some(_), Some(_)) => Err(anyhow!(
            "Several accounts share tenant {}, pass --account",
            tenant
        )),
        (None, _) => resolve_account(config, None),
    }
}

pub(crate) fn message_summary_json(message: &Message) -> JsonValue {
    json!({
        "id": message.id,
        "folder_id": message.folder_id,
        "uid": message.uid,
        "message_id": message.message_id,
        "subject": message.subject,
        "sender": message.sender,
        "date": message.timestamp,
        "status": message.status,
        "type": message.kind,
        "preview": truncate_chars(&message.content, PREVIEW_CHARS),
    })
}

pub(crate) fn read_attachments(paths: &[String]) -> Result<Vec<OutgoingAttachment>> {
    let mut out = Vec::with_capacity(paths.len());
    for raw in paths {
        let path = Path::new(raw);
        let data = std::fs::read(path).map_err(|e| anyhow!("Attachment {}: {}", raw, e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        out.push(OutgoingAttachment {
            filename,
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string(),
            data,
        });
    }
    Ok(out)
}
