use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::warn;

use mailsync_core::{Account, Encryption, Endpoint};
use mailsync_mail::{DEFAULT_FOLDER_DELAY, DEFAULT_MESSAGE_LIMIT, SyncOptions, default_ignore_folders};

const DEFAULT_DB_FILE: &str = "mailsync.db";
const DEFAULT_LOCK_STALE_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) db_path: String,
    pub(crate) default_account: Option<String>,
    pub(crate) sync: SyncConfig,
    pub(crate) accounts: Vec<Account>,
}

#[derive(Debug, Clone)]
pub(crate) struct SyncConfig {
    pub(crate) message_limit: usize,
    pub(crate) folder_delay: Duration,
    pub(crate) ignore_folders: Vec<String>,
    pub(crate) lock_path: PathBuf,
    pub(crate) lock_stale: Duration,
}

impl SyncConfig {
    pub(crate) fn options(&self) -> SyncOptions {
        SyncOptions {
            message_limit: self.message_limit,
            folder_delay: self.folder_delay,
            ignore_folders: self.ignore_folders.clone(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            folder_delay: DEFAULT_FOLDER_DELAY,
            ignore_folders: default_ignore_folders(),
            lock_path: std::env::temp_dir().join("mailsync.lock"),
            lock_stale: Duration::from_secs(DEFAULT_LOCK_STALE_SECS),
        }
    }
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("mailsync.toml"),
        xdg_config_dir().join("mailsync").join("mailsync.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

fn default_db_dir() -> PathBuf {
    let dir = xdg_state_dir().join("mailsync");
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn resolve_db_path(raw: &str) -> String {
    let path = Path::new(raw);
    if path.is_absolute() {
        raw.to_string()
    } else {
        default_db_dir().join(path).to_string_lossy().to_string()
    }
}

pub(crate) fn load_app_config() -> Result<AppConfig> {
    match load_config_text() {
        Some(content) => parse_app_config(&content),
        None => parse_app_config(""),
    }
}

pub(crate) fn parse_app_config(content: &str) -> Result<AppConfig> {
    let value: toml::Value =
        toml::from_str(content).map_err(|e| anyhow!("invalid mailsync.toml: {}", e))?;

    let db_path = value
        .get("store")
        .and_then(|s| s.get("path"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_DB_FILE);
    let default_account = value
        .get("default_account")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let sync = value
        .get("sync")
        .map(parse_sync_table)
        .unwrap_or_default();

    let mut accounts = Vec::new();
    if let Some(entries) = value.get("accounts").and_then(|v| v.as_array()) {
        for (idx, entry) in entries.iter().enumerate() {
            let account = parse_account_table(entry, idx)?;
            if !account.has_credentials() {
                warn!(account = %account.name, "account has no credentials, it will not sync");
            }
            accounts.push(account);
        }
    }

    Ok(AppConfig {
        db_path: resolve_db_path(db_path),
        default_account,
        sync,
        accounts,
    })
}

fn parse_sync_table(sync: &toml::Value) -> SyncConfig {
    let defaults = SyncConfig::default();
    let message_limit = sync
        .get("message_limit")
        .and_then(|v| v.as_integer())
        .map(|v| v.max(1) as usize)
        .unwrap_or(defaults.message_limit);
    let folder_delay = sync
        .get("folder_delay_ms")
        .and_then(|v| v.as_integer())
        .map(|v| Duration::from_millis(v.max(0) as u64))
        .unwrap_or(defaults.folder_delay);
    let ignore_folders = sync
        .get("ignore_folders")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or(defaults.ignore_folders);
    let lock_path = sync
        .get("lock_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or(defaults.lock_path);
    let lock_stale = sync
        .get("lock_stale_secs")
        .and_then(|v| v.as_integer())
        .map(|v| Duration::from_secs(v.max(1) as u64))
        .unwrap_or(defaults.lock_stale);
    SyncConfig {
        message_limit,
        folder_delay,
        ignore_folders,
        lock_path,
        lock_stale,
    }
}

fn parse_account_table(value: &toml::Value, index: usize) -> Result<Account> {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let username = text("username");
    let name = Some(text("name"))
        .filter(|n| !n.is_empty())
        .or_else(|| Some(username.clone()).filter(|u| !u.is_empty()))
        .unwrap_or_else(|| format!("account-{}", index + 1));
    let imap = value
        .get("imap")
        .ok_or_else(|| anyhow!("account {} has no [accounts.imap] table", name))?;
    let imap = parse_endpoint_table(imap, 993, 143)
        .map_err(|e| anyhow!("account {} imap: {}", name, e))?;
    let smtp = match value.get("smtp") {
        Some(smtp) => Some(
            parse_endpoint_table(smtp, 465, 587)
                .map_err(|e| anyhow!("account {} smtp: {}", name, e))?,
        ),
        None => None,
    };
    Ok(Account {
        sender_name: text("sender_name"),
        password: text("password"),
        tenant: value.get("tenant").and_then(|v| v.as_integer()).unwrap_or(0),
        name,
        username,
        imap,
        smtp,
    })
}

fn parse_endpoint_table(table: &toml::Value, tls_port: u16, plain_port: u16) -> Result<Endpoint> {
    let host = table
        .get("host")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("missing host"))?;
    let raw_encryption = table
        .get("encryption")
        .and_then(|v| v.as_str())
        .unwrap_or("ssl");
    let encryption = Encryption::parse(raw_encryption)
        .ok_or_else(|| anyhow!("unknown encryption {:?}", raw_encryption))?;
    let default_port = match encryption {
        Encryption::Ssl => tls_port,
        _ => plain_port,
    };
    let port = table
        .get("port")
        .and_then(|v| v.as_integer())
        .map(|p| u16::try_from(p).map_err(|_| anyhow!("port {} out of range", p)))
        .transpose()?
        .unwrap_or(default_port);
    Ok(Endpoint {
        host,
        port,
        encryption,
        skip_tls_verify: table
            .get("skip_tls_verify")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}
