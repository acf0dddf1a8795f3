use thiserror::Error;

pub type Result<T> = std::result::Result<T, MailSyncError>;

/// Failure taxonomy shared by the sync engine and the write-back operations.
///
/// The variant decides the recovery policy: a `Connection` error aborts the
/// current folder (or the run during the catalog phase), `Folder` skips one
/// folder, `MessageFetch` skips one message and `Persistence` always
/// propagates to the caller.
#[derive(Debug, Error)]
pub enum MailSyncError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("folder error: {0}")]
    Folder(String),

    #[error("message fetch error: {0}")]
    MessageFetch(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("submission error: {0}")]
    Submission(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Queue(String),
}

impl MailSyncError {
    /// True when the remote session can no longer be used.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, MailSyncError::Connection(_))
    }
}

impl From<sqlx::Error> for MailSyncError {
    fn from(e: sqlx::Error) -> Self {
        MailSyncError::Persistence(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for MailSyncError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MailSyncError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for MailSyncError {
    fn from(e: std::io::Error) -> Self {
        MailSyncError::Persistence(e.to_string())
    }
}
