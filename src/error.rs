use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("blocking database task failed: {0}")]
    Join(String),
    #[error("malformed timestamp in storage: {0}")]
    Timestamp(String),
    #[error("could not prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("discord request failed: {0}")]
    Discord(#[from] serenity::Error),
    #[error("discord rejected the request: {0}")]
    Rejected(String),
    /// The member, user or ban no longer exists.
    #[error("target not found: {0}")]
    NotFound(String),
}

/// Failure modes of applying a punishment. Callers can tell an external
/// action failure apart from a persistence failure.
#[derive(Debug, Error)]
pub enum ApplierError {
    #[error("no mute role is configured")]
    MissingMuteRole,
    #[error(transparent)]
    InvalidCode(#[from] PunishmentParseError),
    #[error("punishment duration {0} is out of range")]
    DurationOutOfRange(String),
    #[error("moderation action failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("moderation record could not be stored: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown punishment code `{0}`")]
pub struct PunishmentParseError(pub String);

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unknown rule `{0}`")]
    UnknownRule(String),
    #[error("invalid settings for rule `{rule}`: {source}")]
    InvalidSettings {
        rule: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}
