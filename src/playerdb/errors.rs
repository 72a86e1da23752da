use thiserror::Error;

/// Errors that can arise while reading, writing or indexing player data.
///
/// Everything in this enum is either structural (the process should not keep
/// going on a record it cannot trust) or a contract violation by the caller.
/// Recoverable per-line problems are reported as [`FieldError`] instead.
#[derive(Debug, Error)]
pub enum PlayerDbError {
    /// Wrapper around IO errors (directory creation, open, rename).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around JSON errors for the empire table.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record ended before its `End` sentinel or inside a `~` text block.
    #[error("truncated record {file}: {reason}")]
    Truncated { file: String, reason: String },

    /// Structural format error in an account file or the account index.
    #[error("format error in {file} line {line}: {reason}")]
    Format {
        file: String,
        line: usize,
        reason: String,
    },

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// An index insert collided with a different player holding this idnum.
    #[error("idnum {0} already indexed")]
    DuplicateIdnum(i32),

    /// An index insert collided with a different player holding this name.
    #[error("name '{0}' already indexed")]
    DuplicateName(String),

    /// Account id does not exist in the account store.
    #[error("account #{0} not found")]
    AccountNotFound(i32),

    /// The player is still linked to another account and must be unlinked first.
    #[error("player '{name}' is linked to account #{account}")]
    LinkedElsewhere { name: String, account: i32 },

    /// A record without an idnum cannot be saved or indexed.
    #[error("player '{0}' has no idnum")]
    NoIdnum(String),

    /// Player name failed validation and cannot be mapped to a file.
    #[error("invalid player name: {0}")]
    InvalidName(String),

    /// Password hashing failure.
    #[error("password hash error: {0}")]
    Password(String),
}

impl PlayerDbError {
    /// Structural errors mean the data on disk cannot be trusted and the
    /// caller should stop rather than proceed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PlayerDbError::Truncated { .. } | PlayerDbError::Format { .. } | PlayerDbError::Io(_)
        )
    }
}

/// Recoverable problems with a single directive of a player record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    #[error("malformed value for '{tag}': {value}")]
    Malformed { tag: String, value: String },

    #[error("index {index} out of range for '{tag}'")]
    OutOfRange { tag: String, index: i64 },

    #[error("unknown name '{name}' for '{tag}'")]
    UnknownName { tag: String, name: String },

    #[error("invalid flag characters '{0}'")]
    BadFlags(String),
}

/// A recoverable problem recorded during decode, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub line: usize,
    pub error: FieldError,
}
