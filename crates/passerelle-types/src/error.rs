use thiserror::Error;

/// Errors produced while parsing identifier strings back into their typed
/// forms.
#[derive(Error, Debug)]
pub enum IdParseError {
    #[error("Invalid UUID in identifier: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Identifier is missing the '|' separator")]
    MissingSeparator,

    #[error("Invalid timestamp component: {0}")]
    InvalidTimestamp(#[from] std::num::ParseIntError),

    #[error("Unknown chat identifier prefix: {0}")]
    UnknownChatPrefix(String),
}
