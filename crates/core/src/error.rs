/// Why a duration-valued policy annotation could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid number in duration '{0}'")]
    InvalidNumber(String),

    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),

    #[error("unknown unit '{unit}' in duration '{value}'")]
    UnknownUnit { unit: String, value: String },

    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

/// The stored deletion marker is not a timestamp this crate can read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unreadable deletion marker '{value}'")]
pub struct MarkerParseError {
    pub value: String,
}
