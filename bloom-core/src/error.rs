#[derive(Debug, thiserror::Error)]
pub enum BloomError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: f64, requested: f64 },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Llm(String),
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
}

impl BloomError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T, E = BloomError> = std::result::Result<T, E>;
