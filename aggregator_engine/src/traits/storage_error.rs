use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("Could not serialize or deserialize a stored value: {0}")]
    SerializationError(String),
    #[error("The requested {0} does not exist: {1}")]
    RecordNotFound(&'static str, String),
    #[error("Could not insert record. {0}")]
    InsertError(String),
}

impl StorageError {
    pub fn not_found<S: ToString>(kind: &'static str, key: S) -> Self {
        Self::RecordNotFound(kind, key.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}
