use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("no screenshot descriptions found for the selected captures")]
    EmptyReport,
}

pub type Result<T> = std::result::Result<T, CoreError>;
