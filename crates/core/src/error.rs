use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrafoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate entity id: {0}")]
    DuplicateEntity(String),

    #[error("Entity {entity}: fixed interval end {end} must be after start {start}")]
    InvalidInterval {
        entity: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GrafoError>;
