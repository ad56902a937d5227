use thiserror::Error;

use crate::domain::controller_model::cache::availability_cache::AvailabilityError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse controller configuration JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to build internal domain model: {0}")]
    ModelConstructionError(String),

    #[error("Controller store lock is poisoned: {0}")]
    StorePoisoned(String),

    #[error("{entity} '{id}' does not exist")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid reservation request: {0}")]
    InvalidRequest(String),

    #[error("Reservation request '{id}' cannot be changed: {reason}")]
    RequestNotModifiable { id: String, reason: String },

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("{0} is not started")]
    NotStarted(String),

    #[error("Agent protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound { entity, id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
