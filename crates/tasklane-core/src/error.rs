use thiserror::Error;

/// Failure surfaced by the record store or the façade over it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("rejected by store: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{err:#}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
