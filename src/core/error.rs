use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("at least 2 yearly records are required to derive returns, got {records}")]
    InsufficientData { records: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no complete period fits in the available history")]
    NoPeriods,

    #[error("invalid record for {year}: {reason}")]
    InvalidRecord { year: i32, reason: String },
}

impl EngineError {
    pub(crate) fn invalid_record(year: i32, reason: impl Into<String>) -> Self {
        EngineError::InvalidRecord {
            year,
            reason: reason.into(),
        }
    }
}
