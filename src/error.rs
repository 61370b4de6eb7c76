//! Error taxonomy for the analytical core

use thiserror::Error;

/// Failures raised by the allocation engine and the metric calculator.
///
/// Both variants are fatal to the stage that raised them. The orchestrator
/// records them per stage instead of aborting the whole run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InsightError {
    /// Missing or invalid required data: absent columns, empty joins, bad identities
    #[error("data error: {0}")]
    Data(String),

    /// A numeric routine could not produce a result (non-convergence, empty series)
    #[error("computation error: {0}")]
    Computation(String),
}

impl InsightError {
    pub fn data(message: impl Into<String>) -> Self {
        InsightError::Data(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        InsightError::Computation(message.into())
    }

    /// Short taxonomy name used in stage failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            InsightError::Data(_) => "DataError",
            InsightError::Computation(_) => "ComputationError",
        }
    }
}

pub type InsightResult<T> = std::result::Result<T, InsightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_and_display() {
        let err = InsightError::data("no valid coordinates");
        assert_eq!(err.kind(), "DataError");
        assert_eq!(err.to_string(), "data error: no valid coordinates");

        let err = InsightError::computation("empty series");
        assert_eq!(err.kind(), "ComputationError");
        assert!(err.to_string().contains("empty series"));
    }
}
