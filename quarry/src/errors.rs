use strata::StorageError;
use thiserror::Error;

/// Every engine error carries a five-character SQLSTATE alongside the
/// message, so hosts can branch on class without string matching.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("relation \"{0}\" does not exist")]
    UndefinedTable(String),

    #[error("relation \"{0}\" already exists")]
    DuplicateTable(String),

    #[error("column \"{0}\" does not exist")]
    UndefinedColumn(String),

    #[error("function {0} does not exist")]
    UndefinedFunction(String),

    #[error("null value in column \"{0}\" violates not-null constraint")]
    NotNullViolation(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("could not serialize access due to concurrent update")]
    SerializationFailure,

    #[error("there is already a transaction in progress")]
    ActiveSqlTransaction,

    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    InFailedSqlTransaction,

    #[error("invalid transaction termination")]
    InvalidTransactionTermination,

    #[error("{0} is not supported")]
    NotSupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl EngineError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Syntax(_) => "42601",
            EngineError::UndefinedTable(_) => "42P01",
            EngineError::DuplicateTable(_) => "42P07",
            EngineError::UndefinedColumn(_) => "42703",
            EngineError::UndefinedFunction(_) => "42883",
            EngineError::NotNullViolation(_) => "23502",
            EngineError::DivisionByZero => "22012",
            EngineError::SerializationFailure => "40001",
            EngineError::ActiveSqlTransaction => "25001",
            EngineError::InFailedSqlTransaction => "25P02",
            EngineError::InvalidTransactionTermination => "2D000",
            EngineError::NotSupported(_) => "0A000",
            EngineError::Io(_) | EngineError::Storage(_) => "58030",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SerializationFailure => EngineError::SerializationFailure,
            other => EngineError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failure_maps_to_40001() {
        let err: EngineError = StorageError::SerializationFailure.into();
        assert_eq!(err.sqlstate(), "40001");
    }

    #[test]
    fn transaction_state_codes() {
        assert_eq!(EngineError::ActiveSqlTransaction.sqlstate(), "25001");
        assert_eq!(EngineError::InFailedSqlTransaction.sqlstate(), "25P02");
        assert_eq!(EngineError::InvalidTransactionTermination.sqlstate(), "2D000");
    }
}
