//! Typed error hierarchy for relaycode.
//!
//! `RelayError` covers store and simulation failures on the server side.
//! `TransportFault` covers stream failures observed by the client consumer.

use thiserror::Error;

use crate::relay::models::{FileApplyStatus, TransactionStatus};

/// Errors reported to the caller of a store or simulation operation.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Transaction {id} not found")]
    TransactionNotFound { id: String },

    #[error("Duplicate transaction id {id}")]
    DuplicateTransaction { id: String },

    #[error("File {path} not found in transaction {id}")]
    FileNotFound { id: String, path: String },

    #[error("Invalid transition for transaction {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {id} must be PENDING to start a simulation (currently {status})")]
    NotPending { id: String, status: TransactionStatus },

    #[error("Transaction {id} already has an active simulation")]
    SimulationActive { id: String },

    #[error("File {path} in transaction {id} is {status}, only FAILED files can be reapplied")]
    FileNotFailed {
        id: String,
        path: String,
        status: FileApplyStatus,
    },

    #[error("Transaction {id} is {status}, only FAILED or PARTIALLYAPPLIED transactions can be reapplied")]
    NotReapplicable { id: String, status: TransactionStatus },

    #[error("Transaction {id} has no failed files")]
    NoFailedFiles { id: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl RelayError {
    /// True when the error names an id or path that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RelayError::TransactionNotFound { .. } | RelayError::FileNotFound { .. }
        )
    }

    /// True when the request was well-formed but conflicts with current state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidTransition { .. }
                | RelayError::DuplicateTransaction { .. }
                | RelayError::NotPending { .. }
                | RelayError::SimulationActive { .. }
                | RelayError::NotReapplicable { .. }
                | RelayError::FileNotFailed { .. }
                | RelayError::NoFailedFiles { .. }
        )
    }
}

/// A failure of the event stream as seen from the client.
///
/// Only `NetworkClosed` is retried; `Idle` leaves the connection in place.
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("Stream connection closed: {0}")]
    NetworkClosed(String),

    #[error("No frames received for {secs}s")]
    Idle { secs: u64 },
}

impl TransportFault {
    pub fn is_network_closed(&self) -> bool {
        matches!(self, TransportFault::NetworkClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = RelayError::TransactionNotFound { id: "tx-1".into() };
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "Transaction tx-1 not found");
    }

    #[test]
    fn test_conflict_classification() {
        let err = RelayError::InvalidTransition {
            id: "tx-1".into(),
            from: TransactionStatus::Committed,
            to: TransactionStatus::Pending,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("COMMITTED -> PENDING"));

        let err = RelayError::SimulationActive { id: "tx-2".into() };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_transport_fault_retry_classification() {
        assert!(TransportFault::NetworkClosed("eof".into()).is_network_closed());
        assert!(!TransportFault::Idle { secs: 30 }.is_network_closed());
    }
}
