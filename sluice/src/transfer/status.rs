use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SluiceError};
use crate::sluice_error;

/// Persisted lifecycle of one transfer.
///
/// Legal transitions are `Started → Pending → {Complete | Cancelled | Failed}`
/// plus explicit user cancellation from either non-terminal state. Transitions
/// are monotonic: there is no way back out of a terminal state, and a
/// cancellation request against a terminal transfer is a precondition failure
/// rather than a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Created, waiting for a worker to claim it.
    Started,
    /// Claimed by exactly one worker; side-effecting work is in flight.
    Pending,
    /// Finished with the watermark advanced.
    Complete,
    /// Ended without work: nothing to sync, or cancelled by the user.
    Cancelled,
    /// Ended with an error; the watermark did not move.
    Failed,
}

impl TransferStatus {
    /// Returns `true` once the transfer can never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Cancelled | TransferStatus::Failed
        )
    }

    /// Returns `true` if a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        match (self, next) {
            (TransferStatus::Started, TransferStatus::Pending) => true,
            (TransferStatus::Started, TransferStatus::Cancelled) => true,
            (TransferStatus::Pending, TransferStatus::Complete) => true,
            (TransferStatus::Pending, TransferStatus::Cancelled) => true,
            (TransferStatus::Pending, TransferStatus::Failed) => true,
            _ => false,
        }
    }

    /// Checks a user cancellation request against the current state.
    ///
    /// Fails with [`ErrorKind::InvalidState`] when the transfer already
    /// reached a terminal state.
    pub fn check_cancellable(&self) -> Result<(), SluiceError> {
        if self.is_terminal() {
            return Err(sluice_error!(
                ErrorKind::InvalidState,
                "Transfer is not in progress",
                format!("cannot cancel a transfer with status {self}")
            ));
        }

        Ok(())
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            TransferStatus::Started => "started",
            TransferStatus::Pending => "pending",
            TransferStatus::Complete => "complete",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Failed => "failed",
        }
    }

    /// Parses the persisted textual form.
    pub fn parse(value: &str) -> Result<Self, SluiceError> {
        match value {
            "started" => Ok(TransferStatus::Started),
            "pending" => Ok(TransferStatus::Pending),
            "complete" => Ok(TransferStatus::Complete),
            "cancelled" => Ok(TransferStatus::Cancelled),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(sluice_error!(
                ErrorKind::InvalidState,
                "Unknown transfer status",
                other
            )),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_cancellation() {
        for status in [
            TransferStatus::Complete,
            TransferStatus::Cancelled,
            TransferStatus::Failed,
        ] {
            let err = status.check_cancellable().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }
    }

    #[test]
    fn pending_states_accept_cancellation() {
        assert!(TransferStatus::Started.check_cancellable().is_ok());
        assert!(TransferStatus::Pending.check_cancellable().is_ok());
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(TransferStatus::Started.can_transition_to(TransferStatus::Pending));
        assert!(TransferStatus::Pending.can_transition_to(TransferStatus::Complete));
        assert!(TransferStatus::Pending.can_transition_to(TransferStatus::Failed));

        assert!(!TransferStatus::Pending.can_transition_to(TransferStatus::Started));
        assert!(!TransferStatus::Complete.can_transition_to(TransferStatus::Pending));
        assert!(!TransferStatus::Failed.can_transition_to(TransferStatus::Complete));
        assert!(!TransferStatus::Cancelled.can_transition_to(TransferStatus::Pending));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TransferStatus::Started,
            TransferStatus::Pending,
            TransferStatus::Complete,
            TransferStatus::Cancelled,
            TransferStatus::Failed,
        ] {
            assert_eq!(TransferStatus::parse(status.as_static_str()).unwrap(), status);
        }

        assert!(TransferStatus::parse("unknown").is_err());
    }
}
