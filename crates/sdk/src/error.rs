use alloy::{
    primitives::Bytes,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::chain::ChainId;

/// EIP-1193 error code the wallet returns when the user declines a request.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Failures of the synchronization core.
///
/// [`SyncError::NoProvider`] and [`SyncError::NetworkFailure`] are transient:
/// the polling loops recover from them on the next tick and consumers only
/// see a loading/unavailable state. [`SyncError::CallReverted`] and
/// [`SyncError::SubmissionFailed`] are actionable for the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("no provider for chain {chain_id}")]
    NoProvider { chain_id: ChainId },

    #[error("wallet is not connected")]
    NotConnected,

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("call reverted: {data}")]
    CallReverted { data: Bytes },

    #[error("transaction rejected by the user")]
    SubmissionRejected,

    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("decoding failed: {0}")]
    Decode(String),
}

impl SyncError {
    /// Recovered locally by retrying on the next polling tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::NoProvider { .. } | SyncError::NetworkFailure(_))
    }

    /// User declined signing; not an application defect.
    pub fn is_user_rejection(&self) -> bool { matches!(self, SyncError::SubmissionRejected) }

    /// Classifies an error returned by `eth_sendTransaction`.
    pub(crate) fn from_submission(err: RpcError<TransportErrorKind>) -> Self {
        match err.as_error_resp() {
            Some(payload) if payload.code == USER_REJECTED_CODE => SyncError::SubmissionRejected,
            Some(payload) => SyncError::SubmissionFailed(payload.message.to_string()),
            None => SyncError::NetworkFailure(err.to_string()),
        }
    }
}

impl From<RpcError<TransportErrorKind>> for SyncError {
    fn from(err: RpcError<TransportErrorKind>) -> Self { SyncError::NetworkFailure(err.to_string()) }
}

impl From<alloy::contract::Error> for SyncError {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(err) => err.into(),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

impl From<alloy_sol_types::Error> for SyncError {
    fn from(err: alloy_sol_types::Error) -> Self { SyncError::Decode(err.to_string()) }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::json_rpc::ErrorPayload;

    use super::*;

    fn error_response(code: i64, message: &'static str) -> RpcError<TransportErrorKind> {
        RpcError::ErrorResp(ErrorPayload { code, message: message.into(), data: None })
    }

    #[test]
    fn test_submission_classification() {
        assert_eq!(
            SyncError::from_submission(error_response(4001, "User denied transaction signature")),
            SyncError::SubmissionRejected
        );
        assert_eq!(
            SyncError::from_submission(error_response(-32000, "nonce too low")),
            SyncError::SubmissionFailed("nonce too low".to_string())
        );
        assert!(SyncError::SubmissionRejected.is_user_rejection());
        assert!(!SyncError::SubmissionRejected.is_transient());
    }

    #[test]
    fn test_transient_errors() {
        assert!(SyncError::NoProvider { chain_id: 1 }.is_transient());
        assert!(SyncError::NetworkFailure("timeout".to_string()).is_transient());
        assert!(!SyncError::CallReverted { data: Bytes::new() }.is_transient());
    }
}
