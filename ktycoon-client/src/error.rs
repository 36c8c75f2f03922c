//! Client error types and the per-handler error state.

use ktycoon_protocol::{CodecError, ErrorCode, ProtocolError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not connected")]
    NotConnected,

    #[error("record not found")]
    NotFound,

    #[error("operation not supported by this protocol: {0}")]
    Unsupported(&'static str),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("invalid operation: {0}")]
    Invalid(String),

    #[error("unexpected HTTP status {status} from {op}")]
    UnexpectedStatus { op: String, status: u16 },
}

impl ClientError {
    /// Maps this error onto its stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::NotFound => ErrorCode::NotFound,
            ClientError::Unsupported(_) => ErrorCode::Unimplemented,
            ClientError::Logic(_) | ClientError::NotConnected => ErrorCode::Logic,
            ClientError::Invalid(_) | ClientError::Codec(_) => ErrorCode::Invalid,
            ClientError::Protocol(e) => e.code(),
            ClientError::Io(_) => ErrorCode::Network,
            ClientError::Http(e) if e.is_timeout() || e.is_connect() => ErrorCode::Network,
            ClientError::Http(_) | ClientError::UnexpectedStatus { .. } => {
                ErrorCode::Miscellaneous
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }
}

/// Outcome of the last operation on a handler or cursor.
///
/// Updated by every public call. With exceptions enabled a failing call also
/// returns its error; otherwise the call returns its "absent" value and the
/// failure is only visible here. `NotFound` is never returned as an error.
#[derive(Debug, Clone)]
pub struct ErrorState {
    code: ErrorCode,
    detail: Option<String>,
    exceptions: bool,
}

impl ErrorState {
    pub(crate) fn new(exceptions: bool) -> Self {
        Self {
            code: ErrorCode::Success,
            detail: None,
            exceptions,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.code.name()
    }

    /// Detail of the last failure, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// True for `Success` and `NotFound`.
    pub fn ok(&self) -> bool {
        self.code.is_ok()
    }

    pub fn exceptions_enabled(&self) -> bool {
        self.exceptions
    }

    /// Code message followed by the detail, when there is one.
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.code.message(), detail),
            None => self.code.message().to_string(),
        }
    }

    pub(crate) fn set_success(&mut self) {
        self.code = ErrorCode::Success;
        self.detail = None;
    }

    pub(crate) fn set_error(&mut self, code: ErrorCode, detail: Option<String>) {
        self.code = code;
        self.detail = detail;
    }

    /// Records the outcome of an operation and applies the exception policy.
    pub(crate) fn settle<T: Default>(
        &mut self,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        match result {
            Ok(value) => {
                self.set_success();
                Ok(value)
            }
            Err(ClientError::NotFound) => {
                self.set_error(ErrorCode::NotFound, None);
                Ok(T::default())
            }
            Err(err) => {
                let code = err.code();
                tracing::debug!("operation failed: {} ({})", err, code);
                self.set_error(code, Some(err.to_string()));
                if self.exceptions {
                    Err(err)
                } else {
                    Ok(T::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ClientError::NotFound.code(), ErrorCode::NotFound);
        assert_eq!(
            ClientError::Unsupported("cas").code(),
            ErrorCode::Unimplemented
        );
        assert_eq!(
            ClientError::Logic("empty".to_string()).code(),
            ErrorCode::Logic
        );
        assert_eq!(ClientError::NotConnected.code(), ErrorCode::Logic);
        assert_eq!(
            ClientError::Invalid("db name".to_string()).code(),
            ErrorCode::Invalid
        );
        assert_eq!(
            ClientError::Codec(CodecError::Custom("bad".to_string())).code(),
            ErrorCode::Invalid
        );
        assert_eq!(
            ClientError::Protocol(ProtocolError::UnexpectedMagic {
                expected: 0xb8,
                actual: 0
            })
            .code(),
            ErrorCode::Internal
        );
        assert_eq!(
            ClientError::Protocol(ProtocolError::ConnectionClosed { needed: 1 }).code(),
            ErrorCode::Network
        );
        assert_eq!(
            ClientError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).code(),
            ErrorCode::Network
        );
        assert_eq!(
            ClientError::UnexpectedStatus {
                op: "set".to_string(),
                status: 500
            }
            .code(),
            ErrorCode::Miscellaneous
        );
    }

    #[test]
    fn test_settle_success() {
        let mut state = ErrorState::new(true);
        state.set_error(ErrorCode::Internal, Some("stale".to_string()));

        let value = state.settle(Ok(5u64)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(state.code(), ErrorCode::Success);
        assert!(state.detail().is_none());
    }

    #[test]
    fn test_settle_not_found_is_ok() {
        let mut state = ErrorState::new(true);
        let value: Option<String> = state.settle(Err(ClientError::NotFound)).unwrap();
        assert!(value.is_none());
        assert_eq!(state.code(), ErrorCode::NotFound);
        assert!(state.ok());
    }

    #[test]
    fn test_settle_exception_mode() {
        let mut state = ErrorState::new(true);
        let result: Result<bool, _> = state.settle(Err(ClientError::Logic("no keys".to_string())));
        assert!(matches!(result, Err(ClientError::Logic(_))));
        assert_eq!(state.code(), ErrorCode::Logic);
        assert!(!state.ok());
        assert!(state.message().starts_with("Logic Error"));
    }

    #[test]
    fn test_settle_inspect_mode() {
        let mut state = ErrorState::new(false);
        assert!(!state.exceptions_enabled());

        let result: bool = state
            .settle(Err(ClientError::Unsupported("cas")))
            .unwrap();
        assert!(!result);
        assert_eq!(state.code(), ErrorCode::Unimplemented);
        assert_eq!(state.name(), "UNIMPLEMENTED");
        assert!(state.detail().unwrap().contains("cas"));
    }
}
