//! Shell error types

use crate::at::CommError;

/// Error reported to the shell user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShellError {
    /// E01: input longer than the line buffer
    #[error("line too long")]
    LineTooLong,
    /// E02: the co-processor did not accept the command
    #[error("modem: {0}")]
    Modem(#[from] CommError),
}

impl ShellError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LineTooLong => "E01",
            Self::Modem(_) => "E02",
        }
    }
}
