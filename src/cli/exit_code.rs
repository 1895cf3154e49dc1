//! Exit code definitions for authsock-scope

use crate::error::Error;

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Successful execution, including shutdown after the idle timeout
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Configuration error (invalid config, bad fingerprint or duration)
    ConfigError = 2,
    /// Socket error (cannot create/bind socket, listener failure)
    SocketError = 3,
    /// Upstream error (cannot reach the upstream agent or list its keys)
    UpstreamError = 4,
}

impl ExitCode {
    /// Pick the exit code for an error returned by a command
    pub fn from_error(err: &anyhow::Error) -> Self {
        err.downcast_ref::<Error>()
            .map(Self::from)
            .unwrap_or(ExitCode::GeneralError)
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) | Error::InvalidFingerprint(_) | Error::TomlParse(_) => {
                ExitCode::ConfigError
            }
            Error::Bind { .. } | Error::Socket(_) => ExitCode::SocketError,
            Error::UpstreamNotAvailable(_) | Error::ListFetch(_) => ExitCode::UpstreamError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> Self {
        code as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
