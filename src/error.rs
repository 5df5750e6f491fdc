use std::fmt::{Display, Formatter};

/// How an I/O failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// Expected to succeed on retry (connection reset, namenode busy).
    Transient,
    /// The per-call deadline elapsed.
    Timeout,
    /// Retrying cannot help.
    Fatal,
}

#[derive(Debug, PartialEq)]
pub enum RdfsError {
    ConfigError(String),
    ConnectionError(String),
    SessionClosed,
    NotFound(String),
    AlreadyExists(String),
    PermissionDenied(String),
    InvalidHandle(String),
    InvalidArgument(String),
    IOError(IoErrorKind, String),
    ProtoEncodeError(prost::EncodeError),
    ProtoDecodeError(prost::DecodeError),
}

impl RdfsError {
    /// Transient and timed-out I/O failures are retried, as are connection
    /// failures while (re-)establishing the transport. Everything else is
    /// surfaced to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RdfsError::IOError(IoErrorKind::Transient, _)
                | RdfsError::IOError(IoErrorKind::Timeout, _)
                | RdfsError::ConnectionError(_)
        )
    }
}

impl Display for RdfsError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for RdfsError {}

impl From<std::io::Error> for RdfsError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match error.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::Interrupted => IoErrorKind::Transient,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => IoErrorKind::Timeout,
            _ => IoErrorKind::Fatal,
        };
        RdfsError::IOError(kind, error.to_string())
    }
}

impl From<toml::de::Error> for RdfsError {
    fn from(error: toml::de::Error) -> Self {
        RdfsError::ConfigError(error.to_string())
    }
}

impl From<prost::EncodeError> for RdfsError {
    fn from(error: prost::EncodeError) -> Self {
        RdfsError::ProtoEncodeError(error)
    }
}

impl From<prost::DecodeError> for RdfsError {
    fn from(error: prost::DecodeError) -> Self {
        RdfsError::ProtoDecodeError(error)
    }
}

pub type Result<T> = std::result::Result<T, RdfsError>;
