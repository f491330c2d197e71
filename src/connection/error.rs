use crate::protocol::RespError;
use std::io;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Connection is disconnected")]
    Disconnected,
    // io::Error isn't Clone, and one transport loss fails many promises. Keep the message only.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<RespError> for QueryError {
    fn from(e: RespError) -> Self {
        match e {
            RespError::Io(io) => QueryError::Transport(io.to_string()),
            other => QueryError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("IO error")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Timed out while connecting")]
    Timeout,
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Connected callback failed: {0}")]
    Callback(String),
    #[error("Transport is not supported on this platform")]
    UnsupportedTransport,
}

impl From<native_tls::Error> for ConnectError {
    fn from(e: native_tls::Error) -> Self {
        ConnectError::Tls(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid options: {0}")]
pub struct OptionsError(pub &'static str);
