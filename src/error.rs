use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Why a single probe failed. Every variant counts as one failure unit.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timed out during {stage} after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProbeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Unreachable(_) => "unreachable",
            ProbeError::Timeout { .. } => "timeout",
            ProbeError::Protocol(_) => "protocol-error",
            ProbeError::MalformedResponse(_) => "malformed-response",
        }
    }

    pub(crate) fn timeout(stage: &'static str, after: Duration) -> Self {
        ProbeError::Timeout { stage, after }
    }
}

/// Bad or missing command-line input. Always fatal, reported before any probing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
    #[error("Malformed argument '{0}', expected key=value")]
    MalformedArgument(String),
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid value '{value}' for argument {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Startup or runtime failure of one listener. Never propagates to sibling listeners.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<openssl::error::ErrorStack> for ListenerError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        ListenerError::Tls(err.to_string())
    }
}

/// Outcome of waiting for the next connection or datagram on a listening socket.
#[derive(Error, Debug)]
pub enum AcceptError {
    /// The shutdown watcher fired and the socket is being released.
    #[error("listener closed")]
    Closed,
    /// Anything else; the loop backs off and retries.
    #[error("transient accept error: {0}")]
    Transient(#[from] io::Error),
}
