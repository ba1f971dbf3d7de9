use std::io;

use thiserror::Error;

/// Everything that can go wrong while talking to a hub.
///
/// None of these are retried by the client. A control operation hands the
/// error straight back to its caller; the receive loop logs it and stops.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error on hub connection")]
    Io(#[from] io::Error),

    #[error("hub closed the connection")]
    ConnectionClosed,

    #[error("connection ended in the middle of a control line")]
    UnexpectedEof,

    #[error("session is not connected")]
    NotConnected,

    #[error("the receive loop owns the read half of this session")]
    ReaderDetached,

    #[error("application dropped the delivery channel")]
    DeliveryClosed,

    #[error("payload ended after {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("receive task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// A control line that does not match the shape its position requires.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected `{expected}` reply, got `{found}`")]
    UnexpectedKeyword {
        expected: &'static str,
        found: String,
    },

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("{field} is not an unsigned integer: `{value}`")]
    InvalidInteger { field: &'static str, value: String },

    #[error("unexpected trailing data: `{0}`")]
    TrailingData(String),

    #[error("empty identity in id list")]
    EmptyId,

    #[error("control line is not valid utf-8")]
    NotUtf8,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

impl ClientError {
    /// Whether the stream can no longer be trusted after this error.
    ///
    /// A malformed reply line was read in full, so the stream is still
    /// aligned. A failed read or write, or a short payload, leaves it in an
    /// unknown position.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::UnexpectedEof
                | ClientError::ShortRead { .. }
        )
    }
}
