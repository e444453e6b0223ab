//! Error taxonomy shared by the client and server halves.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::net::SocketAddr;

use crate::SequenceId;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), PingError>`].
///
/// [`Result<(), PingError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum PingError {
    /// No echo arrived within the per-probe wait. The client recovers from this
    /// by recording the probe as lost and moving on.
    Timeout {
        /// The sequence id of the probe whose window elapsed.
        sequence: SequenceId,
    },
    /// An echo arrived but its bytes did not match the transmitted probe.
    /// Recovered the same way as a timeout: the probe counts as lost.
    PayloadMismatch {
        /// The sequence id of the probe whose echo mismatched.
        sequence: SequenceId,
    },
    /// The target host resolved to no addresses. Fatal to client construction.
    UnresolvedHost {
        /// The host string that failed to resolve.
        host: String,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidArgument {
        /// Further specifies why the request was invalid.
        context: String,
    },
    /// Binding a UDP listen port failed. Fatal when it happens at server startup;
    /// during a runtime rebind the server reports it and keeps the previous binding.
    BindError {
        /// The port that could not be bound.
        port: u16,
        /// A description of the bind failure.
        context: String,
    },
    /// A single datagram could not be transmitted. Logged per packet, never fatal.
    SendError {
        /// Where the datagram was headed.
        destination: SocketAddr,
        /// A description of the send failure.
        context: String,
    },
    /// A network socket operation failed outside the per-packet path.
    SocketError {
        /// A description of the socket error.
        context: String,
    },
    /// An internal error occurred that should not happen under normal operation.
    InternalError {
        /// Further details on the internal error.
        context: String,
    },
}

impl Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingError::Timeout { sequence } => {
                write!(f, "Request timed out waiting for echo of probe {}", sequence)
            }
            PingError::PayloadMismatch { sequence } => {
                write!(
                    f,
                    "Echo payload did not match transmitted probe {}",
                    sequence
                )
            }
            PingError::UnresolvedHost { host } => {
                write!(f, "Host '{}' did not resolve to any address", host)
            }
            PingError::InvalidArgument { context } => {
                write!(f, "Invalid argument: {}", context)
            }
            PingError::BindError { port, context } => {
                write!(f, "Could not bind UDP port {}: {}", port, context)
            }
            PingError::SendError {
                destination,
                context,
            } => {
                write!(f, "Failed to send datagram to {}: {}", destination, context)
            }
            PingError::SocketError { context } => {
                write!(f, "Socket error: {}", context)
            }
            PingError::InternalError { context } => {
                write!(f, "Internal error: {}", context)
            }
        }
    }
}

impl Error for PingError {}
