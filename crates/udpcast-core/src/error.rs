//! Channel errors and the out-of-band error sink.
//!
//! Construction-time failures ([`ChannelError::BindFailed`],
//! [`ChannelError::JoinFailed`]) are returned to the caller. Failures on the
//! asynchronous send and receive paths have no caller to return to, so they
//! are reported to an [`ErrorSink`] instead.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};
use udpcast_protocol::ProtocolError;

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Local address unavailable or invalid.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Multicast group address invalid, or membership rejected by the OS.
    #[error("Failed to join multicast group {group}: {source}")]
    JoinFailed {
        /// Group that could not be joined.
        group: IpAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Outbound datagram could not be handed to the transport.
    #[error("Send to {destination} failed: {source}")]
    SendFailed {
        /// Datagram destination.
        destination: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Transport failure on the receive path. Terminal for the receive loop.
    #[error("Receive failed: {source}")]
    ReceiveFailed {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Operation on a closed channel.
    #[error("Channel closed")]
    Closed,

    /// Publish called on a publisher without a default destination.
    #[error("No destination configured")]
    NoDestination,

    /// Payload could not be framed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reactor could not be started.
    #[error("Reactor error: {0}")]
    Reactor(#[source] io::Error),
}

impl ChannelError {
    /// Short, stable name of the error kind, for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::BindFailed { .. } => "bind",
            ChannelError::JoinFailed { .. } => "join",
            ChannelError::SendFailed { .. } => "send",
            ChannelError::ReceiveFailed { .. } => "receive",
            ChannelError::Closed => "closed",
            ChannelError::NoDestination => "no_destination",
            ChannelError::Protocol(_) => "protocol",
            ChannelError::Reactor(_) => "reactor",
        }
    }

    /// Check if the error stops the receive loop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::ReceiveFailed { .. })
    }
}

/// Receiver of asynchronous channel failures.
///
/// Implementations are called from reactor worker threads and must not block.
pub trait ErrorSink: Send + Sync {
    /// Report an error.
    fn report(&self, error: &ChannelError);
}

impl<F> ErrorSink for F
where
    F: Fn(&ChannelError) + Send + Sync,
{
    fn report(&self, error: &ChannelError) {
        self(error);
    }
}

/// Error sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: &ChannelError) {
        if err.is_terminal() {
            error!(kind = err.kind(), "{err}; receive loop stopped");
        } else {
            warn!(kind = err.kind(), "{err}");
        }
    }
}

/// Shared handle to an error sink.
pub type SharedErrorSink = Arc<dyn ErrorSink>;

/// The sink used when none is configured.
#[must_use]
pub fn default_error_sink() -> SharedErrorSink {
    Arc::new(TracingErrorSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_error_kinds() {
        let err = ChannelError::ReceiveFailed {
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert_eq!(err.kind(), "receive");
        assert!(err.is_terminal());
        assert!(!ChannelError::Closed.is_terminal());
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let sink: SharedErrorSink = Arc::new(move |e: &ChannelError| {
            recorded.lock().push(e.kind());
        });

        sink.report(&ChannelError::NoDestination);
        sink.report(&ChannelError::Closed);

        assert_eq!(*seen.lock(), vec!["no_destination", "closed"]);
    }

    #[test]
    fn test_error_display() {
        let err = ChannelError::JoinFailed {
            group: "10.0.0.1".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a multicast address"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to join multicast group 10.0.0.1: not a multicast address"
        );
    }
}
