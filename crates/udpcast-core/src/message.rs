//! Inbound message types.

use crate::endpoint::Endpoint;
use bytes::Bytes;
use std::sync::Arc;
use udpcast_protocol::codec;

/// A datagram delivered to a receive callback.
///
/// The payload borrows the channel's receive buffer, which is reused for the
/// next datagram as soon as the callback returns. Copy it out with
/// [`InboundMessage::to_datagram`] to keep it.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    raw: &'a [u8],
    source: Endpoint,
}

impl<'a> InboundMessage<'a> {
    /// Wrap a received datagram.
    #[must_use]
    pub fn new(raw: &'a [u8], source: Endpoint) -> Self {
        Self { raw, source }
    }

    /// Get the payload with at most one trailing delimiter removed.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        codec::decode(self.raw)
    }

    /// Get the payload as UTF-8 text, if it is valid.
    #[must_use]
    pub fn text(&self) -> Option<&'a str> {
        codec::decode_text(self.raw).ok()
    }

    /// Get the datagram exactly as received.
    #[must_use]
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Get the sender.
    #[must_use]
    pub fn source(&self) -> Endpoint {
        self.source
    }

    /// Copy the datagram, exactly as received, into an owned value.
    #[must_use]
    pub fn to_datagram(&self) -> Datagram {
        Datagram::new(Bytes::copy_from_slice(self.raw), self.source)
    }
}

/// An owned copy of a received datagram.
///
/// The bytes are kept exactly as received; delimiter stripping happens in
/// [`Datagram::payload`], so binary datagrams that end in a newline byte
/// stay intact through [`Datagram::raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    raw: Bytes,
    source: Endpoint,
}

impl Datagram {
    /// Wrap received bytes.
    #[must_use]
    pub fn new(raw: impl Into<Bytes>, source: Endpoint) -> Self {
        Self {
            raw: raw.into(),
            source,
        }
    }

    /// Get the payload with at most one trailing delimiter removed.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        codec::decode(&self.raw)
    }

    /// Get the payload as UTF-8 text, if it is valid.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        codec::decode_text(&self.raw).ok()
    }

    /// Get the datagram exactly as received.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Take the received bytes.
    #[must_use]
    pub fn into_raw(self) -> Bytes {
        self.raw
    }

    /// Get the sender.
    #[must_use]
    pub fn source(&self) -> Endpoint {
        self.source
    }

    /// Get the datagram size in bytes, as received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Check if the datagram is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Callback invoked once per received datagram, on a reactor worker thread.
pub type MessageHandler = Arc<dyn Fn(InboundMessage<'_>) + Send + Sync>;
