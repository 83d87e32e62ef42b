//! Payload forms accepted by the send path.

use bytes::Bytes;

use crate::codec::ProtocolError;

/// How a payload is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Delimiter-terminated line.
    Text,
    /// Raw bytes, sent unmodified.
    Binary,
}

/// An outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text (or arbitrary bytes) that will be terminated by a delimiter.
    Text(Bytes),
    /// Bytes sent verbatim.
    Binary(Bytes),
}

impl Payload {
    /// Create a text payload.
    #[must_use]
    pub fn text(text: impl AsRef<[u8]>) -> Self {
        Payload::Text(Bytes::copy_from_slice(text.as_ref()))
    }

    /// Create a binary payload from owned bytes.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Payload::Binary(data.into())
    }

    /// Create a binary payload from the first `length` bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LengthOutOfBounds`] if `length` exceeds `data.len()`.
    pub fn binary_prefix(data: &[u8], length: usize) -> Result<Self, ProtocolError> {
        if length > data.len() {
            return Err(ProtocolError::LengthOutOfBounds {
                length,
                available: data.len(),
            });
        }
        Ok(Payload::Binary(Bytes::copy_from_slice(&data[..length])))
    }

    /// Get the framing kind.
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Get the payload bytes, without framing.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Payload::Text(bytes) | Payload::Binary(bytes) => bytes,
        }
    }

    /// Get the payload size in bytes, without framing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Get the size of the datagram this payload encodes to.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Text(bytes) => bytes.len() + 1,
            Payload::Binary(bytes) => bytes.len(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::text(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(Bytes::from(text))
    }
}
