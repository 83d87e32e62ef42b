//! Codec for encoding and decoding udpcast datagrams.
//!
//! This module appends the text delimiter on the way out and strips it on the way in.
//! There is no length prefix: the UDP datagram boundary delimits each message.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::payload::Payload;

/// Delimiter appended to text payloads.
pub const DELIMITER: u8 = b'\n';

/// Default receive buffer size. Larger datagrams are truncated by the transport.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 4096;

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded datagram exceeds the configured maximum.
    #[error("Datagram size {size} exceeds maximum {max}")]
    DatagramTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Explicit length is larger than the buffer it refers to.
    #[error("Length {length} exceeds buffer of {available} bytes")]
    LengthOutOfBounds {
        /// Requested length.
        length: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Payload is not valid UTF-8.
    #[error("Invalid UTF-8 payload: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Encode a payload into a datagram.
///
/// Text payloads are followed by [`DELIMITER`]; binary payloads are returned as-is
/// without copying.
///
/// # Errors
///
/// Returns an error if the datagram would exceed [`MAX_UDP_PAYLOAD`].
pub fn encode(payload: &Payload) -> Result<Bytes, ProtocolError> {
    DatagramCodec::default().encode(payload)
}

/// Encode a payload into an existing buffer.
///
/// # Errors
///
/// Returns an error if the datagram would exceed [`MAX_UDP_PAYLOAD`].
pub fn encode_into(payload: &Payload, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    check_size(payload.encoded_len(), MAX_UDP_PAYLOAD)?;
    write_payload(payload, buf);
    Ok(())
}

/// Decode a datagram, stripping at most one trailing delimiter.
#[must_use]
pub fn decode(datagram: &[u8]) -> &[u8] {
    match datagram.split_last() {
        Some((&DELIMITER, rest)) => rest,
        _ => datagram,
    }
}

/// Decode a datagram as UTF-8 text.
///
/// # Errors
///
/// Returns an error if the payload is not valid UTF-8.
pub fn decode_text(datagram: &[u8]) -> Result<&str, ProtocolError> {
    Ok(std::str::from_utf8(decode(datagram))?)
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::DatagramTooLarge { size, max });
    }
    Ok(())
}

fn write_payload(payload: &Payload, buf: &mut BytesMut) {
    buf.reserve(payload.encoded_len());
    buf.extend_from_slice(payload.as_bytes());
    if let Payload::Text(_) = payload {
        buf.put_u8(DELIMITER);
    }
}

/// Codec with a configurable outbound size limit.
#[derive(Debug, Clone, Copy)]
pub struct DatagramCodec {
    max_datagram_size: usize,
}

impl Default for DatagramCodec {
    fn default() -> Self {
        Self {
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl DatagramCodec {
    /// Create a codec with the default limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that rejects datagrams larger than `max_datagram_size`.
    ///
    /// The limit is clamped to [`MAX_UDP_PAYLOAD`].
    #[must_use]
    pub fn with_max_datagram_size(max_datagram_size: usize) -> Self {
        Self {
            max_datagram_size: max_datagram_size.min(MAX_UDP_PAYLOAD),
        }
    }

    /// Get the outbound size limit.
    #[must_use]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Encode a payload into a datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram exceeds this codec's limit.
    pub fn encode(&self, payload: &Payload) -> Result<Bytes, ProtocolError> {
        check_size(payload.encoded_len(), self.max_datagram_size)?;

        match payload {
            Payload::Binary(bytes) => Ok(bytes.clone()),
            Payload::Text(_) => {
                let mut buf = BytesMut::new();
                write_payload(payload, &mut buf);
                Ok(buf.freeze())
            }
        }
    }

    /// Decode a datagram.
    #[must_use]
    pub fn decode<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        decode(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_appends_single_delimiter() {
        let encoded = encode(&Payload::text("Hello")).unwrap();
        assert_eq!(&encoded[..], b"Hello\n");
        assert_eq!(decode(&encoded), b"Hello");
    }

    #[test]
    fn test_binary_sent_verbatim() {
        let data = [0x54, 0x65, 0x73, 0x74, 0x31, 0x32, 0x33];
        let payload = Payload::binary_prefix(&data, 7).unwrap();
        let encoded = encode(&payload).unwrap();
        assert_eq!(&encoded[..], &data[..]);
        assert_eq!(decode(&encoded), &data[..]);
    }

    #[test]
    fn test_decode_strips_at_most_one_delimiter() {
        assert_eq!(decode(b"line\n\n"), b"line\n");
        assert_eq!(decode(b"line"), b"line");
        assert_eq!(decode(b"\n"), b"");
        assert_eq!(decode(b""), b"");
    }

    #[test]
    fn test_text_with_embedded_delimiter() {
        let encoded = encode(&Payload::text("a\nb")).unwrap();
        assert_eq!(decode_text(&encoded).unwrap(), "a\nb");
    }

    #[test]
    fn test_decode_text_invalid_utf8() {
        match decode_text(&[0xff, 0xfe, b'\n']) {
            Err(ProtocolError::InvalidUtf8(_)) => {}
            other => panic!("Expected InvalidUtf8 error, got {:?}", other),
        }
    }

    #[test]
    fn test_datagram_too_large() {
        let payload = Payload::binary(vec![0u8; MAX_UDP_PAYLOAD + 1]);
        match encode(&payload) {
            Err(ProtocolError::DatagramTooLarge { .. }) => {}
            other => panic!("Expected DatagramTooLarge error, got {:?}", other),
        }

        // The delimiter counts against the limit.
        let text = Payload::text(vec![b'x'; MAX_UDP_PAYLOAD]);
        assert!(encode(&text).is_err());
    }

    #[test]
    fn test_codec_custom_limit() {
        let codec = DatagramCodec::with_max_datagram_size(8);
        assert!(codec.encode(&Payload::text("1234567")).is_ok());
        assert!(codec.encode(&Payload::text("12345678")).is_err());

        let clamped = DatagramCodec::with_max_datagram_size(usize::MAX);
        assert_eq!(clamped.max_datagram_size(), MAX_UDP_PAYLOAD);
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(&Payload::text("one"), &mut buf).unwrap();
        encode_into(&Payload::binary(b"two".to_vec()), &mut buf).unwrap();
        assert_eq!(&buf[..], b"one\ntwo");
    }
}
