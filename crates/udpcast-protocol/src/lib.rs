//! # udpcast-protocol
//!
//! Wire framing for the udpcast datagram channel.
//!
//! UDP already preserves message boundaries, so framing is minimal:
//!
//! - **Text** payloads get a single `\n` delimiter appended before transmission,
//!   for line-oriented consumers.
//! - **Binary** payloads are sent verbatim, with no prefix or suffix.
//!
//! Decoding is defensive: a receiver strips at most one trailing delimiter,
//! so it accepts datagrams from either send path.
//!
//! ## Example
//!
//! ```rust
//! use udpcast_protocol::{codec, Payload};
//!
//! let encoded = codec::encode(&Payload::text("Hello")).unwrap();
//! assert_eq!(&encoded[..], b"Hello\n");
//! assert_eq!(codec::decode(&encoded), b"Hello");
//! ```

pub mod codec;
pub mod payload;

pub use codec::{decode, decode_text, encode, DatagramCodec, ProtocolError};
pub use payload::{Payload, PayloadKind};
