//! # udpcast-core
//!
//! Asynchronous UDP unicast and multicast messaging.
//!
//! This crate provides the building blocks:
//!
//! - **Reactor** - Event-processing context that drives every channel
//! - **Channel** - Bound UDP socket with group membership, sends and a receive loop
//! - **Publisher** - Sends text or binary messages to a unicast or multicast destination
//! - **Receiver** - Joins a fixed set of multicast groups and delivers messages to a callback
//! - **Registry** - Per-channel traffic counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Publisher  │────▶│   Channel   │◀────│  Receiver   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Reactor   │────▶│  Registry   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use udpcast_core::{Channel, Publisher, Reactor, Receiver};
//!
//! let reactor = Reactor::new()?;
//! let handle = reactor.handle();
//!
//! let receiver = Receiver::bind(&handle, 8000, [IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1))])?;
//! receiver.start_receiving(|message| {
//!     println!("{} says {:?}", message.source(), message.text());
//! })?;
//!
//! let group = (Ipv4Addr::new(239, 255, 0, 1), 8000);
//! let publisher = Publisher::multicast(Channel::open(&handle, 0)?, group)?;
//! publisher.publish("Hello");
//!
//! reactor.run();
//! # Ok::<(), udpcast_core::ChannelError>(())
//! ```

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod publisher;
pub mod reactor;
pub mod receiver;
pub mod registry;

pub use channel::{Channel, ChannelConfig};
pub use endpoint::Endpoint;
pub use error::{default_error_sink, ChannelError, ErrorSink, SharedErrorSink, TracingErrorSink};
pub use message::{Datagram, InboundMessage, MessageHandler};
pub use publisher::{Destination, Publisher};
pub use reactor::{Reactor, ReactorConfig, ReactorHandle};
pub use receiver::Receiver;
pub use registry::{ChannelId, ChannelRegistry, ChannelStatsSnapshot, ReactorStats};
pub use udpcast_protocol::{Payload, PayloadKind};
