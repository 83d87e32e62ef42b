//! Publisher role.
//!
//! A [`Publisher`] wraps a [`Channel`] and an optional default destination.
//! Publishing is fire-and-forget: failures go to the channel's error sink.

use crate::channel::Channel;
use crate::endpoint::Endpoint;
use crate::error::ChannelError;
use crate::reactor::ReactorHandle;
use std::io;
use tracing::debug;
use udpcast_protocol::Payload;

/// Where a publisher sends by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A single remote endpoint.
    Unicast(Endpoint),
    /// A multicast group and port.
    Multicast(Endpoint),
}

impl Destination {
    /// Get the destination endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Destination::Unicast(endpoint) | Destination::Multicast(endpoint) => *endpoint,
        }
    }

    /// Check if this is a multicast destination.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        matches!(self, Destination::Multicast(_))
    }
}

/// Sends messages through a channel.
#[derive(Debug)]
pub struct Publisher {
    channel: Channel,
    destination: Option<Destination>,
}

impl Publisher {
    /// Create a publisher without a default destination.
    ///
    /// Use [`publish_to`](Self::publish_to) to address each message.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            destination: None,
        }
    }

    /// Open a channel on `local_port` and wrap it in a publisher without a default destination.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BindFailed`] if the port is unavailable.
    pub fn bind(reactor: &ReactorHandle, local_port: u16) -> Result<Self, ChannelError> {
        Channel::open(reactor, local_port).map(Self::new)
    }

    /// Create a publisher that sends to `remote` by default.
    #[must_use]
    pub fn unicast(channel: Channel, remote: impl Into<Endpoint>) -> Self {
        Self {
            channel,
            destination: Some(Destination::Unicast(remote.into())),
        }
    }

    /// Create a publisher that sends to a multicast group by default.
    ///
    /// The channel does not join the group; call
    /// [`join_own_group`](Self::join_own_group) to also receive the traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if `group` is not an IPv4 multicast address.
    pub fn multicast(channel: Channel, group: impl Into<Endpoint>) -> Result<Self, ChannelError> {
        let group = group.into();
        if !group.is_multicast() {
            return Err(ChannelError::JoinFailed {
                group: group.address(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "not an IPv4 multicast address",
                ),
            });
        }

        Ok(Self {
            channel,
            destination: Some(Destination::Multicast(group)),
        })
    }

    /// Join the multicast destination group on the publisher's own channel.
    ///
    /// Does nothing for unicast publishers.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if the OS rejects the membership.
    pub fn join_own_group(&self) -> Result<(), ChannelError> {
        match self.destination {
            Some(Destination::Multicast(group)) => self.channel.join_group(group.address()),
            _ => Ok(()),
        }
    }

    /// Get the default destination.
    #[must_use]
    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }

    /// Get the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Publish a text message to the default destination.
    pub fn publish(&self, message: impl AsRef<[u8]>) {
        self.publish_payload(&Payload::text(message));
    }

    /// Publish the first `length` bytes of `data`, unframed, to the default destination.
    pub fn publish_bytes(&self, data: &[u8], length: usize) {
        match Payload::binary_prefix(data, length) {
            Ok(payload) => self.publish_payload(&payload),
            Err(e) => self.channel.error_sink().report(&ChannelError::from(e)),
        }
    }

    /// Publish a payload to the default destination.
    pub fn publish_payload(&self, payload: &Payload) {
        match self.destination {
            Some(destination) => self.publish_payload_to(payload, destination.endpoint()),
            None => self
                .channel
                .error_sink()
                .report(&ChannelError::NoDestination),
        }
    }

    /// Publish a text message to `destination`.
    pub fn publish_to(&self, message: impl AsRef<[u8]>, destination: impl Into<Endpoint>) {
        self.publish_payload_to(&Payload::text(message), destination);
    }

    /// Publish the first `length` bytes of `data`, unframed, to `destination`.
    pub fn publish_bytes_to(&self, data: &[u8], length: usize, destination: impl Into<Endpoint>) {
        self.channel.send_bytes(data, length, destination);
    }

    /// Publish a payload to `destination`.
    pub fn publish_payload_to(&self, payload: &Payload, destination: impl Into<Endpoint>) {
        let destination = destination.into();
        debug!(
            channel = self.channel.id(),
            destination = %destination,
            bytes = payload.len(),
            "Publishing"
        );
        self.channel.send(payload, destination);
    }

    /// Close the underlying channel.
    pub fn close(&self) {
        self.channel.close();
    }
}
