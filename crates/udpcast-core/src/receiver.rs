//! Receiver role.
//!
//! A [`Receiver`] wraps a [`Channel`] and a fixed set of multicast groups.
//! Groups cannot be added or removed once the receiver is built.

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{Datagram, InboundMessage};
use crate::reactor::ReactorHandle;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receives messages on a channel subscribed to a set of multicast groups.
#[derive(Debug)]
pub struct Receiver {
    channel: Channel,
    groups: BTreeSet<IpAddr>,
}

impl Receiver {
    /// Create a receiver for `groups` on an open channel.
    ///
    /// Nothing is joined until [`start_receiving`](Self::start_receiving).
    #[must_use]
    pub fn new(channel: Channel, groups: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            channel,
            groups: groups.into_iter().collect(),
        }
    }

    /// Open a channel on `port` and create a receiver for `groups`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BindFailed`] if the port is unavailable.
    pub fn bind(
        reactor: &ReactorHandle,
        port: u16,
        groups: impl IntoIterator<Item = IpAddr>,
    ) -> Result<Self, ChannelError> {
        Ok(Self::new(Channel::open(reactor, port)?, groups))
    }

    /// Get the configured groups, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<IpAddr> {
        self.groups.iter().copied().collect()
    }

    /// Get the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Join every configured group, then start delivering messages to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] for the first group that cannot be
    /// joined; the receive loop is not started in that case.
    pub fn start_receiving<F>(&self, handler: F) -> Result<(), ChannelError>
    where
        F: Fn(InboundMessage<'_>) + Send + Sync + 'static,
    {
        self.join_all()?;
        self.channel.start_receiving(handler)
    }

    /// Join every configured group and deliver owned datagrams through a tokio channel.
    ///
    /// Delivery stops when the returned receiver is dropped or the channel closes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] for the first group that cannot be joined.
    pub fn start_stream(&self) -> Result<mpsc::UnboundedReceiver<Datagram>, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel_id = self.channel.id();

        self.start_receiving(move |message| {
            if tx.send(message.to_datagram()).is_err() {
                debug!(channel = channel_id, "Datagram stream dropped, discarding message");
            }
        })?;
        Ok(rx)
    }

    /// Close the underlying channel.
    pub fn close(&self) {
        self.channel.close();
    }

    fn join_all(&self) -> Result<(), ChannelError> {
        for group in &self.groups {
            if let Err(e) = self.channel.join_group(*group) {
                warn!(channel = self.channel.id(), error = %e, "Receiver not started");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::reactor::Reactor;
    use std::net::Ipv4Addr;

    fn group(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(239, 255, 0, last))
    }

    fn loopback_channel(reactor: &Reactor) -> Channel {
        Channel::open_with(
            &reactor.handle(),
            ChannelConfig::new(0).with_multicast_interface(Ipv4Addr::LOCALHOST),
        )
        .unwrap()
    }

    #[test]
    fn test_groups_are_a_set() {
        let reactor = Reactor::new().unwrap();
        let receiver = Receiver::new(loopback_channel(&reactor), [group(2), group(1), group(2)]);
        assert_eq!(receiver.groups(), vec![group(1), group(2)]);
    }

    #[test]
    fn test_start_receiving_joins_all_groups() {
        let reactor = Reactor::new().unwrap();
        let receiver = Receiver::new(loopback_channel(&reactor), [group(1), group(2)]);

        receiver.start_receiving(|_| {}).unwrap();

        assert_eq!(
            receiver.channel().joined_groups(),
            vec![Ipv4Addr::new(239, 255, 0, 1), Ipv4Addr::new(239, 255, 0, 2)]
        );
        assert!(receiver.channel().is_receiving());
    }

    #[test]
    fn test_failed_join_does_not_start() {
        let reactor = Reactor::new().unwrap();
        let unicast: IpAddr = "192.168.1.1".parse().unwrap();
        let receiver = Receiver::new(loopback_channel(&reactor), [group(1), unicast]);

        match receiver.start_receiving(|_| {}) {
            Err(ChannelError::JoinFailed { group, .. }) => assert_eq!(group, unicast),
            other => panic!("Expected JoinFailed error, got {:?}", other),
        }

        assert!(!receiver.channel().is_receiving());
    }

    #[test]
    fn test_joined_groups_survive_failure() {
        let reactor = Reactor::new().unwrap();
        // Groups are joined in address order, so 239.255.0.1 goes before 240.0.0.1.
        let bad: IpAddr = "240.0.0.1".parse().unwrap();
        let receiver = Receiver::new(loopback_channel(&reactor), [bad, group(1)]);

        assert!(receiver.start_receiving(|_| {}).is_err());
        assert!(!receiver.channel().is_receiving());
        assert_eq!(
            receiver.channel().joined_groups(),
            vec![Ipv4Addr::new(239, 255, 0, 1)]
        );
    }

    #[test]
    fn test_no_groups_is_plain_unicast() {
        let reactor = Reactor::new().unwrap();
        let receiver = Receiver::bind(&reactor.handle(), 0, []).unwrap();

        let _stream = receiver.start_stream().unwrap();
        assert!(receiver.channel().is_receiving());
        assert!(receiver.channel().joined_groups().is_empty());
    }
}
