//! Datagram channel.
//!
//! A [`Channel`] owns one UDP socket bound to a local port, the set of
//! multicast groups it has joined, a single receive loop and a single send
//! queue. All socket I/O runs on the reactor the channel was opened on.
//!
//! ## Receive loop
//!
//! One task per channel arms a receive into a fixed-size buffer, hands the
//! datagram to the registered callback, and re-arms before yielding back to
//! the reactor. Callbacks therefore never overlap, and the buffer is reused
//! as soon as a callback returns.
//!
//! Registering a new callback while the loop is running replaces the old one
//! (last registered wins). If a receive is armed at that moment it is
//! cancelled and re-armed for the new callback; no datagram is lost because
//! the OS keeps it queued. A delivery that is already executing finishes
//! against the callback it started with. Callbacks may call
//! [`Channel::start_receiving`] themselves.
//!
//! A receive error ends the loop and is reported to the error sink. Calling
//! `start_receiving` again starts a fresh loop.
//!
//! ## Socket ownership
//!
//! The channel holds the only strong reference to its socket. The send and
//! receive tasks hold a [`Weak`] one and upgrade it for the duration of a
//! single poll, so [`Channel::close`] releases the port immediately even when
//! the reactor is not running.

use crate::endpoint::Endpoint;
use crate::error::{default_error_sink, ChannelError, SharedErrorSink};
use crate::message::{InboundMessage, MessageHandler};
use crate::reactor::ReactorHandle;
use crate::registry::{ChannelId, ChannelStats, ChannelStatsSnapshot};
use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::future::poll_fn;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::Poll;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use udpcast_protocol::codec::{DEFAULT_MAX_DATAGRAM_SIZE, MAX_UDP_PAYLOAD};
use udpcast_protocol::{DatagramCodec, Payload};

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Local address to bind to.
    pub bind_addr: Ipv4Addr,
    /// Local port. Zero lets the OS pick one.
    pub port: u16,
    /// Enable `SO_REUSEADDR`, so several receivers on one host can share a multicast port.
    pub reuse_address: bool,
    /// Receive buffer size. Longer datagrams are truncated.
    pub recv_buffer_size: usize,
    /// Largest datagram the send path accepts.
    pub max_datagram_size: usize,
    /// Interface used for multicast joins and outbound multicast.
    pub multicast_interface: Ipv4Addr,
    /// Multicast TTL. `None` keeps the OS default.
    pub multicast_ttl: Option<u32>,
    /// Multicast loopback. `None` keeps the OS default.
    pub multicast_loop: Option<bool>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            port: 0,
            reuse_address: true,
            recv_buffer_size: DEFAULT_MAX_DATAGRAM_SIZE,
            max_datagram_size: MAX_UDP_PAYLOAD,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: None,
            multicast_loop: None,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration for `port` on all interfaces.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Set the local bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, bind_addr: Ipv4Addr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    /// Enable or disable address reuse.
    #[must_use]
    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    /// Set the receive buffer size.
    #[must_use]
    pub fn with_recv_buffer_size(mut self, recv_buffer_size: usize) -> Self {
        self.recv_buffer_size = recv_buffer_size;
        self
    }

    /// Set the largest datagram the send path accepts.
    #[must_use]
    pub fn with_max_datagram_size(mut self, max_datagram_size: usize) -> Self {
        self.max_datagram_size = max_datagram_size;
        self
    }

    /// Set the multicast interface.
    #[must_use]
    pub fn with_multicast_interface(mut self, interface: Ipv4Addr) -> Self {
        self.multicast_interface = interface;
        self
    }

    /// Set the multicast TTL.
    #[must_use]
    pub fn with_multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = Some(ttl);
        self
    }

    /// Enable or disable multicast loopback.
    #[must_use]
    pub fn with_multicast_loop(mut self, enabled: bool) -> Self {
        self.multicast_loop = Some(enabled);
        self
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((self.bind_addr, self.port))
    }
}

/// A datagram queued for the send loop.
struct Outbound {
    datagram: Bytes,
    destination: SocketAddr,
}

/// A running receive loop.
struct ReceiveLoop {
    handler: watch::Sender<MessageHandler>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReceiveLoop {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.task.is_finished()
    }
}

/// Socket state released by [`Channel::close`].
struct ChannelIo {
    socket: Arc<UdpSocket>,
    outbound: mpsc::UnboundedSender<Outbound>,
    groups: HashSet<Ipv4Addr>,
    receive: Option<ReceiveLoop>,
}

/// A UDP channel with multicast membership, fire-and-forget sends and a receive loop.
pub struct Channel {
    id: ChannelId,
    local_addr: SocketAddr,
    config: ChannelConfig,
    codec: DatagramCodec,
    reactor: ReactorHandle,
    stats: Arc<ChannelStats>,
    errors: SharedErrorSink,
    closed: Arc<AtomicBool>,
    io: Mutex<Option<ChannelIo>>,
}

impl Channel {
    /// Open a channel on `port` (zero for an ephemeral port) with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BindFailed`] if the port is unavailable.
    pub fn open(reactor: &ReactorHandle, port: u16) -> Result<Self, ChannelError> {
        Self::open_with(reactor, ChannelConfig::new(port))
    }

    /// Open a channel with custom configuration, logging async failures.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BindFailed`] if the socket cannot be created or bound.
    pub fn open_with(reactor: &ReactorHandle, config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::open_with_sink(reactor, config, default_error_sink())
    }

    /// Open a channel reporting async failures to `errors`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BindFailed`] if the socket cannot be created or bound.
    pub fn open_with_sink(
        reactor: &ReactorHandle,
        config: ChannelConfig,
        errors: SharedErrorSink,
    ) -> Result<Self, ChannelError> {
        let addr = config.local_addr();
        let bind_failed = |source| ChannelError::BindFailed { addr, source };

        // The std socket is closed on every early return below.
        let std_socket = bind_socket(&config).map_err(bind_failed)?;
        let socket = {
            let _runtime = reactor.enter();
            UdpSocket::from_std(std_socket).map_err(bind_failed)?
        };
        let local_addr = socket.local_addr().map_err(bind_failed)?;
        let socket = Arc::new(socket);

        let (id, stats) = reactor.registry().register(local_addr);

        let (outbound, queue) = mpsc::unbounded_channel();
        reactor.spawn(send_loop(
            id,
            Arc::downgrade(&socket),
            queue,
            Arc::clone(&stats),
            Arc::clone(&errors),
        ));

        info!(channel = id, addr = %local_addr, "Channel opened");

        Ok(Self {
            id,
            local_addr,
            codec: DatagramCodec::with_max_datagram_size(config.max_datagram_size),
            config,
            reactor: reactor.clone(),
            stats,
            errors,
            closed: Arc::new(AtomicBool::new(false)),
            io: Mutex::new(Some(ChannelIo {
                socket,
                outbound,
                groups: HashSet::new(),
                receive: None,
            })),
        })
    }

    /// Get the channel id.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Get the bound local address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the bound local port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Get the configuration the channel was opened with.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Get the reactor driving this channel.
    #[must_use]
    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    /// Get the error sink.
    #[must_use]
    pub fn error_sink(&self) -> &SharedErrorSink {
        &self.errors
    }

    /// Join a multicast group. Joining a group twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::JoinFailed`] if `group` is not an IPv4 multicast
    /// address or the OS rejects the membership, and [`ChannelError::Closed`]
    /// if the channel is closed. Groups joined earlier stay joined.
    pub fn join_group(&self, group: impl Into<IpAddr>) -> Result<(), ChannelError> {
        let group = group.into();
        let multicast = match group {
            IpAddr::V4(addr) if addr.is_multicast() => addr,
            _ => {
                return Err(ChannelError::JoinFailed {
                    group,
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "not an IPv4 multicast address",
                    ),
                })
            }
        };

        let mut guard = self.io.lock();
        let io = guard.as_mut().ok_or(ChannelError::Closed)?;

        if io.groups.contains(&multicast) {
            trace!(channel = self.id, group = %multicast, "Already joined");
            return Ok(());
        }

        io.socket
            .join_multicast_v4(multicast, self.config.multicast_interface)
            .map_err(|source| ChannelError::JoinFailed { group, source })?;
        io.groups.insert(multicast);
        self.stats.set_groups_joined(io.groups.len());

        debug!(
            channel = self.id,
            group = %multicast,
            interface = %self.config.multicast_interface,
            groups = io.groups.len(),
            "Joined multicast group"
        );
        Ok(())
    }

    /// Get the joined multicast groups, sorted.
    #[must_use]
    pub fn joined_groups(&self) -> Vec<Ipv4Addr> {
        let mut groups: Vec<_> = self
            .io
            .lock()
            .as_ref()
            .map(|io| io.groups.iter().copied().collect())
            .unwrap_or_default();
        groups.sort_unstable();
        groups
    }

    /// Check if the channel has joined `group`.
    #[must_use]
    pub fn has_joined(&self, group: Ipv4Addr) -> bool {
        self.io
            .lock()
            .as_ref()
            .is_some_and(|io| io.groups.contains(&group))
    }

    /// Register `handler` and start the receive loop.
    ///
    /// If the loop is already running, only the handler is replaced. The
    /// handler runs on a reactor worker thread and must not block.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel is closed.
    pub fn start_receiving<F>(&self, handler: F) -> Result<(), ChannelError>
    where
        F: Fn(InboundMessage<'_>) + Send + Sync + 'static,
    {
        self.start_receiving_shared(Arc::new(handler))
    }

    /// Like [`start_receiving`](Self::start_receiving), for an already shared handler.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel is closed.
    pub fn start_receiving_shared(&self, handler: MessageHandler) -> Result<(), ChannelError> {
        let mut guard = self.io.lock();
        let io = guard.as_mut().ok_or(ChannelError::Closed)?;

        if let Some(receive) = io.receive.as_ref().filter(|r| r.is_alive()) {
            receive.handler.send_replace(handler);
            debug!(channel = self.id, "Receive handler replaced");
            return Ok(());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (handler_tx, handler_rx) = watch::channel(handler);
        let task = self.reactor.spawn(receive_loop(
            ReceiveContext {
                id: self.id,
                socket: Arc::downgrade(&io.socket),
                stats: Arc::clone(&self.stats),
                errors: Arc::clone(&self.errors),
                closed: Arc::clone(&self.closed),
                alive: AliveGuard(Arc::clone(&alive)),
                buffer_size: self.config.recv_buffer_size.max(1),
            },
            handler_rx,
        ));

        io.receive = Some(ReceiveLoop {
            handler: handler_tx,
            alive,
            task,
        });
        debug!(channel = self.id, "Receive loop armed");
        Ok(())
    }

    /// Check if the receive loop is running.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.io
            .lock()
            .as_ref()
            .and_then(|io| io.receive.as_ref())
            .is_some_and(ReceiveLoop::is_alive)
    }

    /// Queue `payload` for `destination` and return immediately.
    ///
    /// Datagrams are handed to the OS in call order. Failures, including
    /// sending on a closed channel, go to the error sink.
    pub fn send(&self, payload: &Payload, destination: impl Into<Endpoint>) {
        let destination = destination.into().socket_addr();

        let datagram = match self.codec.encode(payload) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.errors.report(&ChannelError::from(e));
                return;
            }
        };

        let queued = self.io.lock().as_ref().is_some_and(|io| {
            io.outbound
                .send(Outbound {
                    datagram,
                    destination,
                })
                .is_ok()
        });

        if queued {
            trace!(channel = self.id, destination = %destination, "Datagram queued");
        } else {
            self.errors.report(&ChannelError::Closed);
        }
    }

    /// Send `text` followed by the line delimiter.
    pub fn send_text(&self, text: impl AsRef<[u8]>, destination: impl Into<Endpoint>) {
        self.send(&Payload::text(text), destination);
    }

    /// Send the first `length` bytes of `data` verbatim.
    pub fn send_bytes(&self, data: &[u8], length: usize, destination: impl Into<Endpoint>) {
        match Payload::binary_prefix(data, length) {
            Ok(payload) => self.send(&payload, destination),
            Err(e) => self.errors.report(&ChannelError::from(e)),
        }
    }

    /// Get a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }

    /// Check if the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel the receive loop and release the socket. Idempotent.
    ///
    /// The port is unbound by the time this returns. Datagrams still queued
    /// for sending are discarded.
    ///
    /// No callback starts after this returns, but a callback that is already
    /// executing on another worker thread may still be running. Callers that
    /// need to wait for it must synchronize with the callback themselves.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(io) = self.io.lock().take() {
            if let Some(receive) = io.receive {
                receive.task.abort();
            }
        }

        self.reactor.registry().deregister(self.id);
        info!(channel = self.id, addr = %self.local_addr, "Channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn bind_socket(config: &ChannelConfig) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(config.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.local_addr().into())?;

    if let Some(ttl) = config.multicast_ttl {
        socket.set_multicast_ttl_v4(ttl)?;
    }
    if let Some(enabled) = config.multicast_loop {
        socket.set_multicast_loop_v4(enabled)?;
    }
    if !config.multicast_interface.is_unspecified() {
        socket.set_multicast_if_v4(&config.multicast_interface)?;
    }

    Ok(socket.into())
}

/// Send one datagram, holding the socket only while polled.
///
/// Returns `None` once the channel has released the socket.
async fn send_to(
    socket: &Weak<UdpSocket>,
    datagram: &[u8],
    destination: SocketAddr,
) -> Option<io::Result<usize>> {
    poll_fn(|cx| match socket.upgrade() {
        Some(socket) => socket.poll_send_to(cx, datagram, destination).map(Some),
        None => Poll::Ready(None),
    })
    .await
}

/// Receive one datagram into `buf`, holding the socket only while polled.
///
/// Returns `None` once the channel has released the socket.
async fn recv_from(
    socket: &Weak<UdpSocket>,
    buf: &mut [u8],
) -> Option<io::Result<(usize, SocketAddr)>> {
    poll_fn(|cx| {
        let Some(socket) = socket.upgrade() else {
            return Poll::Ready(None);
        };
        let mut read_buf = ReadBuf::new(&mut *buf);
        match socket.poll_recv_from(cx, &mut read_buf) {
            Poll::Ready(result) => {
                Poll::Ready(Some(result.map(|source| (read_buf.filled().len(), source))))
            }
            Poll::Pending => Poll::Pending,
        }
    })
    .await
}

async fn send_loop(
    id: ChannelId,
    socket: Weak<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    stats: Arc<ChannelStats>,
    errors: SharedErrorSink,
) {
    while let Some(Outbound {
        datagram,
        destination,
    }) = queue.recv().await
    {
        match send_to(&socket, &datagram, destination).await {
            Some(Ok(sent)) => {
                stats.record_sent(sent);
                trace!(channel = id, destination = %destination, bytes = sent, "Datagram sent");
            }
            Some(Err(source)) => {
                stats.record_send_error();
                errors.report(&ChannelError::SendFailed {
                    destination,
                    source,
                });
            }
            None => {
                debug!(channel = id, "Socket released, queued datagrams discarded");
                break;
            }
        }
    }
    debug!(channel = id, "Send loop finished");
}

/// Clears the receive loop's liveness flag however the task ends.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owned state captured by the receive task.
struct ReceiveContext {
    id: ChannelId,
    socket: Weak<UdpSocket>,
    stats: Arc<ChannelStats>,
    errors: SharedErrorSink,
    closed: Arc<AtomicBool>,
    alive: AliveGuard,
    buffer_size: usize,
}

async fn receive_loop(ctx: ReceiveContext, mut handler_rx: watch::Receiver<MessageHandler>) {
    let ReceiveContext {
        id,
        socket,
        stats,
        errors,
        closed,
        alive,
        buffer_size,
    } = ctx;
    let mut buf = vec![0u8; buffer_size];

    loop {
        let handler = handler_rx.borrow_and_update().clone();

        tokio::select! {
            biased;

            changed = handler_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                trace!(channel = id, "Receive re-armed for new handler");
            }

            result = recv_from(&socket, &mut buf) => {
                match result {
                    None => break,
                    Some(Ok((len, source))) => {
                        if closed.load(Ordering::Acquire) {
                            break;
                        }
                        if len == buf.len() {
                            debug!(
                                channel = id,
                                peer = %source,
                                bytes = len,
                                "Datagram filled the receive buffer and may be truncated"
                            );
                        }
                        stats.record_received(len);
                        trace!(channel = id, peer = %source, bytes = len, "Datagram received");
                        handler(InboundMessage::new(&buf[..len], source.into()));
                    }
                    Some(Err(source)) => {
                        drop(alive);
                        stats.record_receive_error();
                        warn!(channel = id, "Receive loop terminated");
                        errors.report(&ChannelError::ReceiveFailed { source });
                        return;
                    }
                }
            }
        }
    }

    debug!(channel = id, "Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::{Reactor, ReactorConfig};
    use socket2::SockRef;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn loopback_config() -> ChannelConfig {
        ChannelConfig::new(0).with_multicast_interface(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.port, 0);
        assert!(config.reuse_address);
        assert_eq!(config.recv_buffer_size, 4096);
        assert_eq!(config.local_addr(), "0.0.0.0:0".parse().unwrap());
    }

    #[test]
    fn test_open_ephemeral_port() {
        let reactor = Reactor::new().unwrap();
        let channel = Channel::open(&reactor.handle(), 0).unwrap();

        assert_ne!(channel.port(), 0);
        assert!(!channel.is_closed());
        assert!(!channel.is_receiving());
        assert_eq!(reactor.handle().registry().len(), 1);
    }

    #[test]
    fn test_bind_failed_without_reuse() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();

        let holder = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        match Channel::open(&handle, port) {
            Err(ChannelError::BindFailed { addr, .. }) => assert_eq!(addr.port(), port),
            other => panic!("Expected BindFailed error, got {:?}", other),
        }
        assert!(handle.registry().is_empty());
    }

    #[test]
    fn test_reuse_address_shares_port() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();

        let first = Channel::open(&handle, 0).unwrap();
        let second = Channel::open(&handle, first.port()).unwrap();
        assert_eq!(first.port(), second.port());
    }

    #[test]
    fn test_join_group_is_idempotent() {
        let reactor = Reactor::new().unwrap();
        let channel = Channel::open_with(&reactor.handle(), loopback_config()).unwrap();
        let group = Ipv4Addr::new(239, 255, 0, 1);

        channel.join_group(group).unwrap();
        channel.join_group(group).unwrap();

        assert_eq!(channel.joined_groups(), vec![group]);
        assert!(channel.has_joined(group));
        assert_eq!(channel.stats().groups_joined, 1);
    }

    #[test]
    fn test_join_rejects_non_multicast() {
        let reactor = Reactor::new().unwrap();
        let channel = Channel::open_with(&reactor.handle(), loopback_config()).unwrap();
        channel.join_group(Ipv4Addr::new(239, 255, 0, 1)).unwrap();

        let unicast: IpAddr = "10.0.0.1".parse().unwrap();
        match channel.join_group(unicast) {
            Err(ChannelError::JoinFailed { group, .. }) => assert_eq!(group, unicast),
            other => panic!("Expected JoinFailed error, got {:?}", other),
        }

        let v6: IpAddr = "ff02::1".parse().unwrap();
        assert!(matches!(
            channel.join_group(v6),
            Err(ChannelError::JoinFailed { .. })
        ));

        // Earlier memberships are unaffected.
        assert_eq!(channel.joined_groups(), vec![Ipv4Addr::new(239, 255, 0, 1)]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let channel = Channel::open(&handle, 0).unwrap();

        channel.start_receiving(|_| {}).unwrap();
        assert!(channel.is_receiving());

        channel.close();
        channel.close();

        assert!(channel.is_closed());
        assert!(!channel.is_receiving());
        assert!(handle.registry().is_empty());
        assert!(matches!(
            channel.join_group(Ipv4Addr::new(239, 255, 0, 1)),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            channel.start_receiving(|_| {}),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_send_after_close_reports_closed() {
        let reactor = Reactor::new().unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&reported);
        let channel = Channel::open_with_sink(
            &reactor.handle(),
            ChannelConfig::new(0),
            Arc::new(move |e: &ChannelError| sink_log.lock().push(e.kind())),
        )
        .unwrap();

        channel.close();
        channel.send_text("late", (Ipv4Addr::LOCALHOST, 9));

        assert_eq!(*reported.lock(), vec!["closed"]);
    }

    #[test]
    fn test_oversized_and_bad_length_reported() {
        let reactor = Reactor::new().unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&reported);
        let channel = Channel::open_with_sink(
            &reactor.handle(),
            ChannelConfig::new(0).with_max_datagram_size(4),
            Arc::new(move |e: &ChannelError| sink_log.lock().push(e.kind())),
        )
        .unwrap();

        channel.send_text("too long", (Ipv4Addr::LOCALHOST, 9));
        channel.send_bytes(b"abc", 10, (Ipv4Addr::LOCALHOST, 9));

        assert_eq!(*reported.lock(), vec!["protocol", "protocol"]);
        assert_eq!(channel.stats().datagrams_sent, 0);
    }

    #[test]
    fn test_restart_replaces_handler_without_rearming() {
        let reactor = Reactor::new().unwrap();
        let channel = Channel::open(&reactor.handle(), 0).unwrap();

        channel.start_receiving(|_| {}).unwrap();
        channel.start_receiving(|_| {}).unwrap();

        assert!(channel.is_receiving());
    }

    #[test]
    fn test_close_releases_port_on_idle_reactor() {
        let reactor = Reactor::new().unwrap();
        let channel = Channel::open_with(
            &reactor.handle(),
            ChannelConfig::new(0).with_reuse_address(false),
        )
        .unwrap();
        let port = channel.port();

        channel.start_receiving(|_| {}).unwrap();
        channel.send_text("queued", (Ipv4Addr::LOCALHOST, port));
        channel.close();

        assert!(std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok());
    }

    #[test]
    fn test_close_releases_port_on_running_reactor() {
        let reactor =
            Reactor::with_config(ReactorConfig::default().with_worker_threads(2)).unwrap();
        let channel = Channel::open_with(
            &reactor.handle(),
            ChannelConfig::new(0).with_reuse_address(false),
        )
        .unwrap();
        let port = channel.port();

        channel.start_receiving(|_| {}).unwrap();
        // Let the receive task park inside its first receive.
        thread::sleep(Duration::from_millis(50));
        channel.close();

        assert!(std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok());
    }

    #[test]
    fn test_receive_failure_ends_loop_and_restart_delivers() {
        let reactor =
            Reactor::with_config(ReactorConfig::default().with_worker_threads(2)).unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&reported);
        let channel = Channel::open_with_sink(
            &reactor.handle(),
            ChannelConfig::new(0).with_bind_addr(Ipv4Addr::LOCALHOST),
            Arc::new(move |e: &ChannelError| sink_log.lock().push(e.kind())),
        )
        .unwrap();
        channel.start_receiving(|_| {}).unwrap();

        // Connected UDP sockets surface ICMP port unreachable as a receive error.
        let vacant = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap();
        {
            let io = channel.io.lock();
            let socket = SockRef::from(&*io.as_ref().unwrap().socket);
            socket.connect(&vacant.into()).unwrap();
            socket.send(b"ping").unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        // The pending error is returned ahead of this datagram, which then
        // stays queued for the next loop.
        let peer = std::net::UdpSocket::bind(vacant).unwrap();
        peer.send_to(b"again", channel.local_addr()).unwrap();

        assert!(wait_until(|| !reported.lock().is_empty()));
        assert_eq!(*reported.lock(), vec!["receive"]);
        assert!(!channel.is_receiving());
        assert_eq!(channel.stats().receive_errors, 1);

        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        channel
            .start_receiving(move |message| {
                let _ = tx.lock().send(message.raw().to_vec());
            })
            .unwrap();
        assert!(channel.is_receiving());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"again");
    }
}
