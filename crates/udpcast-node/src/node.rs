//! Node topology: one receiver and one publisher sharing a reactor.

use crate::config::{Config, MessageSection, PublisherSection, ReceiverSection};
use crate::metrics::{self, Direction, MetricsErrorSink};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use udpcast_core::{
    Channel, ChannelConfig, Publisher, Reactor, ReactorConfig, ReactorHandle, ReactorStats,
    Receiver, SharedErrorSink,
};

const IO_THREAD_NAME: &str = "udpcast-io";
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// A running receiver and publisher.
pub struct Node {
    reactor: Reactor,
    receiver: Option<Receiver>,
    publisher: Option<Publisher>,
}

impl Node {
    /// Create the reactor, bind the publisher and start the receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the reactor cannot start, a port cannot be bound,
    /// or a multicast group cannot be joined.
    pub fn start(config: &Config) -> Result<Self> {
        let reactor = Reactor::with_config(
            ReactorConfig::default().with_worker_threads(config.reactor.worker_threads),
        )
        .context("Failed to start reactor")?;
        let handle = reactor.handle();
        let errors: SharedErrorSink = Arc::new(MetricsErrorSink::default());

        let receiver = if config.receiver.enabled {
            Some(start_receiver(&handle, &config.receiver, &errors)?)
        } else {
            None
        };

        let publisher = if config.publisher.enabled {
            Some(bind_publisher(&handle, &config.publisher, &errors)?)
        } else {
            None
        };

        Ok(Self {
            reactor,
            receiver,
            publisher,
        })
    }

    /// Get a handle to the node's reactor.
    #[must_use]
    pub fn handle(&self) -> ReactorHandle {
        self.reactor.handle()
    }

    /// Get the receiver, if enabled.
    #[must_use]
    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    /// Get the publisher, if enabled.
    #[must_use]
    pub fn publisher(&self) -> Option<&Publisher> {
        self.publisher.as_ref()
    }

    /// Queue the configured startup messages.
    pub fn publish_all(&self, messages: &[MessageSection]) {
        let Some(publisher) = &self.publisher else {
            if !messages.is_empty() {
                warn!(count = messages.len(), "Publisher disabled, messages not sent");
            }
            return;
        };

        for message in messages {
            publisher.publish_payload_to(&message.payload(), message.destination);
        }
        info!(count = messages.len(), "Startup messages queued");
    }

    /// Stop the reactor on Ctrl-C.
    pub fn stop_on_ctrl_c(&self) {
        let handle = self.handle();
        self.handle().spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    handle.stop();
                }
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        });
    }

    /// Periodically export reactor totals.
    pub fn report_stats(&self) {
        let handle = self.handle();
        self.handle().spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            let mut last = ReactorStats::default();
            loop {
                interval.tick().await;
                let stats = handle.stats();
                debug!(
                    channels = stats.channel_count,
                    sent = stats.datagrams_sent,
                    received = stats.datagrams_received,
                    errors = stats.errors,
                    "Reactor stats"
                );
                metrics::record_reactor_stats(&stats, &mut last);
            }
        });
    }

    /// Run the reactor on a dedicated I/O thread until it is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the I/O thread cannot be spawned or panics.
    pub fn run(&self) -> Result<()> {
        thread::scope(|scope| {
            let io_thread = thread::Builder::new()
                .name(IO_THREAD_NAME.to_string())
                .spawn_scoped(scope, || self.reactor.run())
                .context("Failed to spawn I/O thread")?;

            io_thread
                .join()
                .map_err(|_| anyhow!("I/O thread panicked"))
        })
    }

    /// Close both roles and log final totals.
    pub fn shutdown(self) {
        let stats = self.reactor.handle().stats();

        if let Some(receiver) = self.receiver() {
            receiver.close();
        }
        if let Some(publisher) = self.publisher() {
            publisher.close();
        }

        info!(
            sent = stats.datagrams_sent,
            received = stats.datagrams_received,
            errors = stats.errors,
            "Node stopped"
        );
    }
}

/// Run the node described by `config` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the node cannot start.
pub fn run(config: &Config) -> Result<()> {
    if let Ok(rendered) = config.to_toml() {
        debug!("Effective configuration:\n{rendered}");
    }

    let node = Node::start(config)?;
    node.stop_on_ctrl_c();
    node.report_stats();
    node.publish_all(&config.publisher.messages);

    info!("Press Ctrl-C to exit");
    node.run()?;
    node.shutdown();
    Ok(())
}

fn start_receiver(
    handle: &ReactorHandle,
    section: &ReceiverSection,
    errors: &SharedErrorSink,
) -> Result<Receiver> {
    let channel = Channel::open_with_sink(
        handle,
        ChannelConfig::new(section.port)
            .with_multicast_interface(section.interface)
            .with_recv_buffer_size(section.recv_buffer_size),
        Arc::clone(errors),
    )
    .context("Failed to open receiver channel")?;

    let receiver = Receiver::new(channel, section.group_addrs());
    receiver
        .start_receiving(|message| {
            metrics::record_datagram(Direction::Received, message.raw().len());
            match message.text() {
                Some(text) => info!("Received message from {}: {}", message.source(), text),
                None => info!(
                    bytes = message.payload().len(),
                    "Received binary message from {}",
                    message.source()
                ),
            }
        })
        .context("Failed to start receiver")?;

    info!(
        port = receiver.channel().port(),
        groups = ?receiver.groups(),
        "Receiver started"
    );
    Ok(receiver)
}

fn bind_publisher(
    handle: &ReactorHandle,
    section: &PublisherSection,
    errors: &SharedErrorSink,
) -> Result<Publisher> {
    let mut channel_config = ChannelConfig::new(section.port)
        .with_multicast_interface(section.interface)
        .with_multicast_loop(section.multicast_loop);
    if let Some(ttl) = section.multicast_ttl {
        channel_config = channel_config.with_multicast_ttl(ttl);
    }

    let channel = Channel::open_with_sink(handle, channel_config, Arc::clone(errors))
        .context("Failed to open publisher channel")?;

    info!(port = channel.port(), "Publisher bound");
    Ok(Publisher::new(channel))
}
