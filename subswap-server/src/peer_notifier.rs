use crate::config::Config;
use crate::subscribe::Broker;
use crate::subscribe::Subscription;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use subswap_core::Error;
use subswap_core::ErrorContext;

/// A peer connected or disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnectionChangedEvent {
    pub peer_pub_key: String,
    pub peer_address: String,
    pub connected: bool,
}

/// Relays peer connection changes to subscribers.
///
/// Events are only delivered between [`PeerNotifier::start`] and [`PeerNotifier::stop`].
pub struct PeerNotifier {
    started: AtomicBool,
    stopped: AtomicBool,
    broker: Broker<PeerConnectionChangedEvent>,
}

impl PeerNotifier {
    pub fn new(queue_size: usize) -> Result<Self, Error> {
        Ok(Self {
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            broker: Broker::new(queue_size)?,
        })
    }

    /// A notifier whose subscribers buffer `subscriber_queue_size` events each.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(config.subscriber_queue_size).context("invalid peer notifier config")
    }

    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::debug!("Peer notifier started");
    }

    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.broker.stop();

        tracing::debug!("Peer notifier stopped");
    }

    pub fn subscribe_peer_events(&self) -> Result<Subscription<PeerConnectionChangedEvent>, Error> {
        self.broker.subscribe()
    }

    pub fn notify_peer_connection_changed(
        &self,
        peer_pub_key: impl Into<String>,
        peer_address: impl Into<String>,
        connected: bool,
    ) {
        let event = PeerConnectionChangedEvent {
            peer_pub_key: peer_pub_key.into(),
            peer_address: peer_address.into(),
            connected,
        };

        if !self.started.load(Ordering::Acquire) {
            tracing::warn!(?event, "Peer notifier not started, dropping event");
            return;
        }

        if let Err(e) = self.broker.broadcast(event) {
            tracing::warn!("Unable to send peer connection changed update: {e}");
        }
    }
}
