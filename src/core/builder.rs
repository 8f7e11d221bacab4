use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{Bus, Event};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::{directory::ProxyDirectory, hub::Hub, registry::Registry};

/// Builder for a [`Hub`] with optional subscribers and a parent token.
pub struct HubBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    parent: Option<CancellationToken>,
}

impl HubBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            parent: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (registrations, failures, drain outcome)
    /// through dedicated workers with bounded queues.
    #[must_use]
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Ties the hub's lifetime to `parent`: cancelling it stops every worker.
    #[must_use]
    pub fn with_parent_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Builds the hub and spawns its background tasks.
    ///
    /// The runtime current at this call hosts every worker the hub spawns later, so
    /// the returned hub may be used from threads outside it.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Arc<Hub> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        if !self.subscribers.is_empty() {
            let set = SubscriberSet::new(self.subscribers, bus.clone());
            spawn_subscriber_listener(bus.subscribe(), set, token.clone());
        }

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let directory = Arc::new(ProxyDirectory::new(
            self.cfg.clone(),
            bus.clone(),
            reports_tx,
            token.clone(),
            Handle::current(),
        ));
        let registry = Registry::new(Arc::clone(&directory), bus.clone());
        registry.spawn_listener(reports_rx, token.clone());

        Arc::new(Hub::new_internal(self.cfg, bus, registry, directory, token))
    }
}

/// Forwards bus events to the subscriber set until `token` is cancelled, then
/// flushes what is already buffered and waits for the subscribers to finish.
fn spawn_subscriber_listener(mut rx: broadcast::Receiver<Event>, set: SubscriberSet, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged behind the bus");
                    }
                }
            }
        }
        while let Ok(ev) = rx.try_recv() {
            set.emit(Arc::new(ev));
        }
        set.shutdown().await;
    });
}
