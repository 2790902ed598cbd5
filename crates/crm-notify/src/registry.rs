//! Transport registry

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{Channel, SharedTransport, Transport, TransportError, TransportResult};

/// Transports indexed by channel
///
/// At most one transport serves each channel; registering again replaces
/// the previous one.
#[derive(Default)]
pub struct TransportRegistry {
    transports: DashMap<Channel, SharedTransport>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for a channel
    #[instrument(skip(self, transport))]
    pub fn register<T>(&self, channel: Channel, transport: T)
    where
        T: Transport + 'static,
    {
        self.register_shared(channel, Arc::new(transport));
    }

    /// Register an already shared transport
    pub fn register_shared(&self, channel: Channel, transport: SharedTransport) {
        debug!(%channel, "Registering transport");
        self.transports.insert(channel, transport);
    }

    /// Remove the transport for a channel
    pub fn unregister(&self, channel: Channel) -> bool {
        self.transports.remove(&channel).is_some()
    }

    /// Get the transport for a channel
    pub fn get(&self, channel: Channel) -> TransportResult<SharedTransport> {
        self.transports
            .get(&channel)
            .map(|t| t.value().clone())
            .ok_or(TransportError::NotRegistered(channel))
    }

    /// Check if a channel has a transport
    pub fn has(&self, channel: Channel) -> bool {
        self.transports.contains_key(&channel)
    }

    /// Channels with a registered transport
    pub fn channels(&self) -> Vec<Channel> {
        self.transports.iter().map(|t| *t.key()).collect()
    }
}
