//! Control-plane bus abstraction.
//!
//! Publishing is synchronous and fire-and-forget: a publish only serializes the
//! envelope and hands it to the transport's outbound queue, so callers such as
//! timeline ticks never block on network I/O. Subscriptions take an AMQP-style
//! routing pattern and yield every matching inbound message.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;

use swarmhive_shared::{ConfirmationEnvelope, SignalEnvelope};

pub mod memory;
pub mod zenoh_bus;

pub use memory::InMemoryBus;
pub use zenoh_bus::ZenohBus;

/// Errors raised by bus implementations
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Failed to encode message for '{routing_key}': {source}")]
    Encode {
        routing_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode message from '{routing_key}': {reason}")]
    Decode { routing_key: String, reason: String },

    #[error("Failed to subscribe to '{pattern}': {reason}")]
    Subscribe { pattern: String, reason: String },
}

/// A message waiting to go out on the wire
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn signal(envelope: &SignalEnvelope) -> Result<Self, BusError> {
        let routing_key = envelope.routing_key();
        let payload = serde_json::to_vec(envelope).map_err(|source| BusError::Encode {
            routing_key: routing_key.clone(),
            source,
        })?;
        Ok(Self {
            routing_key,
            payload,
        })
    }

    pub fn event(confirmation: &ConfirmationEnvelope) -> Result<Self, BusError> {
        let routing_key = confirmation.routing_key();
        let payload = serde_json::to_vec(confirmation).map_err(|source| BusError::Encode {
            routing_key: routing_key.clone(),
            source,
        })?;
        Ok(Self {
            routing_key,
            payload,
        })
    }
}

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_slice(&self.payload).map_err(|e| BusError::Decode {
            routing_key: self.routing_key.clone(),
            reason: e.to_string(),
        })
    }
}

impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            routing_key: message.routing_key,
            payload: message.payload,
        }
    }
}

/// Stream of messages matching one subscription pattern
pub type BusSubscription = mpsc::UnboundedReceiver<InboundMessage>;

/// Transport the control plane runs over
#[async_trait]
pub trait ControlPlaneBus: Send + Sync {
    /// Enqueue a signal for delivery on its routing key
    fn publish_signal(&self, envelope: &SignalEnvelope) -> Result<(), BusError>;

    /// Enqueue a confirmation/event for delivery on its routing key
    fn publish_event(&self, confirmation: &ConfirmationEnvelope) -> Result<(), BusError>;

    /// Receive every message whose routing key matches `pattern`
    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError>;
}
