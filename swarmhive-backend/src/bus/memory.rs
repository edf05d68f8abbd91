//! In-process bus used by tests and single-process runs.
//!
//! Every publish is delivered synchronously to each live subscription whose
//! pattern matches, so a test can publish and then drain its receiver without
//! yielding to the runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use swarmhive_shared::{ConfirmationEnvelope, RoutingPattern, SignalEnvelope};

use super::{BusError, BusSubscription, ControlPlaneBus, InboundMessage, OutboundMessage};

struct Subscriber {
    pattern: RoutingPattern,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Clone, Default)]
pub struct InMemoryBus {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later publish with [`BusError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.clear();
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn deliver(&self, message: OutboundMessage) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let mut delivered = 0usize;
        let mut gone = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.pattern.matches(&message.routing_key) {
                continue;
            }
            let inbound = InboundMessage::from(message.clone());
            if entry.sender.send(inbound).is_err() {
                gone.push(*entry.key());
            } else {
                delivered += 1;
            }
        }
        for id in gone {
            self.subscribers.remove(&id);
        }

        if delivered == 0 {
            debug!("No subscribers listening on {}", message.routing_key);
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneBus for InMemoryBus {
    fn publish_signal(&self, envelope: &SignalEnvelope) -> Result<(), BusError> {
        self.deliver(OutboundMessage::signal(envelope)?)
    }

    fn publish_event(&self, confirmation: &ConfirmationEnvelope) -> Result<(), BusError> {
        self.deliver(OutboundMessage::event(confirmation)?)
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(
            id,
            Subscriber {
                pattern: RoutingPattern::new(pattern),
                sender,
            },
        );
        Ok(receiver)
    }
}
