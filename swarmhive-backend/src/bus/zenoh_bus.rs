//! Zenoh-backed control-plane bus.
//!
//! Routing keys travel as the last chunk of `<prefix>/cp/<routing key>`. All
//! publishes go through one outbound queue drained by a single publisher task,
//! which keeps per-key FIFO order from this process.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zenoh::Session;

use swarmhive_shared::{ConfirmationEnvelope, RoutingPattern, SignalEnvelope, qos, topics};

use super::{BusError, BusSubscription, ControlPlaneBus, InboundMessage, OutboundMessage};

pub struct ZenohBus {
    session: Session,
    prefix: String,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl ZenohBus {
    /// Create the bus and spawn its publisher task
    pub fn new(session: Session, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let (outbound, mut outbound_receiver) = mpsc::unbounded_channel::<OutboundMessage>();
        let session_clone = session.clone();
        let prefix_clone = prefix.clone();

        tokio::spawn(async move {
            while let Some(message) = outbound_receiver.recv().await {
                if let Err(e) = Self::put(&session_clone, &prefix_clone, message).await {
                    error!("[BUS] Failed to publish control-plane message: {}", e);
                }
            }
            debug!("[BUS] Outbound queue closed, publisher task exiting");
        });

        info!("[BUS] Control plane bound to '{}/cp/*'", prefix);
        Self {
            session,
            prefix,
            outbound,
        }
    }

    async fn put(session: &Session, prefix: &str, message: OutboundMessage) -> anyhow::Result<()> {
        let key = topics::control_plane(prefix, &message.routing_key)?;
        session
            .put(&key, message.payload)
            .congestion_control(qos::CONTROL_PLANE_CONGESTION)
            .priority(qos::CONTROL_PLANE_PRIORITY)
            .await
            .map_err(|e| anyhow::anyhow!("put on '{}' failed: {}", key.as_str(), e))?;
        debug!("[BUS] Published {}", message.routing_key);
        Ok(())
    }

    fn enqueue(&self, message: OutboundMessage) -> Result<(), BusError> {
        self.outbound.send(message).map_err(|_| BusError::Closed)
    }
}

#[async_trait]
impl ControlPlaneBus for ZenohBus {
    fn publish_signal(&self, envelope: &SignalEnvelope) -> Result<(), BusError> {
        self.enqueue(OutboundMessage::signal(envelope)?)
    }

    fn publish_event(&self, confirmation: &ConfirmationEnvelope) -> Result<(), BusError> {
        self.enqueue(OutboundMessage::event(confirmation)?)
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        let subscribe_error = |reason: String| BusError::Subscribe {
            pattern: pattern.to_string(),
            reason,
        };

        let key = topics::control_plane_all(&self.prefix).map_err(|e| subscribe_error(e.to_string()))?;
        let subscriber = self
            .session
            .declare_subscriber(&key)
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        let routing_pattern = RoutingPattern::new(pattern);
        let (sender, receiver) = mpsc::unbounded_channel();
        info!(
            "[BUS] Subscribed to '{}' on {}",
            routing_pattern.as_string(),
            key.as_str()
        );

        tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                let Some(routing_key) = topics::extract_routing_key(sample.key_expr().as_str())
                else {
                    warn!(
                        "[BUS] Ignoring sample on unexpected key {}",
                        sample.key_expr().as_str()
                    );
                    continue;
                };
                if !routing_pattern.matches(&routing_key) {
                    continue;
                }
                let message = InboundMessage {
                    routing_key,
                    payload: sample.payload().to_bytes().to_vec(),
                };
                if sender.send(message).is_err() {
                    debug!(
                        "[BUS] Subscription '{}' dropped, undeclaring",
                        routing_pattern.as_string()
                    );
                    break;
                }
            }
        });

        Ok(receiver)
    }
}
