//! Signal and confirmation envelopes exchanged over the control plane.
//!
//! A [`SignalEnvelope`] is a command. A [`ConfirmationEnvelope`] is the terminal
//! report a participant sends back for a signal it handled, carrying the same
//! correlation id and idempotency key.
//!
//! `message_id` identifies one send on the wire and is only meant for transport
//! level de-duplication. Business identity is `(correlation_id, idempotency_key)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::address_book::{AddressBook, categories};
use crate::identity::{Scope, normalize};

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Command-shaped control-plane message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub signal: String,
    pub swarm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    /// Who asked for this signal (`"api"`, `"scenario"`, `"orchestrator"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Opaque document forwarded as-is
    #[serde(default)]
    pub payload: Value,
}

impl SignalEnvelope {
    /// Signal addressed to every participant of a swarm.
    pub fn swarm_wide(signal: &str, swarm_id: &str, payload: Value) -> Self {
        Self::targeted(signal, &Scope::swarm(swarm_id), payload)
    }

    /// Signal addressed to whatever the scope selects.
    ///
    /// A scope without a swarm id produces an envelope with an empty swarm id,
    /// which renders as `ALL` in its routing key.
    pub fn targeted(signal: &str, scope: &Scope, payload: Value) -> Self {
        Self {
            signal: signal.trim().to_string(),
            swarm_id: scope.swarm_id.clone().unwrap_or_default(),
            role: scope.role.clone(),
            instance: scope.instance.clone(),
            correlation_id: fresh_id(),
            idempotency_key: fresh_id(),
            message_id: fresh_id(),
            timestamp: Utc::now(),
            origin: None,
            payload,
        }
    }

    /// Reuse the caller's correlation id and idempotency key.
    pub fn with_correlation(
        mut self,
        correlation_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        self.correlation_id = correlation_id.into();
        self.idempotency_key = idempotency_key.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// A copy for re-sending: same business identity, new message id.
    pub fn resend(&self) -> Self {
        Self {
            message_id: fresh_id(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(
            Some(self.swarm_id.as_str()),
            self.role.as_deref(),
            self.instance.as_deref(),
        )
    }

    pub fn routing_key(&self) -> String {
        AddressBook::signal_key(&self.signal, &self.scope())
    }
}

/// Outcome of a handled signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationResult {
    Success,
    Error,
}

/// Outcome-specific fields. Success and error details never coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ConfirmationOutcome {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Terminal success/error report correlated to a prior signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationEnvelope {
    pub signal: String,
    pub swarm_id: String,
    pub role: String,
    pub instance: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    outcome: ConfirmationOutcome,
}

/// Who is confirming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmer<'a> {
    pub swarm_id: &'a str,
    pub role: &'a str,
    pub instance: &'a str,
}

impl ConfirmationEnvelope {
    fn build(
        signal: &SignalEnvelope,
        by: &Confirmer<'_>,
        outcome: ConfirmationOutcome,
    ) -> Self {
        Self {
            signal: signal.signal.clone(),
            swarm_id: by.swarm_id.to_string(),
            role: by.role.to_string(),
            instance: by.instance.to_string(),
            correlation_id: signal.correlation_id.clone(),
            idempotency_key: normalize(Some(signal.idempotency_key.as_str())),
            timestamp: Utc::now(),
            outcome,
        }
    }

    /// Success confirmation for a handled signal.
    pub fn success(
        signal: &SignalEnvelope,
        by: &Confirmer<'_>,
        state: Option<Value>,
        notes: Option<String>,
    ) -> Self {
        Self::build(signal, by, ConfirmationOutcome::Success { state, notes })
    }

    /// Error confirmation for a signal that could not be applied.
    pub fn error(
        signal: &SignalEnvelope,
        by: &Confirmer<'_>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(
            signal,
            by,
            ConfirmationOutcome::Error {
                code: Some(code.into()),
                message: Some(message.into()),
            },
        )
    }

    /// Unsolicited success report (no prior signal), e.g. a readiness announcement.
    pub fn announce(signal: &str, by: &Confirmer<'_>, state: Option<Value>) -> Self {
        Self {
            signal: signal.to_string(),
            swarm_id: by.swarm_id.to_string(),
            role: by.role.to_string(),
            instance: by.instance.to_string(),
            correlation_id: fresh_id(),
            idempotency_key: Some(fresh_id()),
            timestamp: Utc::now(),
            outcome: ConfirmationOutcome::Success { state, notes: None },
        }
    }

    pub fn outcome(&self) -> &ConfirmationOutcome {
        &self.outcome
    }

    pub fn result(&self) -> ConfirmationResult {
        match self.outcome {
            ConfirmationOutcome::Success { .. } => ConfirmationResult::Success,
            ConfirmationOutcome::Error { .. } => ConfirmationResult::Error,
        }
    }

    /// Event category this confirmation is published under.
    pub fn category(&self) -> &'static str {
        match self.result() {
            ConfirmationResult::Success => categories::READY,
            ConfirmationResult::Error => categories::ERROR,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(
            Some(self.swarm_id.as_str()),
            Some(self.role.as_str()),
            Some(self.instance.as_str()),
        )
    }

    pub fn routing_key(&self) -> String {
        AddressBook::event_key(self.category(), &self.signal, &self.scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bee() -> Confirmer<'static> {
        Confirmer {
            swarm_id: "sw1",
            role: "generator",
            instance: "gen-1",
        }
    }

    #[test]
    fn test_swarm_wide_envelope_has_no_role_or_instance() {
        let env = SignalEnvelope::swarm_wide("swarm-start", "sw1", json!({}));
        assert_eq!(env.swarm_id, "sw1");
        assert!(env.role.is_none());
        assert!(env.instance.is_none());
        assert_eq!(env.routing_key(), "sig.swarm-start.sw1.ALL.ALL");
    }

    #[test]
    fn test_message_id_is_unique_per_send() {
        let env = SignalEnvelope::swarm_wide("swarm-start", "sw1", json!({}));
        let again = env.resend();
        assert_ne!(env.message_id, again.message_id);
        assert_eq!(env.correlation_id, again.correlation_id);
        assert_eq!(env.idempotency_key, again.idempotency_key);
    }

    #[test]
    fn test_success_and_error_fields_are_exclusive_on_the_wire() {
        let signal = SignalEnvelope::targeted(
            "config-update",
            &Scope::instance("sw1", "generator", "gen-1"),
            json!({"rate": 5}),
        );

        let ok = ConfirmationEnvelope::success(&signal, &bee(), Some(json!({"rate": 5})), None);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["result"], "success");
        assert!(value.get("code").is_none());
        assert!(value.get("message").is_none());
        assert_eq!(value["correlationId"], json!(signal.correlation_id));

        let err = ConfirmationEnvelope::error(&signal, &bee(), "invalid-config", "rate < 0");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["result"], "error");
        assert_eq!(value["code"], "invalid-config");
        assert!(value.get("state").is_none());
        assert_eq!(err.routing_key(), "ev.error.config-update.sw1.generator.gen-1");
    }

    #[test]
    fn test_confirmation_parses_from_wire_json() {
        let raw = json!({
            "result": "success",
            "signal": "config-update",
            "swarmId": "sw1",
            "role": "generator",
            "instance": "gen-1",
            "correlationId": "c-1",
            "idempotencyKey": "k-1",
            "timestamp": "2024-05-01T10:00:00Z",
            "notes": "applied"
        });
        let conf: ConfirmationEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(conf.result(), ConfirmationResult::Success);
        assert_eq!(conf.idempotency_key.as_deref(), Some("k-1"));
        assert_eq!(conf.category(), "ready");
    }
}
