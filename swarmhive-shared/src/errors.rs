use thiserror::Error;

/// Failures talking to the control-plane bus
#[derive(Error, Debug)]
pub enum SwarmhiveError {
    #[error("bus session error: {message}")]
    Session { message: String },

    #[error("routing key '{key}' is not a valid key expression: {reason}")]
    InvalidRoutingKey { key: String, reason: String },
}

/// Problems in a bus session configuration
#[derive(Error, Debug)]
pub enum ZenohConfigError {
    #[error("endpoint '{endpoint}' rejected: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("endpoint '{endpoint}' uses unknown protocol '{protocol}'")]
    InvalidProtocol { protocol: String, endpoint: String },

    #[error("{mode:?} session {reason}")]
    ModeEndpointMismatch {
        mode: crate::ZenohMode,
        reason: String,
    },

    #[error("session config rejected: {message}")]
    ValidationError { message: String },

    #[error("could not build session config: {reason}")]
    ZenohConfigCreationError { reason: String },
}

impl ZenohConfigError {
    pub fn client_cannot_listen() -> Self {
        Self::ModeEndpointMismatch {
            mode: crate::ZenohMode::Client,
            reason: "may only connect, listen endpoints are reserved for peers".to_string(),
        }
    }

    pub fn unsupported_endpoint_format(endpoint: &str) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason: "expected 'connect/<proto>/<host>:<port>' or 'listen/<proto>/<host>:<port>'"
                .to_string(),
        }
    }
}

pub type ZenohConfigResult<T> = Result<T, ZenohConfigError>;
