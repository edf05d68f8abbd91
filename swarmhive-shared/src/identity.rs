//! Participant identity and scope matching.
//!
//! Every process on the control plane knows who it is (an [`Identity`]) and every
//! signal names who it is for (a [`Scope`]). Self-filtering and targeted dispatch
//! both reduce to [`Identity::matches`].

use serde::{Deserialize, Serialize};

/// Trim a field and map blank values to `None`.
pub fn normalize(value: Option<impl AsRef<str>>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Identity of a control-plane participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub swarm_id: Option<String>,
    pub swarm_instance_id: Option<String>,
    pub role: Option<String>,
    pub instance_id: Option<String>,
}

impl Identity {
    /// Build a normalized identity. Blank fields become absent.
    pub fn new(
        swarm_id: Option<&str>,
        swarm_instance_id: Option<&str>,
        role: Option<&str>,
        instance_id: Option<&str>,
    ) -> Self {
        Self {
            swarm_id: normalize(swarm_id),
            swarm_instance_id: normalize(swarm_instance_id),
            role: normalize(role),
            instance_id: normalize(instance_id),
        }
    }

    /// Identity of a bee or controller inside a swarm.
    pub fn member(swarm_id: &str, role: &str, instance_id: &str) -> Self {
        Self::new(Some(swarm_id), None, Some(role), Some(instance_id))
    }

    /// True if every field the scope names equals the corresponding identity field.
    ///
    /// Comparison is case-sensitive on trimmed values. A scope field that is
    /// present never matches an identity field that is absent.
    pub fn matches(&self, scope: &Scope) -> bool {
        field_matches(scope.swarm_id.as_deref(), self.swarm_id.as_deref())
            && field_matches(scope.role.as_deref(), self.role.as_deref())
            && field_matches(scope.instance.as_deref(), self.instance_id.as_deref())
    }

    /// Role-only check used by participants that ignore instance targeting.
    pub fn matches_role(&self, role: &str) -> bool {
        field_matches(Some(role.trim()), self.role.as_deref())
    }

    /// The narrowest scope addressing exactly this participant.
    pub fn scope(&self) -> Scope {
        Scope {
            swarm_id: self.swarm_id.clone(),
            role: self.role.clone(),
            instance: self.instance_id.clone(),
        }
    }
}

fn field_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual.map(str::trim) == Some(wanted),
    }
}

/// Addressing filter. An absent field means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub swarm_id: Option<String>,
    pub role: Option<String>,
    pub instance: Option<String>,
}

impl Scope {
    pub fn new(swarm_id: Option<&str>, role: Option<&str>, instance: Option<&str>) -> Self {
        Self {
            swarm_id: normalize(swarm_id),
            role: normalize(role),
            instance: normalize(instance),
        }
    }

    /// Every participant on the bus.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every participant of one swarm.
    pub fn swarm(swarm_id: &str) -> Self {
        Self::new(Some(swarm_id), None, None)
    }

    /// Every instance of one role inside a swarm.
    pub fn role(swarm_id: &str, role: &str) -> Self {
        Self::new(Some(swarm_id), Some(role), None)
    }

    /// A single instance.
    pub fn instance(swarm_id: &str, role: &str, instance: &str) -> Self {
        Self::new(Some(swarm_id), Some(role), Some(instance))
    }

    /// True when no field is set.
    pub fn is_all(&self) -> bool {
        self.swarm_id.is_none() && self.role.is_none() && self.instance.is_none()
    }

    /// True when this scope selects a superset of (or the same set as) `other`.
    pub fn covers(&self, other: &Scope) -> bool {
        fn covers_field(a: &Option<String>, b: &Option<String>) -> bool {
            a.is_none() || a == b
        }
        covers_field(&self.swarm_id, &other.swarm_id)
            && covers_field(&self.role, &other.role)
            && covers_field(&self.instance, &other.instance)
    }
}

impl From<&Identity> for Scope {
    fn from(identity: &Identity) -> Self {
        identity.scope()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.swarm_id.as_deref().unwrap_or("*"),
            self.role.as_deref().unwrap_or("*"),
            self.instance.as_deref().unwrap_or("*")
        )
    }
}
