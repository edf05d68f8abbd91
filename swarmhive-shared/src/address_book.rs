//! Routing key construction and parsing for the control plane.
//!
//! Keys are ASCII, `.`-delimited, and never carry an embedded `.` inside a
//! segment:
//!
//! ```text
//! sig.<signal>.<swarm|ALL>.<role|ALL>.<instance|ALL>
//! ev.<category>.<signal>.<swarm|ALL>.<role|ALL>.<instance|ALL>
//! ```
//!
//! An absent scope field renders as the literal `ALL`. A blank signal or
//! category segment is left out of the key entirely. A `.` or `%` inside a
//! value is written as `%2E` or `%25` and restored by [`AddressBook::parse`].

use crate::identity::{Scope, normalize};

/// Literal used for an absent scope field.
pub const ALL: &str = "ALL";

/// Prefix of command-shaped keys.
pub const SIGNAL_PREFIX: &str = "sig";

/// Prefix of notification-shaped keys.
pub const EVENT_PREFIX: &str = "ev";

/// Well-known signal names.
pub mod signals {
    pub const CONFIG_UPDATE: &str = "config-update";
    pub const SWARM_START: &str = "swarm-start";
    pub const SWARM_STOP: &str = "swarm-stop";
    /// Signal name used by controllers to announce readiness.
    pub const SWARM_CONTROLLER: &str = "swarm-controller";
}

/// Well-known event categories.
pub mod categories {
    pub const READY: &str = "ready";
    pub const ERROR: &str = "error";
}

/// Role a swarm controller registers under.
pub const CONTROLLER_ROLE: &str = "swarm-controller";

/// Builds and parses routing keys.
pub struct AddressBook;

impl AddressBook {
    /// Routing key for a command.
    pub fn signal_key(signal: &str, scope: &Scope) -> String {
        let mut segments = vec![SIGNAL_PREFIX.to_string()];
        push_named(&mut segments, signal);
        push_scope(&mut segments, scope);
        segments.join(".")
    }

    /// Routing key for an event.
    pub fn event_key(category: &str, signal: &str, scope: &Scope) -> String {
        let mut segments = vec![EVENT_PREFIX.to_string()];
        push_named(&mut segments, category);
        push_named(&mut segments, signal);
        push_scope(&mut segments, scope);
        segments.join(".")
    }

    /// Parse a fully-populated routing key back into its parts.
    ///
    /// Keys built with an omitted signal or category segment cannot be told
    /// apart from malformed ones and return `None`.
    pub fn parse(key: &str) -> Option<ParsedKey> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [SIGNAL_PREFIX, signal, swarm, role, instance] => Some(ParsedKey {
                kind: KeyKind::Signal,
                category: None,
                signal: unescape(signal),
                scope: scope_from_segments(swarm, role, instance),
            }),
            [EVENT_PREFIX, category, signal, swarm, role, instance] => Some(ParsedKey {
                kind: KeyKind::Event,
                category: Some(unescape(category)),
                signal: unescape(signal),
                scope: scope_from_segments(swarm, role, instance),
            }),
            _ => None,
        }
    }
}

fn push_named(segments: &mut Vec<String>, value: &str) {
    if let Some(value) = normalize(Some(value)) {
        segments.push(escape(&value));
    }
}

fn push_scope(segments: &mut Vec<String>, scope: &Scope) {
    for field in [&scope.swarm_id, &scope.role, &scope.instance] {
        segments.push(
            field
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(escape)
                .unwrap_or_else(|| ALL.to_string()),
        );
    }
}

fn escape(value: &str) -> String {
    if !value.contains(['.', '%']) {
        return value.to_string();
    }
    value.replace('%', "%25").replace('.', "%2E")
}

fn unescape(segment: &str) -> String {
    if !segment.contains('%') {
        return segment.to_string();
    }
    segment.replace("%2E", ".").replace("%25", "%")
}

fn scope_from_segments(swarm: &str, role: &str, instance: &str) -> Scope {
    let field = |segment: &str| if segment == ALL { None } else { Some(unescape(segment)) };
    Scope {
        swarm_id: field(swarm),
        role: field(role),
        instance: field(instance),
    }
}

/// Whether a key addresses a command or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Signal,
    Event,
}

/// A routing key split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub kind: KeyKind,
    pub category: Option<String>,
    pub signal: String,
    pub scope: Scope,
}

/// Topic pattern in AMQP style: `*` matches one segment, `#` matches zero or more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPattern {
    segments: Vec<String>,
}

impl RoutingPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            segments: pattern.split('.').map(str::to_string).collect(),
        }
    }

    pub fn as_string(&self) -> String {
        self.segments.join(".")
    }

    pub fn matches(&self, key: &str) -> bool {
        let key: Vec<&str> = key.split('.').collect();
        let pattern: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pattern, &key)
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // `#` absorbs zero segments, or one and stays active.
            match_segments(&pattern[1..], key) || (!key.is_empty() && match_segments(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => match_segments(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => match_segments(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_signal_key_swarm_wide() {
        let key = AddressBook::signal_key("config-update", &Scope::swarm("sw1"));
        assert_eq!(key, "sig.config-update.sw1.ALL.ALL");
    }

    #[test]
    fn test_signal_key_targeted() {
        let key = AddressBook::signal_key(
            "config-update",
            &Scope::instance("sw1", "generator", "gen-1"),
        );
        assert_eq!(key, "sig.config-update.sw1.generator.gen-1");
    }

    #[test]
    fn test_event_key() {
        let key = AddressBook::event_key(
            "ready",
            "swarm-controller",
            &Scope::instance("sw1", "swarm-controller", "ctrl-1"),
        );
        assert_eq!(key, "ev.ready.swarm-controller.sw1.swarm-controller.ctrl-1");
    }

    #[test]
    fn test_blank_scope_fields_render_all() {
        let scope = Scope {
            swarm_id: Some("  ".to_string()),
            role: None,
            instance: Some(String::new()),
        };
        assert_eq!(AddressBook::signal_key("x", &scope), "sig.x.ALL.ALL.ALL");
    }

    #[test]
    fn test_blank_signal_and_category_are_omitted() {
        assert_eq!(AddressBook::signal_key(" ", &Scope::swarm("sw1")), "sig.sw1.ALL.ALL");
        assert_eq!(
            AddressBook::event_key("", "ready", &Scope::all()),
            "ev.ready.ALL.ALL.ALL"
        );
    }

    #[test]
    fn test_parsed_scope_matches_original_scope() {
        let scopes = [
            Scope::all(),
            Scope::swarm("sw1"),
            Scope::role("sw1", "moderator"),
            Scope::instance("sw1", "generator", "gen-1"),
            Scope::new(None, Some("processor"), None),
        ];
        for scope in scopes {
            let key = AddressBook::signal_key("config-update", &scope);
            let parsed = AddressBook::parse(&key).expect("key parses");
            assert_eq!(parsed.kind, KeyKind::Signal);
            assert_eq!(parsed.scope, scope);

            // An identity that is exactly the scope's target matches it.
            let identity = Identity::new(
                scope.swarm_id.as_deref(),
                None,
                scope.role.as_deref(),
                scope.instance.as_deref(),
            );
            assert!(identity.matches(&parsed.scope), "scope {scope}");
        }
    }

    #[test]
    fn test_parse_event_key() {
        let parsed = AddressBook::parse("ev.error.config-update.sw1.generator.ALL").unwrap();
        assert_eq!(parsed.kind, KeyKind::Event);
        assert_eq!(parsed.category.as_deref(), Some("error"));
        assert_eq!(parsed.signal, "config-update");
        assert_eq!(parsed.scope, Scope::role("sw1", "generator"));
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert!(AddressBook::parse("sig.only.three").is_none());
        assert!(AddressBook::parse("foo.a.b.c.d").is_none());
    }

    #[test]
    fn test_dotted_values_stay_inside_their_segment() {
        let scope = Scope::instance("sw1", "gen.v2", "gen-1.eu");
        let key = AddressBook::signal_key("config.update", &scope);
        assert_eq!(key, "sig.config%2Eupdate.sw1.gen%2Ev2.gen-1%2Eeu");
        assert_eq!(key.split('.').count(), 5);

        let parsed = AddressBook::parse(&key).unwrap();
        assert_eq!(parsed.signal, "config.update");
        assert_eq!(parsed.scope, scope);

        let event = AddressBook::event_key("err.or", "100%", &Scope::swarm("a.b"));
        assert_eq!(event, "ev.err%2Eor.100%25.a%2Eb.ALL.ALL");
        let parsed = AddressBook::parse(&event).unwrap();
        assert_eq!(parsed.category.as_deref(), Some("err.or"));
        assert_eq!(parsed.signal, "100%");
        assert_eq!(parsed.scope, Scope::swarm("a.b"));
    }

    #[test]
    fn test_routing_pattern_wildcards() {
        let hash = RoutingPattern::new("ev.ready.swarm-controller.#");
        assert!(hash.matches("ev.ready.swarm-controller.sw1.swarm-controller.c1"));
        assert!(hash.matches("ev.ready.swarm-controller"));
        assert!(!hash.matches("ev.error.swarm-controller.sw1.swarm-controller.c1"));

        let star = RoutingPattern::new("sig.*.sw1.ALL.ALL");
        assert!(star.matches("sig.swarm-start.sw1.ALL.ALL"));
        assert!(!star.matches("sig.swarm-start.sw2.ALL.ALL"));

        assert!(RoutingPattern::new("#").matches("sig.a.b.c.d"));
        assert!(RoutingPattern::new("sig.#.ALL").matches("sig.x.sw1.ALL.ALL"));
    }
}
