//! Stream message shapes, event ids, and subscriber filters.

use orchestrator_protocol::SessionEvent;
use serde::Serialize;

use crate::auth::{Identity, Role};
use crate::session::Session;

/// Messages pushed to stream subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Snapshot of the subscriber's visible sessions at connect time.
    Init { sessions: Vec<Session> },

    SessionCreated { session: Session },

    /// Status or metadata change on an existing session.
    SessionUpdated { session: Session },

    SessionDeleted { session_id: String },

    /// One appended event, in sequence order within its session.
    SessionEvent { event: SessionEvent },

    RunFailed {
        run_id: String,
        session_id: String,
        error: String,
    },
}

impl StreamMessage {
    /// Short type tag used inside event ids.
    pub fn abbrev(&self) -> &'static str {
        match self {
            Self::Init { .. } => "ini",
            Self::SessionCreated { .. } => "scr",
            Self::SessionUpdated { .. } => "sup",
            Self::SessionDeleted { .. } => "sdl",
            Self::SessionEvent { .. } => "evt",
            Self::RunFailed { .. } => "rfl",
        }
    }
}

/// Broadcaster event id: `<ms_since_epoch>-<type_abbrev>-<sequence>`.
///
/// Opaque to clients except as a resume marker. Ids order by `ms` first,
/// with `seq` breaking ties within a millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId {
    pub ms: i64,
    pub abbrev: &'static str,
    pub seq: u64,
}

impl EventId {
    /// Ordering key for resume comparisons.
    pub fn key(&self) -> (i64, u64) {
        (self.ms, self.seq)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.ms, self.abbrev, self.seq)
    }
}

/// Parse a client-supplied resume marker into its ordering key.
///
/// The type abbreviation is irrelevant for ordering and is ignored.
pub fn parse_marker(raw: &str) -> Option<(i64, u64)> {
    let mut parts = raw.splitn(3, '-');
    let ms = parts.next()?.parse().ok()?;
    let _abbrev = parts.next()?;
    let seq = parts.next()?.parse().ok()?;
    Some((ms, seq))
}

/// Addressing attached to every broadcast message for server-side filtering.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Creator of the session the message concerns.
    pub created_by: String,
    pub session_id: String,
}

/// What one subscriber is allowed and asked to see.
#[derive(Debug, Clone)]
pub struct SubscriberFilter {
    pub user: String,
    pub role: Role,
    /// Optional narrowing to a single session.
    pub session_id: Option<String>,
}

impl SubscriberFilter {
    pub fn new(identity: &Identity, session_id: Option<String>) -> Self {
        Self {
            user: identity.user.clone(),
            role: identity.role,
            session_id,
        }
    }

    /// Server-side filter: admins see everything; users see their own.
    pub fn allows(&self, scope: &Scope) -> bool {
        if self.role != Role::Admin && self.user != scope.created_by {
            return false;
        }
        match &self.session_id {
            Some(wanted) => *wanted == scope.session_id,
            None => true,
        }
    }
}

/// A stamped, addressed message ready for delivery and replay.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: EventId,
    pub scope: Scope,
    pub message: StreamMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_format_and_parse() {
        let id = EventId {
            ms: 1700000000000,
            abbrev: "sup",
            seq: 42,
        };
        assert_eq!(id.to_string(), "1700000000000-sup-42");
        assert_eq!(parse_marker("1700000000000-sup-42"), Some((1700000000000, 42)));
        assert_eq!(parse_marker("garbage"), None);
        assert_eq!(parse_marker("12-x"), None);
    }

    #[test]
    fn test_user_filter_scoping() {
        let filter = SubscriberFilter {
            user: "alice".to_string(),
            role: Role::User,
            session_id: None,
        };
        let own = Scope {
            created_by: "alice".to_string(),
            session_id: "ses_1".to_string(),
        };
        let foreign = Scope {
            created_by: "bob".to_string(),
            session_id: "ses_2".to_string(),
        };
        assert!(filter.allows(&own));
        assert!(!filter.allows(&foreign));
    }

    #[test]
    fn test_admin_sees_all_but_honors_session_narrowing() {
        let filter = SubscriberFilter {
            user: "admin".to_string(),
            role: Role::Admin,
            session_id: Some("ses_1".to_string()),
        };
        let matching = Scope {
            created_by: "bob".to_string(),
            session_id: "ses_1".to_string(),
        };
        let other = Scope {
            created_by: "bob".to_string(),
            session_id: "ses_2".to_string(),
        };
        assert!(filter.allows(&matching));
        assert!(!filter.allows(&other));
    }
}
