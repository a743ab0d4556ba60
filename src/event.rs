//! The canonical [`Event`] value type and its typed payload views.
//!
//! Every wire format the network speaks (HTTP JSON, JSON-RPC params,
//! WebSocket frames) converts to and from exactly this type at its own
//! transport boundary; nothing downstream ever sees a second representation.

use crate::error::EventError;
use crate::types::{AgentId, ModId, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A map of scalars/strings/maps/lists — the one internal payload representation.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The unit of communication routed between agents, mods, and the network itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique identifier, stable for the lifetime of the event.
    pub event_id: String,
    /// Dotted, case-sensitive event name.
    pub event_name: String,
    /// Identifier of the producing agent, or the network/mod when synthesized.
    pub source_id: String,
    /// Where the event came from.
    pub source_type: crate::types::SourceType,
    /// Routing destination; see [`Destination`] for the literal forms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    /// Free-form payload (string keys, JSON-representable values).
    #[serde(default)]
    pub payload: Payload,
    /// Free-form transport-layer annotations (request_id correlation, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
    /// Fan-out scope.
    #[serde(default)]
    pub visibility: Visibility,
    /// Recipients allowed to see this event when `visibility == private`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_agents: Option<HashSet<String>>,
    /// Wall-clock seconds; stamped by the router if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Mod identifier this event is scoped to, for `mod:<id>` destinations and
    /// mod-owned system events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_mod: Option<String>,
    /// When true, the router produces exactly one [`EventResponse`].
    #[serde(default)]
    pub requires_response: bool,
    /// The `event_id` this event is a response to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
}

/// The routing destination decoded from [`Event::destination_id`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    /// No destination set: route by subscription match only.
    Subscribers,
    /// `agent:broadcast` — every live agent except the source.
    Broadcast,
    /// `agent:<id>` or a bare agent id — exactly one agent.
    Agent(AgentId),
    /// `channel:<name>` — every member of that channel.
    Channel(String),
    /// `mod:<id>` — delivered only to the named mod, never to agent recipients.
    Mod(ModId),
}

impl Event {
    /// Build a new event, validating the invariants from the data model.
    ///
    /// # Errors
    /// Returns [`EventError::EmptyEventName`] if `event_name` is empty, or
    /// [`EventError::PrivateWithoutAllowedAgents`] if `visibility == private`
    /// with an empty or absent `allowed_agents`.
    pub fn new(
        event_name: impl Into<String>,
        source_id: impl Into<String>,
        source_type: crate::types::SourceType,
    ) -> Result<Self, EventError> {
        let event_name = event_name.into();
        if event_name.trim().is_empty() {
            return Err(EventError::EmptyEventName);
        }
        Ok(Self {
            event_id: Uuid::new_v4().to_string(),
            event_name,
            source_id: source_id.into(),
            source_type,
            destination_id: None,
            payload: Payload::new(),
            metadata: None,
            visibility: Visibility::Network,
            allowed_agents: None,
            timestamp: None,
            relevant_mod: None,
            requires_response: false,
            response_to: None,
        })
    }

    /// Set the destination, coercing `visibility` to `channel` when the
    /// destination is a `channel:` literal (per the data-model invariant).
    #[must_use]
    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        let destination_id = destination_id.into();
        if destination_id.starts_with("channel:") {
            self.visibility = Visibility::Channel;
        }
        self.destination_id = Some(destination_id);
        self
    }

    /// Attach a payload map.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set visibility directly.
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Restrict recipients; only honored when `visibility == private`.
    #[must_use]
    pub fn with_allowed_agents(mut self, agents: impl IntoIterator<Item = String>) -> Self {
        self.allowed_agents = Some(agents.into_iter().collect());
        self
    }

    /// Mark the event as requiring exactly one [`EventResponse`].
    #[must_use]
    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    /// Validate an already-constructed event (used when deserializing from
    /// the wire, where construction bypasses [`Event::new`]).
    ///
    /// # Errors
    /// See [`Event::new`].
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_name.trim().is_empty() {
            return Err(EventError::EmptyEventName);
        }
        if matches!(self.visibility, Visibility::Private)
            && self.allowed_agents.as_ref().is_none_or(HashSet::is_empty)
        {
            return Err(EventError::PrivateWithoutAllowedAgents);
        }
        Ok(())
    }

    /// Stamp `timestamp` with `now` if it is not already set.
    pub fn stamp_timestamp_if_missing(&mut self, now: u64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }

    /// Decode [`Event::destination_id`] into a structured [`Destination`].
    #[must_use]
    pub fn destination(&self) -> Destination {
        match self.destination_id.as_deref() {
            None => Destination::Subscribers,
            Some(AgentId::BROADCAST) => Destination::Broadcast,
            Some(d) if d.starts_with("agent:") => {
                let id = &d["agent:".len()..];
                AgentId::try_new(id.to_string())
                    .map(Destination::Agent)
                    .unwrap_or(Destination::Subscribers)
            }
            Some(d) if d.starts_with("channel:") => {
                Destination::Channel(d["channel:".len()..].to_string())
            }
            Some(d) if d.starts_with("mod:") => {
                let id = &d["mod:".len()..];
                ModId::try_new(id.to_string())
                    .map(Destination::Mod)
                    .unwrap_or(Destination::Subscribers)
            }
            Some(bare) => AgentId::try_new(bare.to_string())
                .map(Destination::Agent)
                .unwrap_or(Destination::Subscribers),
        }
    }
}

/// Whether a subscription pattern `P` matches an emitted event name `N`.
///
/// `P == N`, or `P == "*"`, or `P` ends in `.*` and `N` has the stripped
/// prefix followed by a dot. No other globbing is supported.
#[must_use]
pub fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    if pattern == event_name || pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    false
}

/// The at-most-one synchronous reply to an event marked `requires_response`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured result data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Machine-readable error code, set only when `success == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl EventResponse {
    /// The default "delivered" response the router synthesizes when no mod answered.
    #[must_use]
    pub fn delivered(recipient_count: usize) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(serde_json::json!({ "recipients": recipient_count })),
            error_code: None,
        }
    }

    /// Build a failure response carrying a machine-readable error code.
    #[must_use]
    pub fn failure(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            error_code: Some(error_code.into()),
        }
    }

    /// Build a bare success response with a message but no structured data.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error_code: None,
        }
    }
}

/// Truncate and format a quoted message per the threaded-messaging mod's
/// `"<author>: <first 100 chars>"` convention.
#[must_use]
pub fn quoted_text(author: &str, text: &str) -> String {
    let truncated: String = text.chars().take(100).collect();
    format!("{author}: {truncated}")
}

/// Typed, read-only view over a channel-post payload.
///
/// Views are parsers/builders over [`Event::payload`], never a second wire
/// representation; round-tripping a view through its event is lossless for
/// the keys it declares.
pub struct ChannelMessageView<'a> {
    event: &'a Event,
}

impl<'a> ChannelMessageView<'a> {
    /// Wrap an event as a channel-message view.
    #[must_use]
    pub fn new(event: &'a Event) -> Self {
        Self { event }
    }

    /// The message text, if present and a string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.event.payload.get("text").and_then(|v| v.as_str())
    }

    /// The channel name, decoded from the destination.
    #[must_use]
    pub fn channel(&self) -> Option<String> {
        match self.event.destination() {
            Destination::Channel(name) => Some(name),
            _ => None,
        }
    }
}

/// Typed, read-only view over a reply payload.
pub struct ReplyMessageView<'a> {
    event: &'a Event,
}

impl<'a> ReplyMessageView<'a> {
    /// Wrap an event as a reply-message view.
    #[must_use]
    pub fn new(event: &'a Event) -> Self {
        Self { event }
    }

    /// The id of the message being replied to.
    #[must_use]
    pub fn parent_message_id(&self) -> Option<&str> {
        self.event
            .payload
            .get("parent_message_id")
            .and_then(|v| v.as_str())
    }

    /// The reply text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.event.payload.get("text").and_then(|v| v.as_str())
    }
}

/// Build a `payload` map conveniently without reaching for `serde_json::json!`
/// at every call site (kept small; this is a builder, not a schema).
#[must_use]
pub fn payload(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> Payload {
    let mut map = Payload::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    map
}
