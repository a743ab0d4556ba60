//! Error taxonomy for the network core.
//!
//! One `thiserror` enum per architectural seam, so every layer maps to exactly
//! one of these variants rather than inventing ad hoc string errors.

use crate::types::{AgentId, ModId};
use thiserror::Error;

/// Errors constructing or validating an [`crate::event::Event`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// `event_name` was empty after trimming.
    #[error("event_name must not be empty")]
    EmptyEventName,
    /// `visibility == private` but `allowed_agents` was empty.
    #[error("visibility=private requires a non-empty allowed_agents set")]
    PrivateWithoutAllowedAgents,
}

/// Errors raised by the [`crate::topology::Topology`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No live record exists for the given agent id.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
    /// A live record already exists for this agent id and the caller did not request a reclaim.
    #[error("agent already registered: {0}")]
    DuplicateAgent(AgentId),
}

/// Errors raised by a per-agent [`crate::agent_queue::AgentQueue`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A poll is already pending for this agent; only one waiter is allowed at a time.
    #[error("a poll is already pending for this agent")]
    Busy,
    /// The queue has been closed (agent unregistered or evicted).
    #[error("queue closed")]
    Closed,
    /// No queue has been allocated for this agent on this transport.
    #[error("unknown agent")]
    UnknownAgent,
}

/// Errors raised while a mod processes an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModError {
    /// The mod's `initialize()` hook returned failure; aborts network startup.
    #[error("mod {0} failed to initialize")]
    InitializationFailed(ModId),
    /// A reply would exceed the maximum thread depth.
    #[error("cannot reply past level 4")]
    ThreadDepthExceeded,
    /// Referenced a file id that does not exist in the upload store.
    #[error("File not found")]
    FileNotFound,
    /// Referenced a file id whose bytes have been evicted.
    #[error("File no longer available")]
    FileNoLongerAvailable,
    /// Attempted to mutate a line held by another agent's active lock.
    #[error("line {line} is locked by {holder}")]
    LineLocked {
        /// The contested line number.
        line: usize,
        /// The agent currently holding the lock.
        holder: AgentId,
    },
    /// Attempted an operation the caller's permission level does not allow.
    #[error("insufficient permission")]
    PermissionDenied,
    /// Referenced a document, comment, or other mod-owned id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Generic validation failure surfaced by a mod's own schema check.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ModError {
    /// Machine-readable code this error surfaces as on the wire, matching the
    /// `error_code` a caller branches on.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InitializationFailed(_) => "initialization_failed",
            Self::ThreadDepthExceeded => "thread_depth_exceeded",
            Self::FileNotFound | Self::FileNoLongerAvailable | Self::NotFound(_) => "not_found",
            Self::LineLocked { .. } => "line_locked",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<ModError> for crate::event::EventResponse {
    fn from(error: ModError) -> Self {
        let code = error.error_code();
        crate::event::EventResponse::failure(code, error.to_string())
    }
}

/// Errors raised by the [`crate::router::Router`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The router is shutting down and rejects new inbound events.
    #[error("router unavailable (shutting down)")]
    Unavailable,
    /// The event failed validation per [`EventError`].
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),
    /// The authenticated transport identity did not match the event's declared source.
    #[error("source_id does not match authenticated agent")]
    NotAuthorized,
}

/// Errors surfaced at a transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Missing or invalid bearer token on a transport that requires one.
    #[error("authentication required")]
    NotAuthorized,
    /// The listener could not bind its configured address.
    #[error("bind failed: {0}")]
    BindFailed(String),
    /// Wraps an I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wraps a (de)serialization failure at the wire boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The router rejected the translated event.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// JSON-RPC task-lifecycle errors (agent-to-agent transport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// No task exists with the given id.
    #[error("task_not_found")]
    TaskNotFound,
    /// The task is in a terminal state and cannot be canceled.
    #[error("task_not_cancellable")]
    TaskNotCancellable,
}

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A single field failed a cross-field or range check.
    #[error("invalid configuration: {field} - {reason}")]
    ValidationError {
        /// The offending field name.
        field: String,
        /// Why it is invalid.
        reason: String,
    },
    /// Wraps a filesystem failure reading/writing the config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wraps a (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error type uniting every seam, used by the `Network` facade and binaries.
#[derive(Debug, Error)]
pub enum OpenAgentsError {
    /// See [`EventError`].
    #[error(transparent)]
    Event(#[from] EventError),
    /// See [`TopologyError`].
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// See [`QueueError`].
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// See [`ModError`].
    #[error(transparent)]
    Mod(#[from] ModError),
    /// See [`RouterError`].
    #[error(transparent)]
    Router(#[from] RouterError),
    /// See [`TransportError`].
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// See [`TaskError`].
    #[error(transparent)]
    Task(#[from] TaskError),
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}
