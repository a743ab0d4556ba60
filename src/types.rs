//! Core domain primitives shared across the event model, topology, and router.
//!
//! Following the same discipline as the rest of the crate: illegal states are
//! unrepresentable at construction time via `nutype`-validated wrappers rather
//! than checked ad hoc at each call site.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of an agent connected to the network.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Clone,
        Debug,
        Eq,
        PartialEq,
        Hash,
        Ord,
        PartialOrd,
        Display,
        Serialize,
        Deserialize,
        AsRef
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// The reserved destination literal meaning "every live agent except the source".
    pub const BROADCAST: &'static str = "agent:broadcast";
}

/// Identifier of a mod instance (e.g. `thread_messaging`, `shared_document`).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Display, Serialize, Deserialize)
)]
pub struct ModId(String);

/// A named multicast group of agents.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Display, Serialize, Deserialize)
)]
pub struct ChannelName(String);

/// A dotted, case-sensitive event name, e.g. `thread.channel_message.post`.
///
/// A trailing `*` is only meaningful on subscription patterns, never on an
/// event actually emitted onto the bus; that distinction is enforced by
/// [`crate::event::Event::new`], not by this type.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Clone, Debug, Eq, PartialEq, Hash, Display, Serialize, Deserialize)
)]
pub struct EventName(String);

/// Capacity of a bounded queue or channel, clamped to a sane operating range.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 1000,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Display, Serialize, Deserialize)
)]
pub struct QueueCapacity(usize);

/// Interval between heartbeats sent by a streaming-transport client, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1000, less_or_equal = 600_000),
    default = 30_000,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Display, Serialize, Deserialize)
)]
pub struct HeartbeatIntervalMs(u64);

impl HeartbeatIntervalMs {
    /// This crate's fixed eviction multiplier: an agent missing heartbeats for
    /// three consecutive intervals is considered dead.
    pub const TIMEOUT_MULTIPLIER: u64 = 3;

    /// The derived heartbeat timeout, `3 ×` this interval.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.into_inner() * Self::TIMEOUT_MULTIPLIER)
    }
}

/// Maximum inbound frame size accepted by a transport, in bytes.
#[nutype(
    validate(greater_or_equal = 1024, less_or_equal = 1_073_741_824),
    default = 104_857_600, // 100 MiB
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Display, Serialize, Deserialize)
)]
pub struct MaxMessageBytes(usize);

/// Capacity of the bounded task store behind the JSON-RPC transport.
#[nutype(
    validate(greater_or_equal = 16, less_or_equal = 10_000_000),
    default = 10_000,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Display, Serialize, Deserialize)
)]
pub struct TaskStoreCapacity(usize);

/// Pagination limit for a retrieval request, clamped to the contract in the
/// threaded-messaging and shared-document mods.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 500),
    default = 50,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Display, Serialize, Deserialize)
)]
pub struct PageLimit(usize);

/// Visibility scope of an [`crate::event::Event`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to every matching subscriber on the network (default).
    Network,
    /// Scoped to the members of the destination channel.
    Channel,
    /// Restricted to `allowed_agents`.
    Private,
    /// Not fanned out to subscribers at all (mod-pipeline only).
    None,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Network
    }
}

/// Where an event originated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Emitted by a connected agent.
    Agent,
    /// Synthesized by the network facade itself (e.g. system responses).
    Network,
    /// Emitted by a mod via its `Network` handle.
    Mod,
}

/// Liveness state of an agent connection record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Connected and receiving heartbeats.
    Connected,
    /// Unregistering; still resolvable for in-flight deliveries.
    Draining,
    /// Evicted; kept briefly for diagnostics, excluded from all recipient sets.
    Dead,
}
