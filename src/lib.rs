//! # OpenAgents
//!
//! An agent-interconnect platform: a multi-transport event router in front
//! of a pluggable mod pipeline. Agents register over streaming (WebSocket),
//! HTTP long-poll, or JSON-RPC, then exchange events addressed to other
//! agents, channels, or mods; the [`router::Router`] validates, runs the
//! pipeline, resolves recipients, and delivers — all against an in-memory
//! [`topology::Topology`] of connected agents and channel membership.
//!
//! The [`network::Network`] facade ties the pieces together: it owns the
//! topology, the agent-queue registry, the mod pipeline, and the router, and
//! answers `system.*` events (registration, discovery, heartbeats) directly
//! without ever entering the pipeline.

pub mod agent_queue;
pub mod config;
pub mod error;
pub mod event;
pub mod mod_pipeline;
pub mod mods;
pub mod network;
pub mod router;
pub mod time_provider;
pub mod topology;
pub mod transports;
pub mod types;

pub use config::{ModConfig, NetworkConfig, TransportConfig, TransportKind};
pub use error::OpenAgentsError;
pub use event::{Destination, Event, EventResponse};
pub use mod_pipeline::{Mod, ModPipeline, PipelineVerdict};
pub use network::Network;
pub use router::Router;
pub use topology::Topology;
pub use types::{AgentId, ChannelName, ModId};
