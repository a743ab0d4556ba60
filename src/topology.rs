//! In-memory registry of connected agents, channels, and subscriptions.
//!
//! Sharded across independent [`DashMap`]s (agents, channel membership,
//! subscription index) so a read never blocks on an unrelated write, mirroring
//! the registry shape used throughout the rest of the crate's concurrent
//! lookups.

use crate::error::TopologyError;
use crate::event::{Event, pattern_matches};
use crate::types::{AgentId, Liveness};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A connected agent's binding to a specific transport instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportBinding {
    /// Bound to the streaming (WebSocket) transport; carries an opaque session handle id.
    Streaming(String),
    /// Bound to the HTTP long-poll transport; delivery goes through the agent queue.
    HttpPoll,
    /// A remote peer known only via the JSON-RPC transport's announce mechanism.
    Remote(String),
}

/// A live agent's connection record.
#[derive(Clone, Debug)]
pub struct AgentRecord {
    /// The agent's identifier.
    pub agent_id: AgentId,
    /// Arbitrary client-supplied metadata.
    pub metadata: HashMap<String, Value>,
    /// Advertised capability names.
    pub capabilities: HashSet<String>,
    /// Skills announced separately from capabilities (kept for parity with the wire contract).
    pub skills: Vec<String>,
    /// Whether this record represents a remote peer rather than a locally connected agent.
    pub is_remote: bool,
    /// Which transport, and which session, this agent is bound to.
    pub binding: TransportBinding,
    /// Event-name subscription patterns this agent registered.
    pub subscriptions: HashSet<String>,
    /// Unix-epoch seconds of the last heartbeat or liveness-refreshing activity.
    pub last_seen: u64,
    /// Current liveness state.
    pub liveness: Liveness,
}

/// A read-only summary of an agent, returned by [`Topology::list_agents`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSummary {
    /// The agent's identifier.
    pub agent_id: String,
    /// Advertised capability names.
    pub capabilities: Vec<String>,
    /// Whether this record represents a remote peer.
    pub is_remote: bool,
}

/// Filter applied to [`Topology::list_agents`].
#[derive(Clone, Debug, Default)]
pub struct AgentFilter {
    /// Include locally connected agents.
    pub include_local: bool,
    /// Include remote (announced) agents.
    pub include_remote: bool,
    /// Restrict to agents advertising this capability.
    pub capability: Option<String>,
    /// Restrict to agents with at least one subscription matching this event-name pattern.
    pub event_name_pattern: Option<String>,
}

impl AgentFilter {
    /// A filter that includes every known agent, local and remote.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include_local: true,
            include_remote: true,
            capability: None,
            event_name_pattern: None,
        }
    }
}

/// Outcome of [`Topology::register_agent`].
#[derive(Debug, Eq, PartialEq)]
pub enum RegisterOutcome {
    /// Registration accepted.
    Ack,
    /// Registration rejected; a live record already exists and no reclaim was requested.
    Reject(TopologyError),
}

/// The in-memory agent/channel/subscription registry.
pub struct Topology {
    agents: DashMap<AgentId, AgentRecord>,
    channels: DashMap<String, HashSet<AgentId>>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Create an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Register a newly connected agent.
    ///
    /// Rejects a duplicate live agent-id unless `reclaim` is set, in which case
    /// the previous binding is evicted (its own transport is responsible for
    /// noticing the stale binding and closing).
    #[tracing::instrument(skip(self, metadata, capabilities))]
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        metadata: HashMap<String, Value>,
        capabilities: HashSet<String>,
        binding: TransportBinding,
        now: u64,
        reclaim: bool,
    ) -> RegisterOutcome {
        if let Some(existing) = self.agents.get(&agent_id) {
            if existing.liveness == Liveness::Connected && !reclaim {
                return RegisterOutcome::Reject(TopologyError::DuplicateAgent(agent_id));
            }
        }
        let is_remote = matches!(binding, TransportBinding::Remote(_));
        self.agents.insert(
            agent_id.clone(),
            AgentRecord {
                agent_id: agent_id.clone(),
                metadata,
                capabilities,
                skills: Vec::new(),
                is_remote,
                binding,
                subscriptions: HashSet::new(),
                last_seen: now,
                liveness: Liveness::Connected,
            },
        );
        info!(%agent_id, "agent registered");
        RegisterOutcome::Ack
    }

    /// Remove an agent's record. Idempotent.
    #[tracing::instrument(skip(self))]
    pub fn unregister_agent(&self, agent_id: &AgentId) {
        if self.agents.remove(agent_id).is_some() {
            for mut members in self.channels.iter_mut() {
                members.remove(agent_id);
            }
            debug!(%agent_id, "agent unregistered");
        }
    }

    /// Merge metadata into an agent's record; last-writer-wins per key.
    ///
    /// # Errors
    /// Returns [`TopologyError::UnknownAgent`] if the agent has no live record.
    pub fn update_metadata(
        &self,
        agent_id: &AgentId,
        metadata: HashMap<String, Value>,
    ) -> Result<(), TopologyError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| TopologyError::UnknownAgent(agent_id.clone()))?;
        record.metadata.extend(metadata);
        Ok(())
    }

    /// Replace an agent's subscription set.
    ///
    /// # Errors
    /// Returns [`TopologyError::UnknownAgent`] if the agent has no live record.
    pub fn update_subscriptions(
        &self,
        agent_id: &AgentId,
        patterns: HashSet<String>,
    ) -> Result<(), TopologyError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| TopologyError::UnknownAgent(agent_id.clone()))?;
        record.subscriptions = patterns;
        Ok(())
    }

    /// Merge announced skills into an agent's record.
    ///
    /// # Errors
    /// Returns [`TopologyError::UnknownAgent`] if the agent has no live record.
    pub fn announce_skills(
        &self,
        agent_id: &AgentId,
        skills: Vec<String>,
    ) -> Result<(), TopologyError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| TopologyError::UnknownAgent(agent_id.clone()))?;
        for skill in skills {
            if !record.skills.contains(&skill) {
                record.skills.push(skill);
            }
        }
        Ok(())
    }

    /// Add members to a channel, auto-creating it if this is its first use.
    pub fn add_channel_member(&self, channel: &str, agent_id: AgentId) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(agent_id);
    }

    /// Add every currently live agent to a channel (the "studio-UI contract").
    pub fn add_all_agents_to_channel(&self, channel: &str) {
        let mut members = self.channels.entry(channel.to_string()).or_default();
        for entry in &self.agents {
            if entry.liveness == Liveness::Connected {
                members.insert(entry.agent_id.clone());
            }
        }
    }

    /// Add a newly registered agent to every channel already known.
    pub fn add_agent_to_all_channels(&self, agent_id: &AgentId) {
        for mut members in self.channels.iter_mut() {
            members.insert(agent_id.clone());
        }
    }

    /// List members of a channel, filtered to currently live agents.
    #[must_use]
    pub fn channel_members(&self, channel: &str) -> Vec<AgentId> {
        self.channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter(|id| self.is_live(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_live(&self, agent_id: &AgentId) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|r| r.liveness == Liveness::Connected)
    }

    /// Look up an agent's current transport binding.
    #[must_use]
    pub fn binding_of(&self, agent_id: &AgentId) -> Option<TransportBinding> {
        self.agents
            .get(agent_id)
            .filter(|r| r.liveness == Liveness::Connected)
            .map(|r| r.binding.clone())
    }

    /// Resolve the ordered recipient set for an event, per the router's
    /// destination/subscription rules. Always excludes the source unless
    /// `allowed_agents` opts it back in.
    #[must_use]
    pub fn resolve_recipients(&self, event: &Event) -> Vec<AgentId> {
        use crate::event::Destination;

        let source_allowed = event
            .allowed_agents
            .as_ref()
            .is_some_and(|set| set.contains(&event.source_id));

        let mut recipients: Vec<AgentId> = match event.destination() {
            Destination::Mod(_) => return Vec::new(),
            Destination::Broadcast => self
                .agents
                .iter()
                .filter(|r| r.liveness == Liveness::Connected)
                .map(|r| r.agent_id.clone())
                .collect(),
            Destination::Agent(id) => {
                if self.is_live(&id) {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
            Destination::Channel(name) => self.channel_members(&name),
            Destination::Subscribers => Vec::new(),
        };

        // Union with subscription matches, regardless of destination kind,
        // per the always-union rule in the router algorithm.
        for entry in &self.agents {
            if entry.liveness != Liveness::Connected {
                continue;
            }
            if entry
                .subscriptions
                .iter()
                .any(|pattern| pattern_matches(pattern, &event.event_name))
                && !recipients.contains(&entry.agent_id)
            {
                recipients.push(entry.agent_id.clone());
            }
        }

        if matches!(event.visibility, crate::types::Visibility::Private) {
            if let Some(allowed) = &event.allowed_agents {
                recipients.retain(|id| allowed.contains(id.as_ref()));
            } else {
                recipients.clear();
            }
        }

        if !source_allowed {
            recipients.retain(|id| id.as_ref() != event.source_id);
        }

        recipients
    }

    /// List agents matching a filter.
    #[must_use]
    pub fn list_agents(&self, filter: &AgentFilter) -> Vec<AgentSummary> {
        self.agents
            .iter()
            .filter(|r| r.liveness == Liveness::Connected)
            .filter(|r| {
                (r.is_remote && filter.include_remote) || (!r.is_remote && filter.include_local)
            })
            .filter(|r| {
                filter
                    .capability
                    .as_ref()
                    .is_none_or(|cap| r.capabilities.contains(cap))
            })
            .filter(|r| {
                filter.event_name_pattern.as_ref().is_none_or(|pattern| {
                    r.subscriptions
                        .iter()
                        .any(|sub| pattern_matches(sub, pattern) || pattern_matches(pattern, sub))
                })
            })
            .map(|r| AgentSummary {
                agent_id: r.agent_id.to_string(),
                capabilities: r.capabilities.iter().cloned().collect(),
                is_remote: r.is_remote,
            })
            .collect()
    }

    /// Refresh an agent's last-seen timestamp.
    ///
    /// # Errors
    /// Returns [`TopologyError::UnknownAgent`] if the agent has no live record.
    pub fn mark_heartbeat(&self, agent_id: &AgentId, ts: u64) -> Result<(), TopologyError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| TopologyError::UnknownAgent(agent_id.clone()))?;
        record.last_seen = ts;
        Ok(())
    }

    /// Evict every agent whose last heartbeat is older than `timeout_secs`
    /// relative to `now`. Returns the evicted agent ids so the caller can
    /// close their queues/streams.
    pub fn sweep_expired_heartbeats(&self, now: u64, timeout_secs: u64) -> Vec<AgentId> {
        let mut expired = Vec::new();
        for mut entry in self.agents.iter_mut() {
            if entry.liveness == Liveness::Connected && now.saturating_sub(entry.last_seen) > timeout_secs
            {
                entry.liveness = Liveness::Dead;
                expired.push(entry.agent_id.clone());
            }
        }
        for id in &expired {
            warn!(agent_id = %id, "evicted on heartbeat timeout");
            self.unregister_agent(id);
        }
        expired
    }

    /// Whether an agent currently has a live record.
    #[must_use]
    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.is_live(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    #[test]
    fn register_then_unregister_round_trip() {
        let topology = Topology::new();
        topology.register_agent(
            agent("alice"),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            0,
            false,
        );
        assert!(
            topology
                .list_agents(&AgentFilter::all())
                .iter()
                .any(|s| s.agent_id == "alice")
        );
        topology.unregister_agent(&agent("alice"));
        assert!(
            !topology
                .list_agents(&AgentFilter::all())
                .iter()
                .any(|s| s.agent_id == "alice")
        );
    }

    #[test]
    fn duplicate_registration_rejected_without_reclaim() {
        let topology = Topology::new();
        topology.register_agent(
            agent("alice"),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            0,
            false,
        );
        let outcome = topology.register_agent(
            agent("alice"),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            1,
            false,
        );
        assert!(matches!(outcome, RegisterOutcome::Reject(_)));
    }

    #[test]
    fn broadcast_excludes_source() {
        let topology = Topology::new();
        for id in ["a", "b", "c"] {
            topology.register_agent(
                agent(id),
                HashMap::new(),
                HashSet::new(),
                TransportBinding::HttpPoll,
                0,
                false,
            );
        }
        let event = Event::new("agent.ping", "a", SourceType::Agent)
            .unwrap()
            .with_destination("agent:broadcast");
        let recipients = topology.resolve_recipients(&event);
        assert_eq!(recipients.len(), 2);
        assert!(!recipients.contains(&agent("a")));
    }

    #[test]
    fn private_visibility_restricts_to_allowed_agents() {
        let topology = Topology::new();
        for id in ["a", "b", "c"] {
            topology.register_agent(
                agent(id),
                HashMap::new(),
                HashSet::new(),
                TransportBinding::HttpPoll,
                0,
                false,
            );
        }
        let event = Event::new("agent.message", "a", SourceType::Agent)
            .unwrap()
            .with_destination("agent:broadcast")
            .with_visibility(crate::types::Visibility::Private)
            .with_allowed_agents(["b".to_string()]);
        let recipients = topology.resolve_recipients(&event);
        assert_eq!(recipients, vec![agent("b")]);
    }

    #[test]
    fn heartbeat_sweep_evicts_stale_agents() {
        let topology = Topology::new();
        topology.register_agent(
            agent("alice"),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            0,
            false,
        );
        let expired = topology.sweep_expired_heartbeats(1000, 90);
        assert_eq!(expired, vec![agent("alice")]);
        assert!(!topology.contains(&agent("alice")));
    }
}
