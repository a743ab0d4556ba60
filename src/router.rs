//! The scheduling heart: validates, runs the mod pipeline, resolves
//! recipients, delivers, and produces at most one [`EventResponse`].

use crate::agent_queue::AgentQueues;
use crate::error::RouterError;
use crate::event::{Event, EventResponse};
use crate::mod_pipeline::{EmitHandle, EmitQueue, ModPipeline, PipelineVerdict};
use crate::time_provider::SharedTimeProvider;
use crate::topology::{TransportBinding, Topology};
use crate::types::AgentId;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Dispatches an event to a remote agent announced over the JSON-RPC transport.
///
/// Implemented by the JSON-RPC transport; kept as a trait here so the router
/// does not depend on any particular HTTP client.
#[async_trait::async_trait]
pub trait RemoteDispatcher: Send + Sync {
    /// Best-effort delivery to a remote peer at `url`. Failures are logged by
    /// the caller and never propagate back into routing.
    async fn dispatch(&self, url: &str, event: Event);
}

/// The router: owns no state of its own beyond its collaborators and the
/// running/shutting-down flag.
pub struct Router {
    topology: Arc<Topology>,
    pipeline: Arc<ModPipeline>,
    agent_queues: Arc<AgentQueues>,
    streaming_senders: DashMap<AgentId, mpsc::UnboundedSender<Event>>,
    remote_dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    time: SharedTimeProvider,
    running: AtomicBool,
    emit: EmitHandle,
    emit_queue: Mutex<EmitQueue>,
}

impl Router {
    /// Build a router over a shared topology, mod pipeline, and agent-queue registry.
    #[must_use]
    pub fn new(
        topology: Arc<Topology>,
        pipeline: Arc<ModPipeline>,
        agent_queues: Arc<AgentQueues>,
        time: SharedTimeProvider,
    ) -> Self {
        let (emit, emit_queue) = EmitQueue::channel();
        Self {
            topology,
            pipeline,
            agent_queues,
            streaming_senders: DashMap::new(),
            remote_dispatcher: None,
            time,
            running: AtomicBool::new(true),
            emit,
            emit_queue: Mutex::new(emit_queue),
        }
    }

    /// Attach the dispatcher used to deliver to remote (JSON-RPC-announced) agents.
    pub fn set_remote_dispatcher(&mut self, dispatcher: Arc<dyn RemoteDispatcher>) {
        self.remote_dispatcher = Some(dispatcher);
    }

    /// Register a streaming-transport delivery sink for an agent.
    pub fn bind_streaming(&self, agent_id: AgentId, sender: mpsc::UnboundedSender<Event>) {
        self.streaming_senders.insert(agent_id, sender);
    }

    /// Remove a streaming-transport delivery sink.
    pub fn unbind_streaming(&self, agent_id: &AgentId) {
        self.streaming_senders.remove(agent_id);
    }

    /// Begin rejecting new inbound events with [`RouterError::Unavailable`].
    pub fn begin_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn now_secs(&self) -> u64 {
        self.time
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Route one inbound event. `authenticated_agent_id` is the identity the
    /// owning transport authenticated the connection as, if any; when the
    /// event claims `source_type == agent`, it must match `source_id`.
    ///
    /// # Errors
    /// Returns [`RouterError::Unavailable`] during shutdown,
    /// [`RouterError::InvalidEvent`] on a malformed event, or
    /// [`RouterError::NotAuthorized`] on a source/identity mismatch.
    #[tracing::instrument(skip(self, event, authenticated_agent_id), fields(event_id = %event.event_id, event_name = %event.event_name))]
    pub async fn route(
        &self,
        mut event: Event,
        authenticated_agent_id: Option<&AgentId>,
    ) -> Result<EventResponse, RouterError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RouterError::Unavailable);
        }

        event.stamp_timestamp_if_missing(self.now_secs());
        event.validate()?;

        if matches!(event.source_type, crate::types::SourceType::Agent) {
            if let Some(authenticated) = authenticated_agent_id {
                if authenticated.as_ref() != event.source_id {
                    return Err(RouterError::NotAuthorized);
                }
            }
        }

        let response = self.route_validated(&event).await?;
        self.drain_emitted().await;
        Ok(response)
    }

    async fn route_validated(&self, event: &Event) -> Result<EventResponse, RouterError> {
        match self.pipeline.run(event, &self.emit).await {
            PipelineVerdict::Respond(response) => {
                return Ok(response);
            }
            PipelineVerdict::Absorb => {
                return Ok(EventResponse::ok("absorbed"));
            }
            PipelineVerdict::Pass => {}
        }

        // Channels are implicit: the first event addressed to one brings
        // every currently live agent into it (the studio-UI "all agents in
        // all channels" contract), whether or not it was ever declared.
        if let crate::event::Destination::Channel(name) = event.destination() {
            self.topology.add_all_agents_to_channel(&name);
        }

        let recipients = self.topology.resolve_recipients(event);
        let mut delivered = 0usize;
        for recipient in &recipients {
            if self.deliver_to(recipient, event.clone()).await {
                delivered += 1;
            }
        }
        debug!(recipient_count = recipients.len(), delivered, "event routed");
        Ok(EventResponse::delivered(delivered))
    }

    async fn deliver_to(&self, recipient: &AgentId, event: Event) -> bool {
        match self.topology.binding_of(recipient) {
            Some(TransportBinding::HttpPoll) => {
                self.agent_queues.enqueue(recipient, event).await;
                true
            }
            Some(TransportBinding::Streaming(_)) => {
                if let Some(sender) = self.streaming_senders.get(recipient) {
                    if sender.send(event).is_ok() {
                        return true;
                    }
                }
                warn!(agent_id = %recipient, "streaming peer gone");
                false
            }
            Some(TransportBinding::Remote(url)) => {
                if let Some(dispatcher) = &self.remote_dispatcher {
                    let dispatcher = Arc::clone(dispatcher);
                    tokio::spawn(async move { dispatcher.dispatch(&url, event).await });
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Drain and re-route events mods emitted while processing the event just
    /// finished. Scheduled strictly after the triggering event's own routing
    /// completes, so a mod can never re-enter its own `process_event` call.
    async fn drain_emitted(&self) {
        let emitted = self.emit_queue.lock().await.drain();
        for event in emitted {
            if let Err(error) = Box::pin(self.route_validated(&event)).await {
                warn!(%error, "emitted event failed routing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Destination;
    use crate::time_provider::test_time_provider;
    use crate::topology::TransportBinding;
    use crate::types::SourceType;
    use std::collections::{HashMap, HashSet};

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    fn build_router() -> (Arc<Topology>, Arc<AgentQueues>, Router) {
        let topology = Arc::new(Topology::new());
        let pipeline = Arc::new(ModPipeline::new());
        let queues = Arc::new(AgentQueues::new(100, test_time_provider()));
        let router = Router::new(
            Arc::clone(&topology),
            pipeline,
            Arc::clone(&queues),
            test_time_provider(),
        );
        (topology, queues, router)
    }

    #[tokio::test]
    async fn dm_round_trip_via_http_poll() {
        let (topology, queues, router) = build_router();
        for id in ["alice", "bob"] {
            topology.register_agent(
                agent(id),
                HashMap::new(),
                HashSet::new(),
                TransportBinding::HttpPoll,
                0,
                false,
            );
        }
        queues.open(agent("bob"));

        let event = Event::new("agent.message", "alice", SourceType::Agent)
            .unwrap()
            .with_destination("agent:bob")
            .with_payload(crate::event::payload([(
                "text",
                serde_json::json!("hi"),
            )]));
        let response = router.route(event, Some(&agent("alice"))).await.unwrap();
        assert!(response.success);

        let received = queues.poll(&agent("bob"), 10, 50).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_name, "agent.message");
    }

    #[tokio::test]
    async fn shutdown_rejects_new_events() {
        let (_topology, _queues, router) = build_router();
        router.begin_shutdown();
        let event = Event::new("agent.message", "alice", SourceType::Agent).unwrap();
        let result = router.route(event, None).await;
        assert!(matches!(result, Err(RouterError::Unavailable)));
    }

    #[tokio::test]
    async fn mod_destination_never_yields_agent_recipients() {
        let topology = Arc::new(Topology::new());
        topology.register_agent(
            agent("alice"),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            0,
            false,
        );
        let event = Event::new("thread.file_op", "alice", SourceType::Agent)
            .unwrap()
            .with_destination("mod:thread_messaging");
        assert_eq!(
            topology.resolve_recipients(&event),
            Vec::<AgentId>::new()
        );
        assert!(matches!(event.destination(), Destination::Mod(_)));
    }
}
