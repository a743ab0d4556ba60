//! The `Network` façade: owns lifecycle, the shared collaborators, and the
//! `system.*` event handlers that bypass the mod pipeline entirely.

use crate::agent_queue::AgentQueues;
use crate::config::NetworkConfig;
use crate::error::{OpenAgentsError, TopologyError};
use crate::event::{Event, EventResponse};
use crate::mod_pipeline::ModPipeline;
use crate::router::Router;
use crate::time_provider::SharedTimeProvider;
use crate::topology::{AgentFilter, Topology, TransportBinding};
use crate::types::AgentId;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Reserved `system.*` event-name prefix; these never enter the mod pipeline.
pub const SYSTEM_EVENT_PREFIX: &str = "system.";

/// Owns the topology, router, mod pipeline, and per-network shutdown signal.
///
/// Transports hold an `Arc<Network>` and call [`Network::handle_inbound`] for
/// every frame they decode, letting the façade intercept `system.*` events
/// before anything reaches the [`Router`].
pub struct Network {
    config: NetworkConfig,
    topology: Arc<Topology>,
    agent_queues: Arc<AgentQueues>,
    pipeline: Arc<ModPipeline>,
    router: Router,
    time: SharedTimeProvider,
    shutdown: CancellationToken,
}

impl Network {
    /// Build a network from a validated config. Does not start transports or
    /// initialize mods yet — call [`Network::start`] for that.
    ///
    /// # Errors
    /// Returns [`OpenAgentsError::Config`] if `config` fails validation.
    pub fn new(
        config: NetworkConfig,
        pipeline: ModPipeline,
        time: SharedTimeProvider,
    ) -> Result<Self, OpenAgentsError> {
        config.validate()?;
        let topology = Arc::new(Topology::new());
        let agent_queues = Arc::new(AgentQueues::new(
            config.agent_queue_capacity.into_inner(),
            Arc::clone(&time),
        ));
        let pipeline = Arc::new(pipeline);
        let router = Router::new(
            Arc::clone(&topology),
            Arc::clone(&pipeline),
            Arc::clone(&agent_queues),
            Arc::clone(&time),
        );
        Ok(Self {
            config,
            topology,
            agent_queues,
            pipeline,
            router,
            time,
            shutdown: CancellationToken::new(),
        })
    }

    /// The validated configuration this network was built from.
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The shared agent/channel registry, for transports to register against.
    #[must_use]
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// The shared per-agent poll queues, for the HTTP long-poll transport.
    #[must_use]
    pub fn agent_queues(&self) -> &Arc<AgentQueues> {
        &self.agent_queues
    }

    /// The router, for transports to submit inbound events to.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Attach the dispatcher used to deliver to remote (JSON-RPC-announced)
    /// agents. Must be called before the network is shared behind an `Arc`.
    pub fn set_remote_dispatcher(&mut self, dispatcher: Arc<dyn crate::router::RemoteDispatcher>) {
        self.router.set_remote_dispatcher(dispatcher);
    }

    /// The token transports should select on to notice shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ensure `<workspace>/mods/<mod_id>/` exists for every configured mod,
    /// then run every mod's `initialize()` hook in declared order.
    ///
    /// # Errors
    /// Returns [`OpenAgentsError::Mod`] if any mod's initialization fails.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), OpenAgentsError> {
        for mod_config in &self.config.mods {
            let dir = self.config.workspace.join("mods").join(&mod_config.id);
            std::fs::create_dir_all(&dir).map_err(crate::error::ConfigError::from)?;
        }
        if !self.pipeline.initialize_all().await {
            return Err(OpenAgentsError::Mod(
                crate::error::ModError::InitializationFailed(
                    crate::types::ModId::try_new("unknown").expect("literal is valid"),
                ),
            ));
        }
        self.spawn_heartbeat_sweeper();
        self.spawn_mod_ticker();
        info!(network = %self.config.name, "network started");
        Ok(())
    }

    fn spawn_mod_ticker(&self) {
        let pipeline = Arc::clone(&self.pipeline);
        let time = Arc::clone(&self.time);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = time.sleep(Duration::from_secs(1)) => {}
                }
                pipeline.tick_all().await;
            }
        });
    }

    fn spawn_heartbeat_sweeper(&self) {
        let topology = Arc::clone(&self.topology);
        let agent_queues = Arc::clone(&self.agent_queues);
        let time = Arc::clone(&self.time);
        let shutdown = self.shutdown.clone();
        let timeout_secs = self.config.heartbeat_timeout_ms() / 1000;
        let interval = Duration::from_millis(self.config.heartbeat_interval.into_inner());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = time.sleep(interval) => {}
                }
                let now = time
                    .now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                for agent_id in topology.sweep_expired_heartbeats(now, timeout_secs) {
                    agent_queues.close(&agent_id);
                }
            }
        });
    }

    /// Stop transports' accept loops (via the shutdown token), drain the
    /// router, then shut every mod down in reverse declared order.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.router.begin_shutdown();
        self.pipeline.shutdown_all().await;
        info!(network = %self.config.name, "network stopped");
    }

    /// Entry point every transport calls for a decoded inbound event.
    ///
    /// `system.*` events are intercepted and answered directly; everything
    /// else goes to the [`Router`].
    ///
    /// # Errors
    /// Propagates [`crate::error::RouterError`] for non-system events.
    pub async fn handle_inbound(
        &self,
        event: Event,
        authenticated_agent_id: Option<&AgentId>,
    ) -> Result<EventResponse, crate::error::RouterError> {
        if event.event_name.starts_with(SYSTEM_EVENT_PREFIX) {
            return Ok(self.handle_system_event(&event));
        }
        self.router.route(event, authenticated_agent_id).await
    }

    fn handle_system_event(&self, event: &Event) -> EventResponse {
        match event.event_name.as_str() {
            "system.register" => self.system_register(event),
            "system.unregister" => self.system_unregister(event),
            "system.list_agents" => self.system_list_agents(),
            "system.list_mods" => self.system_list_mods(),
            "system.get_mod_manifest" => self.system_get_mod_manifest(event),
            "system.ping_agent" => self.system_ping_agent(event),
            "system.claim_agent_id" => self.system_claim_agent_id(event),
            "system.validate_certificate" => EventResponse::ok("not implemented"),
            "system.poll_messages" => self.system_poll_messages(event),
            other => EventResponse::failure("unknown_system_event", other),
        }
    }

    fn system_register(&self, event: &Event) -> EventResponse {
        let Some(agent_id) = AgentId::try_new(event.source_id.clone()).ok() else {
            return EventResponse::failure("invalid_agent_id", "agent_id is invalid");
        };
        let metadata = event
            .payload
            .get("metadata")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let capabilities = event
            .payload
            .get("capabilities")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let now = self.now_secs();
        let outcome = self.topology.register_agent(
            agent_id.clone(),
            metadata,
            capabilities,
            TransportBinding::HttpPoll,
            now,
            false,
        );
        self.agent_queues.open(agent_id.clone());
        self.topology.add_agent_to_all_channels(&agent_id);
        match outcome {
            crate::topology::RegisterOutcome::Ack => EventResponse::ok("registered"),
            crate::topology::RegisterOutcome::Reject(TopologyError::DuplicateAgent(_)) => {
                EventResponse::failure("duplicate_agent", "agent already registered")
            }
            crate::topology::RegisterOutcome::Reject(other) => {
                EventResponse::failure("registration_failed", other.to_string())
            }
        }
    }

    fn system_unregister(&self, event: &Event) -> EventResponse {
        let Ok(agent_id) = AgentId::try_new(event.source_id.clone()) else {
            return EventResponse::failure("invalid_agent_id", "agent_id is invalid");
        };
        self.topology.unregister_agent(&agent_id);
        self.agent_queues.close(&agent_id);
        EventResponse::ok("unregistered")
    }

    fn system_list_agents(&self) -> EventResponse {
        let agents = self.topology.list_agents(&AgentFilter::all());
        EventResponse {
            success: true,
            message: None,
            data: Some(json!({ "agents": agents })),
            error_code: None,
        }
    }

    fn system_list_mods(&self) -> EventResponse {
        let ids: Vec<String> = self
            .pipeline
            .mods()
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        EventResponse {
            success: true,
            message: None,
            data: Some(json!({ "mods": ids })),
            error_code: None,
        }
    }

    fn system_get_mod_manifest(&self, event: &Event) -> EventResponse {
        let Some(requested) = event.payload.get("mod_id").and_then(|v| v.as_str()) else {
            return EventResponse::failure("invalid_request", "mod_id is required");
        };
        let mod_config = self.config.mods.iter().find(|m| m.id == requested);
        match mod_config {
            Some(m) => EventResponse {
                success: true,
                message: None,
                data: Some(json!({ "id": m.id, "settings": m.settings })),
                error_code: None,
            },
            None => EventResponse::failure("not_found", format!("no mod named {requested}")),
        }
    }

    fn system_ping_agent(&self, event: &Event) -> EventResponse {
        let Some(target) = event.payload.get("agent_id").and_then(|v| v.as_str()) else {
            return EventResponse::failure("invalid_request", "agent_id is required");
        };
        let Ok(target) = AgentId::try_new(target.to_string()) else {
            return EventResponse::failure("invalid_request", "agent_id is invalid");
        };
        EventResponse {
            success: true,
            message: None,
            data: Some(json!({ "alive": self.topology.contains(&target) })),
            error_code: None,
        }
    }

    fn system_claim_agent_id(&self, event: &Event) -> EventResponse {
        let Some(requested) = event.payload.get("agent_id").and_then(|v| v.as_str()) else {
            return EventResponse::failure("invalid_request", "agent_id is required");
        };
        let Ok(requested) = AgentId::try_new(requested.to_string()) else {
            return EventResponse::failure("invalid_request", "agent_id is invalid");
        };
        EventResponse {
            success: true,
            message: None,
            data: Some(json!({ "available": !self.topology.contains(&requested) })),
            error_code: None,
        }
    }

    fn system_poll_messages(&self, event: &Event) -> EventResponse {
        // Streaming-transport clients use this to pull queued events without
        // opening a second connection; the actual long-poll wait happens on
        // the caller's side via `AgentQueues::poll` from the transport layer,
        // since this handler must stay synchronous.
        let _ = event;
        EventResponse::failure(
            "unsupported",
            "poll_messages must be issued through the HTTP poll transport",
        )
    }

    /// Current wall-clock seconds, per this network's [`crate::time_provider::TimeProvider`].
    #[must_use]
    pub fn now_secs(&self) -> u64 {
        self.time
            .now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
