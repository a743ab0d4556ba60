//! The `Mod` interface and the ordered pipeline the [`crate::router::Router`] runs.

use crate::event::{Event, EventResponse};
use crate::types::{AgentId, ModId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// The result of a single mod's `process_event` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineVerdict {
    /// The mod did not act on this event; continue to the next mod, then to routing.
    Pass,
    /// The mod consumed the event; stop the chain, produce no recipient fan-out.
    Absorb,
    /// The mod consumed the event and is answering it; stop the chain.
    Respond(EventResponse),
}

/// A handle passed to a mod so it can emit new events back into the router.
///
/// Emissions are buffered and only scheduled after the current event finishes
/// processing, preventing a mod from re-entering the pipeline it is currently
/// running inside of.
#[derive(Clone)]
pub struct EmitHandle {
    sender: mpsc::UnboundedSender<Event>,
}

impl EmitHandle {
    /// Queue an event to be routed once the current event finishes processing.
    pub fn emit(&self, event: Event) {
        // An unbounded channel whose only receiver is the router's own drain
        // loop is never expected to be closed while mods are live; a failed
        // send means the network is already tearing down, which is fine to
        // ignore here since there's nothing left to deliver to.
        let _ = self.sender.send(event);
    }
}

/// The receiving half the router drains after each inbound event completes.
pub struct EmitQueue {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EmitQueue {
    /// Construct a connected `(EmitHandle, EmitQueue)` pair.
    #[must_use]
    pub fn channel() -> (EmitHandle, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EmitHandle { sender }, Self { receiver })
    }

    /// Drain every event queued since the last drain.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// The interface every pluggable domain handler (threaded messaging, shared
/// document, wiki, forum, task delegation, ...) implements.
///
/// A mod is expected to serialize its own state access internally — the
/// pipeline may invoke `process_event` and `tick` from different executors,
/// but never concurrently with itself for the same mod.
#[async_trait]
pub trait Mod: Send + Sync {
    /// This mod's identifier, used for `mod:<id>` destinations and logging.
    fn id(&self) -> ModId;

    /// Called once at network startup, in declared order. A `false` return
    /// aborts network startup entirely.
    async fn initialize(&self) -> bool;

    /// Called once at network shutdown, in reverse declared order.
    async fn shutdown(&self) -> bool;

    /// Called when a new agent registers, after the topology records it.
    async fn on_register_agent(&self, _agent_id: &AgentId, _metadata: &HashMap<String, Value>) {}

    /// Called when an agent unregisters or is evicted.
    async fn on_unregister_agent(&self, _agent_id: &AgentId) {}

    /// Observe, transform, absorb, or respond to an inbound event.
    async fn process_event(&self, event: &Event, emit: &EmitHandle) -> PipelineVerdict;

    /// Periodic maintenance hook (timeouts, snapshotting); default cadence 1 Hz.
    /// Exceptions are logged by the caller; the mod continues on the next tick.
    async fn tick(&self) {}
}

/// The ordered chain of mods the router consults for every inbound event.
pub struct ModPipeline {
    mods: Vec<Arc<dyn Mod>>,
}

impl Default for ModPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ModPipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { mods: Vec::new() }
    }

    /// Register a mod; pipeline order is declaration order.
    pub fn register(&mut self, m: Arc<dyn Mod>) {
        self.mods.push(m);
    }

    /// The mods in declared (pipeline) order.
    #[must_use]
    pub fn mods(&self) -> &[Arc<dyn Mod>] {
        &self.mods
    }

    /// Look up a mod by id, for `mod:<id>`-destined events.
    #[must_use]
    pub fn find(&self, id: &ModId) -> Option<&Arc<dyn Mod>> {
        self.mods.iter().find(|m| &m.id() == id)
    }

    /// Initialize every mod in declared order. Returns `false` on the first
    /// failure (the caller aborts startup).
    pub async fn initialize_all(&self) -> bool {
        for m in &self.mods {
            if !m.initialize().await {
                error!(mod_id = %m.id(), "mod initialization failed");
                return false;
            }
        }
        true
    }

    /// Shut down every mod in reverse declared order. Failures are logged,
    /// not propagated, so every mod gets a chance to flush its state.
    pub async fn shutdown_all(&self) {
        for m in self.mods.iter().rev() {
            if !m.shutdown().await {
                warn!(mod_id = %m.id(), "mod shutdown reported failure");
            }
        }
    }

    /// Notify every mod that an agent registered.
    pub async fn notify_register(&self, agent_id: &AgentId, metadata: &HashMap<String, Value>) {
        for m in &self.mods {
            m.on_register_agent(agent_id, metadata).await;
        }
    }

    /// Notify every mod that an agent unregistered.
    pub async fn notify_unregister(&self, agent_id: &AgentId) {
        for m in &self.mods {
            m.on_unregister_agent(agent_id).await;
        }
    }

    /// Run the pipeline for one inbound event, stopping at the first
    /// `Absorb`/`Respond`. Returns the terminating verdict, or `Pass` if
    /// every mod passed.
    #[tracing::instrument(skip(self, event, emit), fields(event_name = %event.event_name))]
    pub async fn run(&self, event: &Event, emit: &EmitHandle) -> PipelineVerdict {
        // Events explicitly scoped to one mod bypass pipeline order and go
        // only to that mod.
        if let crate::event::Destination::Mod(ref id) = event.destination() {
            return match self.find(id) {
                Some(m) => m.process_event(event, emit).await,
                None => PipelineVerdict::Pass,
            };
        }

        for m in &self.mods {
            let verdict = m.process_event(event, emit).await;
            match verdict {
                PipelineVerdict::Pass => continue,
                verdict @ (PipelineVerdict::Absorb | PipelineVerdict::Respond(_)) => {
                    debug!(mod_id = %m.id(), "pipeline stopped");
                    return verdict;
                }
            }
        }
        PipelineVerdict::Pass
    }

    /// Invoke every mod's periodic maintenance hook.
    pub async fn tick_all(&self) {
        for m in &self.mods {
            m.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMod {
        id: ModId,
        verdict: PipelineVerdict,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Mod for CountingMod {
        fn id(&self) -> ModId {
            self.id.clone()
        }

        async fn initialize(&self) -> bool {
            true
        }

        async fn shutdown(&self) -> bool {
            true
        }

        async fn process_event(&self, _event: &Event, _emit: &EmitHandle) -> PipelineVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn event() -> Event {
        Event::new("thread.channel_message.post", "alice", SourceType::Agent).unwrap()
    }

    #[tokio::test]
    async fn first_absorb_stops_chain() {
        let mut pipeline = ModPipeline::new();
        let first = Arc::new(CountingMod {
            id: ModId::try_new("first").unwrap(),
            verdict: PipelineVerdict::Absorb,
            calls: AtomicUsize::new(0),
        });
        let second = Arc::new(CountingMod {
            id: ModId::try_new("second").unwrap(),
            verdict: PipelineVerdict::Pass,
            calls: AtomicUsize::new(0),
        });
        pipeline.register(first.clone());
        pipeline.register(second.clone());

        let (emit, _queue) = EmitQueue::channel();
        let verdict = pipeline.run(&event(), &emit).await;

        assert_eq!(verdict, PipelineVerdict::Absorb);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_pass_yields_pass() {
        let mut pipeline = ModPipeline::new();
        pipeline.register(Arc::new(CountingMod {
            id: ModId::try_new("first").unwrap(),
            verdict: PipelineVerdict::Pass,
            calls: AtomicUsize::new(0),
        }));
        let (emit, _queue) = EmitQueue::channel();
        assert_eq!(pipeline.run(&event(), &emit).await, PipelineVerdict::Pass);
    }

    #[tokio::test]
    async fn mod_destination_bypasses_other_mods() {
        let mut pipeline = ModPipeline::new();
        let targeted = Arc::new(CountingMod {
            id: ModId::try_new("thread_messaging").unwrap(),
            verdict: PipelineVerdict::Absorb,
            calls: AtomicUsize::new(0),
        });
        let other = Arc::new(CountingMod {
            id: ModId::try_new("shared_document").unwrap(),
            verdict: PipelineVerdict::Absorb,
            calls: AtomicUsize::new(0),
        });
        pipeline.register(other.clone());
        pipeline.register(targeted.clone());

        let event = Event::new("thread.file_op", "alice", SourceType::Agent)
            .unwrap()
            .with_destination("mod:thread_messaging");
        let (emit, _queue) = EmitQueue::channel();
        pipeline.run(&event, &emit).await;

        assert_eq!(other.calls.load(Ordering::SeqCst), 0);
        assert_eq!(targeted.calls.load(Ordering::SeqCst), 1);
    }
}
