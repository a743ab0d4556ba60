//! Per-agent bounded outbound queue used by poll-mode transports.
//!
//! One queue per registered agent; bounded with drop-oldest overflow, a
//! single-waiter `poll`, and FIFO ordering enforced entirely by the
//! underlying channel — no lock is held across an `.await` point.

use crate::error::QueueError;
use crate::event::Event;
use crate::time_provider::SharedTimeProvider;
use crate::types::AgentId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::sync::Mutex as AsyncMutex;

struct QueueState {
    buffer: AsyncMutex<VecDeque<Event>>,
    capacity: usize,
    dropped_count: AtomicU64,
    waiting: AtomicBool,
    notify: Notify,
    closed: AtomicBool,
}

impl QueueState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: AsyncMutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped_count: AtomicU64::new(0),
            waiting: AtomicBool::new(false),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }
}

/// The per-agent outbound queue registry, keyed by agent id.
pub struct AgentQueues {
    queues: DashMap<AgentId, Arc<QueueState>>,
    default_capacity: usize,
    time: SharedTimeProvider,
}

impl AgentQueues {
    /// Create an empty registry; new queues are allocated lazily on first
    /// registration with the given default capacity.
    #[must_use]
    pub fn new(default_capacity: usize, time: SharedTimeProvider) -> Self {
        Self {
            queues: DashMap::new(),
            default_capacity,
            time,
        }
    }

    /// Allocate a queue for an agent, replacing any prior (closed) one.
    pub fn open(&self, agent_id: AgentId) {
        self.queues
            .insert(agent_id, Arc::new(QueueState::new(self.default_capacity)));
    }

    /// Close an agent's queue, waking any pending waiter with an empty result.
    pub fn close(&self, agent_id: &AgentId) {
        if let Some((_, state)) = self.queues.remove(agent_id) {
            state.closed.store(true, Ordering::SeqCst);
            state.notify.notify_waiters();
        }
    }

    /// Enqueue an event for delivery to `agent_id`. O(1); drops the oldest
    /// entry and increments the drop counter on overflow. A no-op (not an
    /// error) if the agent has no open queue — callers treat missing queues
    /// as "not bound to this transport", not as a delivery failure.
    pub async fn enqueue(&self, agent_id: &AgentId, event: Event) {
        let Some(state) = self.queues.get(agent_id).map(|e| Arc::clone(&e)) else {
            return;
        };
        let mut buffer = state.buffer.lock().await;
        if buffer.len() >= state.capacity {
            buffer.pop_front();
            state.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
        drop(buffer);
        state.notify.notify_one();
    }

    /// Long-poll up to `max` events, waiting up to `wait_ms` for at least one
    /// to arrive. At most one waiter per agent; a concurrent second poll
    /// returns [`QueueError::Busy`].
    ///
    /// # Errors
    /// Returns [`QueueError::UnknownAgent`] if no queue is open for this
    /// agent, [`QueueError::Busy`] if another poll is already pending, or
    /// [`QueueError::Closed`] if the queue was closed while waiting.
    pub async fn poll(
        &self,
        agent_id: &AgentId,
        max: usize,
        wait_ms: u64,
    ) -> Result<Vec<Event>, QueueError> {
        let state = self
            .queues
            .get(agent_id)
            .map(|e| Arc::clone(&e))
            .ok_or(QueueError::UnknownAgent)?;

        if state
            .waiting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::Busy);
        }
        let _guard = WaitingGuard(&state.waiting);

        loop {
            {
                let mut buffer = state.buffer.lock().await;
                if !buffer.is_empty() {
                    let take = max.min(buffer.len());
                    let drained: Vec<Event> = buffer.drain(..take).collect();
                    return Ok(drained);
                }
            }
            if state.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }
            let notified = state.notify.notified();
            tokio::select! {
                () = notified => {}
                () = self.time.sleep(std::time::Duration::from_millis(wait_ms)) => {
                    return Ok(Vec::new());
                }
            }
            if state.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }
        }
    }

    /// Number of events dropped due to overflow for an agent, or 0 if unknown.
    #[must_use]
    pub fn dropped_count(&self, agent_id: &AgentId) -> u64 {
        self.queues
            .get(agent_id)
            .map(|s| s.dropped_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Whether a queue is currently open for this agent.
    #[must_use]
    pub fn is_open(&self, agent_id: &AgentId) -> bool {
        self.queues.contains_key(agent_id)
    }
}

struct WaitingGuard<'a>(&'a AtomicBool);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::test_time_provider;
    use crate::types::SourceType;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    fn event(name: &str) -> Event {
        Event::new(name, "source", SourceType::Agent).unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_poll_fifo() {
        let queues = AgentQueues::new(10, test_time_provider());
        queues.open(agent("bob"));
        queues.enqueue(&agent("bob"), event("a.one")).await;
        queues.enqueue(&agent("bob"), event("a.two")).await;

        let received = queues.poll(&agent("bob"), 10, 100).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event_name, "a.one");
        assert_eq!(received[1].event_name, "a.two");
    }

    #[tokio::test]
    async fn poll_times_out_empty() {
        let queues = AgentQueues::new(10, test_time_provider());
        queues.open(agent("bob"));
        let received = queues.poll(&agent("bob"), 10, 10).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queues = AgentQueues::new(2, test_time_provider());
        queues.open(agent("bob"));
        queues.enqueue(&agent("bob"), event("a.one")).await;
        queues.enqueue(&agent("bob"), event("a.two")).await;
        queues.enqueue(&agent("bob"), event("a.three")).await;

        assert_eq!(queues.dropped_count(&agent("bob")), 1);
        let received = queues.poll(&agent("bob"), 10, 10).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event_name, "a.two");
        assert_eq!(received[1].event_name, "a.three");
    }

    #[tokio::test]
    async fn close_wakes_waiter_empty() {
        let queues = Arc::new(AgentQueues::new(10, test_time_provider()));
        queues.open(agent("bob"));
        let waiter_queues = Arc::clone(&queues);
        let handle = tokio::spawn(async move { waiter_queues.poll(&agent("bob"), 10, 5_000).await });
        tokio::task::yield_now().await;
        queues.close(&agent("bob"));
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn unknown_agent_rejected() {
        let queues = AgentQueues::new(10, test_time_provider());
        let result = queues.poll(&agent("ghost"), 10, 10).await;
        assert!(matches!(result, Err(QueueError::UnknownAgent)));
    }
}
