//! Agent-to-agent JSON-RPC 2.0 transport: a single POST endpoint plus the
//! agent-card well-known document, backed by a capacity-bounded task store.

use crate::error::TaskError;
use crate::event::Event;
use crate::network::Network;
use crate::router::RemoteDispatcher;
use crate::topology::TransportBinding;
use crate::types::{AgentId, SourceType};
use async_trait::async_trait;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Lifecycle state of a JSON-RPC task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not yet handed to the router.
    Submitted,
    /// Currently being routed.
    Working,
    /// Awaiting more input from the caller (reserved for future mods; unused by the core).
    InputRequired,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Canceled before completion.
    Canceled,
}

impl TaskState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    fn is_cancellable(self) -> bool {
        matches!(self, Self::Submitted | Self::Working | Self::InputRequired)
    }
}

/// One JSON-RPC task record.
#[derive(Clone, Debug, Serialize)]
pub struct Task {
    /// Task identifier, returned from `message/send`.
    pub id: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Caller-supplied conversation/context correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Result artifacts once `completed`.
    #[serde(default)]
    pub artifacts: Vec<Value>,
    /// Error message once `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Capacity-bounded task store; evicts the least-recently-touched terminal
/// task when a new task would exceed capacity. Mid-flight tasks are never
/// eviction candidates.
pub struct TaskStore {
    tasks: DashMap<String, Task>,
    terminal_order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl TaskStore {
    /// An empty store bounded at `capacity` tasks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            terminal_order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    async fn insert_submitted(&self, context_id: Option<String>) -> String {
        self.evict_if_needed().await;
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                state: TaskState::Submitted,
                context_id,
                artifacts: Vec::new(),
                error: None,
            },
        );
        id
    }

    fn set_working(&self, id: &str) {
        if let Some(mut task) = self.tasks.get_mut(id) {
            task.state = TaskState::Working;
        }
    }

    async fn complete(&self, id: &str, artifact: Value) {
        let Some(mut task) = self.tasks.get_mut(id) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }
        task.state = TaskState::Completed;
        task.artifacts.push(artifact);
        drop(task);
        self.terminal_order.lock().await.push_back(id.to_string());
    }

    async fn fail(&self, id: &str, error: impl Into<String>) {
        let Some(mut task) = self.tasks.get_mut(id) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }
        task.state = TaskState::Failed;
        task.error = Some(error.into());
        drop(task);
        self.terminal_order.lock().await.push_back(id.to_string());
    }

    async fn evict_if_needed(&self) {
        let mut order = self.terminal_order.lock().await;
        while self.tasks.len() >= self.capacity {
            let Some(oldest) = order.pop_front() else { break };
            self.tasks.remove(&oldest);
        }
    }

    /// Look up a task by id.
    ///
    /// # Errors
    /// Returns [`TaskError::TaskNotFound`] if no such task exists.
    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        self.tasks
            .get(id)
            .map(|t| t.clone())
            .ok_or(TaskError::TaskNotFound)
    }

    /// List every task currently held (terminal and in-flight).
    #[must_use]
    pub fn list(&self) -> Vec<Task> {
        self.tasks.iter().map(|t| t.clone()).collect()
    }

    /// Cancel a task.
    ///
    /// # Errors
    /// Returns [`TaskError::TaskNotFound`] if unknown, or
    /// [`TaskError::TaskNotCancellable`] if it is already terminal.
    pub async fn cancel(&self, id: &str) -> Result<(), TaskError> {
        let mut task = self.tasks.get_mut(id).ok_or(TaskError::TaskNotFound)?;
        if !task.state.is_cancellable() {
            return Err(TaskError::TaskNotCancellable);
        }
        task.state = TaskState::Canceled;
        drop(task);
        self.terminal_order.lock().await.push_back(id.to_string());
        Ok(())
    }
}

#[derive(Clone)]
struct JsonRpcState {
    network: Arc<Network>,
    tasks: Arc<TaskStore>,
}

/// Build the JSON-RPC transport's router, backed by its own [`TaskStore`].
#[must_use]
pub fn router(network: Arc<Network>) -> axum::Router {
    let tasks = Arc::new(TaskStore::new(
        network.config().task_store_capacity.into_inner(),
    ));
    let state = JsonRpcState { network, tasks };
    axum::Router::new()
        .route("/", post(handle_rpc))
        .route("/.well-known/agent.json", get(agent_card))
        .with_state(state)
}

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_ok(id: Option<Value>, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

fn rpc_err(id: Option<Value>, code: i64, message: &str) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    }))
    .into_response()
}

async fn handle_rpc(State(state): State<JsonRpcState>, body: String) -> Response {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(_) => return rpc_err(None, -32700, "parse error"),
    };
    let id = request.id.clone();
    match request.method.as_str() {
        "agent/card" => rpc_ok(id, agent_card_value(&state)),
        "message/send" => message_send(state, id, request.params).await,
        "tasks/get" => tasks_get(&state, id, &request.params),
        "tasks/list" => tasks_list(&state, id),
        "tasks/cancel" => tasks_cancel(&state, id, &request.params).await,
        "agents/announce" => agents_announce(&state, id, &request.params),
        "agents/withdraw" => agents_withdraw(&state, id, &request.params),
        "agents/list" => agents_list(&state, id, &request.params),
        "events/send" => events_send(&state, id, request.params).await,
        _ => rpc_err(id, -32601, "method not found"),
    }
}

async fn agent_card(State(state): State<JsonRpcState>) -> Response {
    Json(agent_card_value(&state)).into_response()
}

fn agent_card_value(state: &JsonRpcState) -> Value {
    let skills: Vec<String> = state
        .network
        .topology()
        .list_agents(&crate::topology::AgentFilter::all())
        .into_iter()
        .flat_map(|a| a.capabilities)
        .chain(
            state
                .network
                .config()
                .mods
                .iter()
                .map(|m| m.id.clone()),
        )
        .collect();
    json!({
        "name": state.network.config().name.to_string(),
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": "0.3",
        "skills": skills,
    })
}

async fn message_send(state: JsonRpcState, id: Option<Value>, params: Value) -> Response {
    let Some(text) = params
        .get("message")
        .and_then(|m| m.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(|t| t.as_str())
    else {
        return rpc_err(id, -32602, "invalid params");
    };
    let context_id = params
        .get("contextId")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let task_id = state.tasks.insert_submitted(context_id).await;
    state.tasks.set_working(&task_id);

    let event = match Event::new("user.message", "remote", SourceType::Agent) {
        Ok(e) => e.with_payload(crate::event::payload([(
            "text",
            Value::String(text.to_string()),
        )])),
        Err(error) => {
            state.tasks.fail(&task_id, error.to_string()).await;
            return rpc_err(id, -32602, "invalid params");
        }
    };

    match state.network.handle_inbound(event, None).await {
        Ok(response) => {
            let artifact = serde_json::to_value(&response).unwrap_or(Value::Null);
            state.tasks.complete(&task_id, artifact).await;
        }
        Err(error) => {
            state.tasks.fail(&task_id, error.to_string()).await;
        }
    }

    rpc_ok(id, json!({ "id": task_id }))
}

fn tasks_get(state: &JsonRpcState, id: Option<Value>, params: &Value) -> Response {
    let Some(task_id) = params.get("id").and_then(|v| v.as_str()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    match state.tasks.get(task_id) {
        Ok(task) => rpc_ok(id, serde_json::to_value(task).unwrap_or(Value::Null)),
        Err(_) => rpc_err(id, -32001, "task_not_found"),
    }
}

fn tasks_list(state: &JsonRpcState, id: Option<Value>) -> Response {
    rpc_ok(id, json!({ "tasks": state.tasks.list() }))
}

async fn tasks_cancel(state: &JsonRpcState, id: Option<Value>, params: &Value) -> Response {
    let Some(task_id) = params.get("id").and_then(|v| v.as_str()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    match state.tasks.cancel(task_id).await {
        Ok(()) => rpc_ok(id, json!({ "success": true })),
        Err(TaskError::TaskNotFound) => rpc_err(id, -32001, "task_not_found"),
        Err(TaskError::TaskNotCancellable) => rpc_err(id, -32002, "task_not_cancellable"),
    }
}

fn agents_announce(state: &JsonRpcState, id: Option<Value>, params: &Value) -> Response {
    let (Some(url), Some(agent_id)) = (
        params.get("url").and_then(|v| v.as_str()),
        params.get("agent_id").and_then(|v| v.as_str()),
    ) else {
        return rpc_err(id, -32602, "invalid params");
    };
    let Ok(agent_id) = AgentId::try_new(agent_id.to_string()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    let skills = params
        .get("skills")
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let now = state.network.now_secs();
    state.network.topology().register_agent(
        agent_id.clone(),
        std::collections::HashMap::new(),
        std::collections::HashSet::new(),
        TransportBinding::Remote(url.to_string()),
        now,
        true,
    );
    let _ = state.network.topology().announce_skills(&agent_id, skills);
    rpc_ok(id, json!({ "success": true }))
}

fn agents_withdraw(state: &JsonRpcState, id: Option<Value>, params: &Value) -> Response {
    let Some(agent_id) = params.get("agent_id").and_then(|v| v.as_str()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    if let Ok(agent_id) = AgentId::try_new(agent_id.to_string()) {
        state.network.topology().unregister_agent(&agent_id);
    }
    rpc_ok(id, json!({ "success": true }))
}

fn agents_list(state: &JsonRpcState, id: Option<Value>, params: &Value) -> Response {
    let filter = crate::topology::AgentFilter {
        include_local: params
            .get("include_local")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        include_remote: params
            .get("include_remote")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        capability: None,
        event_name_pattern: None,
    };
    rpc_ok(
        id,
        json!({ "agents": state.network.topology().list_agents(&filter) }),
    )
}

async fn events_send(state: &JsonRpcState, id: Option<Value>, params: Value) -> Response {
    let Some(event_name) = params.get("event_name").and_then(|v| v.as_str()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    let Some(source_id) = params.get("source_id").and_then(|v| v.as_str()) else {
        return rpc_err(id, -32602, "invalid params");
    };
    let payload = params
        .get("payload")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let Ok(mut event) = Event::new(event_name, source_id, SourceType::Agent) else {
        return rpc_err(id, -32602, "invalid params");
    };
    event.payload = payload;
    if let Some(destination) = params.get("destination_id").and_then(|v| v.as_str()) {
        event = event.with_destination(destination);
    }
    match state.network.handle_inbound(event, None).await {
        Ok(response) => rpc_ok(id, serde_json::to_value(response).unwrap_or(Value::Null)),
        Err(error) => rpc_err(id, -32000, &error.to_string()),
    }
}

/// Dispatches outbound `message/send` calls to remote peers announced via `agents/announce`.
pub struct HttpRemoteDispatcher {
    client: reqwest::Client,
}

impl Default for HttpRemoteDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRemoteDispatcher {
    /// A dispatcher backed by a fresh `reqwest` client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteDispatcher for HttpRemoteDispatcher {
    async fn dispatch(&self, url: &str, event: Event) {
        let body = json!({
            "jsonrpc": "2.0",
            "id": event.event_id,
            "method": "events/send",
            "params": {
                "event_name": event.event_name,
                "source_id": event.source_id,
                "destination_id": event.destination_id,
                "payload": event.payload,
            },
        });
        if let Err(error) = self.client.post(url).json(&body).send().await {
            warn!(%url, %error, "remote dispatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_lifecycle_complete() {
        let store = TaskStore::new(10);
        let id = store.insert_submitted(None).await;
        store.set_working(&id);
        store.complete(&id, json!({"ok": true})).await;
        let task = store.get(&id).unwrap();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn cancel_terminal_task_rejected() {
        let store = TaskStore::new(10);
        let id = store.insert_submitted(None).await;
        store.complete(&id, json!({})).await;
        assert!(matches!(
            store.cancel(&id).await,
            Err(TaskError::TaskNotCancellable)
        ));
    }

    #[tokio::test]
    async fn complete_after_cancel_does_not_resurrect_task() {
        let store = TaskStore::new(10);
        let id = store.insert_submitted(None).await;
        store.cancel(&id).await.unwrap();
        store.complete(&id, json!({"ok": true})).await;
        let task = store.get(&id).unwrap();
        assert_eq!(task.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn fail_after_cancel_does_not_resurrect_task() {
        let store = TaskStore::new(10);
        let id = store.insert_submitted(None).await;
        store.cancel(&id).await.unwrap();
        store.fail(&id, "boom").await;
        let task = store.get(&id).unwrap();
        assert_eq!(task.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn eviction_only_removes_terminal_tasks() {
        let store = TaskStore::new(2);
        let first = store.insert_submitted(None).await;
        store.complete(&first, json!({})).await;
        let second = store.insert_submitted(None).await;
        assert!(store.get(&second).is_ok());
        // Inserting a third forces eviction of the oldest terminal task (`first`).
        let _third = store.insert_submitted(None).await;
        assert!(store.get(&first).is_err());
    }
}
