//! Streaming RPC transport: one WebSocket per agent, Events as JSON text frames.

use crate::event::{Event, EventResponse};
use crate::network::Network;
use crate::topology::TransportBinding;
use crate::types::{AgentId, SourceType};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Build the `GET /api/stream` router for the streaming transport.
#[must_use]
pub fn router(network: Arc<Network>) -> axum::Router {
    axum::Router::new()
        .route("/api/stream", get(upgrade))
        .with_state(network)
}

async fn upgrade(State(network): State<Arc<Network>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, network))
}

#[tracing::instrument(skip(socket, network))]
async fn handle_socket(mut socket: WebSocket, network: Arc<Network>) {
    let agent_id = match wait_for_registration(&mut socket, &network).await {
        Some(id) => id,
        None => return,
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Event>();
    network.router().bind_streaming(agent_id.clone(), outbound_tx);

    let timeout = Duration::from_millis(network.config().heartbeat_timeout_ms());
    let shutdown = network.shutdown_token();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(timeout) => {
                warn!(%agent_id, "heartbeat timeout, closing stream");
                break;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !process_inbound(&text, &network, &agent_id, &mut socket).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%agent_id, %error, "stream read error");
                        break;
                    }
                }
            }
        }
    }

    network.router().unbind_streaming(&agent_id);
    network.topology().unregister_agent(&agent_id);
    network.agent_queues().close(&agent_id);
    info!(%agent_id, "stream closed");
}

/// Wait for the opening `system.register` frame, sized and timed per the
/// transport contract; returns `None` (closing the socket) on any failure.
async fn wait_for_registration(socket: &mut WebSocket, network: &Arc<Network>) -> Option<AgentId> {
    let frame = tokio::time::timeout(Duration::from_secs(10), socket.recv())
        .await
        .ok()??
        .ok()?;
    let Message::Text(text) = frame else {
        return None;
    };
    let event: Event = serde_json::from_str(&text).ok()?;
    if event.event_name != "system.register" {
        return None;
    }
    let agent_id = AgentId::try_new(event.source_id.clone()).ok()?;
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
    network.topology().register_agent(
        agent_id.clone(),
        metadata,
        capabilities,
        TransportBinding::Streaming(agent_id.to_string()),
        network.now_secs(),
        true,
    );
    network.topology().add_agent_to_all_channels(&agent_id);

    let ack = EventResponse::ok("registered");
    let ack_event = Event::new("system.register.ack", "network", SourceType::Network)
        .ok()?
        .with_payload(crate::event::payload([(
            "response",
            serde_json::to_value(&ack).ok()?,
        )]));
    let text = serde_json::to_string(&ack_event).ok()?;
    socket.send(Message::Text(text.into())).await.ok()?;
    Some(agent_id)
}

/// Decode and route one inbound text frame. Returns `false` if the socket
/// should close (malformed frame beyond size/shape tolerance).
async fn process_inbound(
    text: &str,
    network: &Arc<Network>,
    agent_id: &AgentId,
    socket: &mut WebSocket,
) -> bool {
    if text.len() > network.config().max_message_bytes.into_inner() {
        return false;
    }
    let Ok(event) = serde_json::from_str::<Event>(text) else {
        return true;
    };
    let requires_response = event.requires_response;
    let event_id = event.event_id.clone();
    match network.handle_inbound(event, Some(agent_id)).await {
        Ok(response) if requires_response => {
            send_response(socket, &event_id, &response).await;
        }
        Ok(_) => {}
        Err(error) => {
            let response = EventResponse::failure("router_error", error.to_string());
            send_response(socket, &event_id, &response).await;
        }
    }
    true
}

async fn send_response(socket: &mut WebSocket, response_to: &str, response: &EventResponse) {
    let Ok(event) = Event::new("system.response", "network", SourceType::Network) else {
        return;
    };
    let event = event.with_payload(crate::event::payload([(
        "response",
        serde_json::to_value(response).unwrap_or(serde_json::Value::Null),
    )]));
    let mut event = event;
    event.response_to = Some(response_to.to_string());
    if let Ok(text) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
}
