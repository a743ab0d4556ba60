//! End-to-end: two agents register over the HTTP long-poll transport, one
//! sends the other a direct message, the recipient's next poll sees it and
//! exactly it.

use openagents::config::NetworkConfig;
use openagents::mod_pipeline::ModPipeline;
use openagents::network::Network;
use openagents::time_provider::test_time_provider;
use openagents::transports::http_poll;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn spawn_http_network() -> (Arc<Network>, String) {
    let network = Network::new(
        NetworkConfig::testing(),
        ModPipeline::new(),
        test_time_provider(),
    )
    .unwrap();
    network.start().await.unwrap();
    let network = Arc::new(network);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = http_poll::router(Arc::clone(&network), None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (network, format!("http://{addr}"))
}

#[tokio::test]
async fn dm_round_trip_via_http() {
    let (_network, base_url) = spawn_http_network().await;
    let client = reqwest::Client::new();

    for agent_id in ["alice", "bob"] {
        let response = client
            .post(format!("{base_url}/api/register"))
            .json(&json!({ "agent_id": agent_id }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
    }

    let send_response = client
        .post(format!("{base_url}/api/send_event"))
        .json(&json!({
            "event_id": uuid::Uuid::new_v4().to_string(),
            "event_name": "agent.message",
            "source_id": "alice",
            "source_type": "agent",
            "destination_id": "agent:bob",
            "payload": { "text": "hi" },
        }))
        .send()
        .await
        .unwrap();
    let send_body: serde_json::Value = send_response.json().await.unwrap();
    assert_eq!(send_body["success"], true);

    let poll_response = client
        .get(format!("{base_url}/api/poll"))
        .query(&[("agent_id", "bob"), ("wait_ms", "50"), ("max", "10")])
        .send()
        .await
        .unwrap();
    let poll_body: serde_json::Value = poll_response.json().await.unwrap();
    let messages = poll_body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["source_id"], "alice");
    assert_eq!(messages[0]["payload"]["text"], "hi");

    let second_poll = client
        .get(format!("{base_url}/api/poll"))
        .query(&[("agent_id", "bob"), ("wait_ms", "50"), ("max", "10")])
        .send()
        .await
        .unwrap();
    let second_body: serde_json::Value = second_poll.json().await.unwrap();
    assert!(second_body["messages"].as_array().unwrap().is_empty());
}
