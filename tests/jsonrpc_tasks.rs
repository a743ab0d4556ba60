//! End-to-end: the JSON-RPC transport turns `message/send` into a completed
//! task; `tasks/cancel` on an already-terminal task errors.

use openagents::config::NetworkConfig;
use openagents::mod_pipeline::ModPipeline;
use openagents::network::Network;
use openagents::time_provider::test_time_provider;
use openagents::transports::jsonrpc;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn spawn_jsonrpc_network() -> String {
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
    let app = jsonrpc::router(network);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn call(client: &reqwest::Client, base_url: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
    client
        .post(base_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn message_send_completes_then_cancel_on_terminal_task_errors() {
    let base_url = spawn_jsonrpc_network().await;
    let client = reqwest::Client::new();

    let sent = call(
        &client,
        &base_url,
        "message/send",
        json!({ "message": { "parts": [{ "text": "hello there" }] } }),
    )
    .await;
    let task_id = sent["result"]["id"].as_str().unwrap().to_string();

    let fetched = call(&client, &base_url, "tasks/get", json!({ "id": task_id })).await;
    assert_eq!(fetched["result"]["state"], "completed");

    let canceled = call(&client, &base_url, "tasks/cancel", json!({ "id": task_id })).await;
    assert_eq!(canceled["error"]["code"], -32002);
}

#[tokio::test]
async fn agent_card_lists_name_and_protocol_version() {
    let base_url = spawn_jsonrpc_network().await;
    let client = reqwest::Client::new();
    let card: serde_json::Value = client
        .get(format!("{base_url}/.well-known/agent.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card["name"], "openagents-test");
    assert_eq!(card["protocol_version"], "0.3");
}
