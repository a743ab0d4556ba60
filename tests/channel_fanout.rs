//! End-to-end: three agents register, one posts to a channel through the
//! threaded-messaging mod, the other two each receive exactly one
//! notification carrying the original text, the poster receives none.

use openagents::config::NetworkConfig;
use openagents::event::{Event, payload};
use openagents::mod_pipeline::ModPipeline;
use openagents::mods::ThreadMessagingMod;
use openagents::network::Network;
use openagents::time_provider::test_time_provider;
use openagents::types::SourceType;
use std::sync::Arc;

async fn build_network() -> Network {
    let workspace = tempfile::tempdir().unwrap().keep();
    let time = test_time_provider();
    let mut pipeline = ModPipeline::new();
    pipeline.register(Arc::new(ThreadMessagingMod::new(workspace.clone(), Arc::clone(&time))));

    let mut config = NetworkConfig::testing();
    config.workspace = workspace;
    config.mods = vec![openagents::config::ModConfig {
        id: "thread_messaging".to_string(),
        settings: serde_json::json!({}),
    }];

    let network = Network::new(config, pipeline, time).unwrap();
    network.start().await.unwrap();
    network
}

async fn register(network: &Network, agent_id: &str) {
    network
        .handle_inbound(
            Event::new("system.register", agent_id, SourceType::Agent).unwrap(),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn channel_post_fans_out_to_everyone_but_the_sender() {
    let network = build_network().await;
    for agent_id in ["a", "b", "c"] {
        register(&network, agent_id).await;
    }

    let post = Event::new("thread.channel_message.post", "a", SourceType::Agent)
        .unwrap()
        .with_destination("channel:general")
        .with_payload(payload([("text", serde_json::json!("hello"))]));
    let response = network.handle_inbound(post, None).await.unwrap();
    assert!(response.success);

    for (agent_id, expect_message) in [("a", false), ("b", true), ("c", true)] {
        let messages = network
            .agent_queues()
            .poll(
                &openagents::types::AgentId::try_new(agent_id).unwrap(),
                10,
                20,
            )
            .await
            .unwrap();
        if expect_message {
            assert_eq!(messages.len(), 1, "{agent_id} should receive one notification");
            assert_eq!(messages[0].source_id, "a");
            assert_eq!(
                messages[0].event_name,
                "thread.channel_message.notification"
            );
            assert_eq!(messages[0].payload["text"], "hello");
        } else {
            assert!(messages.is_empty(), "{agent_id} (the sender) should receive nothing");
        }
    }
}
