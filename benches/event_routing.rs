//! Event routing throughput benchmarks: direct messages, channel fan-out,
//! and topology registration at increasing agent counts.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use openagents::agent_queue::AgentQueues;
use openagents::event::{Event, payload};
use openagents::mod_pipeline::ModPipeline;
use openagents::router::Router;
use openagents::time_provider::test_time_provider;
use openagents::topology::{TransportBinding, Topology};
use openagents::types::{AgentId, SourceType};
use std::collections::{HashMap, HashSet};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_router(agent_count: usize) -> (Arc<Topology>, Arc<AgentQueues>, Router) {
    let topology = Arc::new(Topology::new());
    let pipeline = Arc::new(ModPipeline::new());
    let queues = Arc::new(AgentQueues::new(1000, test_time_provider()));
    for i in 0..agent_count {
        let agent_id = AgentId::try_new(format!("agent-{i}")).unwrap();
        topology.register_agent(
            agent_id.clone(),
            HashMap::new(),
            HashSet::new(),
            TransportBinding::HttpPoll,
            0,
            false,
        );
        queues.open(agent_id);
    }
    let router = Router::new(
        Arc::clone(&topology),
        pipeline,
        Arc::clone(&queues),
        test_time_provider(),
    );
    (topology, queues, router)
}

fn bench_direct_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("direct_message");
    group.throughput(Throughput::Elements(1));
    group.bench_function("route_single_dm", |b| {
        b.to_async(&rt).iter(|| async {
            let (_topology, _queues, router) = build_router(2);
            let event = Event::new("agent.message", "agent-0", SourceType::Agent)
                .unwrap()
                .with_destination("agent:agent-1")
                .with_payload(payload([("text", serde_json::json!("hi"))]));
            let response = router.route(event, None).await;
            black_box(response)
        });
    });
    group.finish();
}

fn bench_channel_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("channel_fanout");
    for agent_count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(agent_count as u64));
        group.bench_with_input(
            BenchmarkId::new("route_to_channel", agent_count),
            &agent_count,
            |b, &agent_count| {
                b.to_async(&rt).iter(|| async {
                    let (_topology, _queues, router) = build_router(agent_count);
                    let event = Event::new("agent.message", "agent-0", SourceType::Agent)
                        .unwrap()
                        .with_destination("channel:general")
                        .with_payload(payload([("text", serde_json::json!("hi"))]));
                    let response = router.route(event, None).await;
                    black_box(response)
                });
            },
        );
    }
    group.finish();
}

fn bench_agent_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology");
    group.bench_function("register_agent", |b| {
        b.iter(|| {
            let topology = Topology::new();
            let agent_id = AgentId::try_new("agent-0").unwrap();
            let outcome = topology.register_agent(
                agent_id,
                HashMap::new(),
                HashSet::new(),
                TransportBinding::HttpPoll,
                0,
                false,
            );
            black_box(outcome)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_direct_message,
    bench_channel_fanout,
    bench_agent_registration
);
criterion_main!(benches);
