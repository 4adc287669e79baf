//! Front-end protocol scenarios: the command session on the root, the
//! peer control loop, and the implicit run latch.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use herd_core::value::Value;
use herd_engine::control::{queue_name, run_token, ControlQueue, ControlSession};
use herd_engine::{peer_main, MasterConfig};
use herd_fabric::LocalFabric;
use herd_snapshot::document;
use herd_test_utils::counter_model;

use common::temp_path;

const POPULATION: &str = r#"{
    "agent_types": [ { "type": "counter", "number": 2, "default_values": { "v": 1 } } ]
}"#;

fn exported_counter_values(path: &str) -> Vec<i64> {
    let doc = document::read_document(path).unwrap();
    match doc.field("agents").and_then(|a| a.field("counter")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.field("attributes")?.field("v")?.as_i64())
            .collect(),
        other => panic!("expected counter array, got {other:?}"),
    }
}

/// Spawn a two-process cluster: the root serves the control session,
/// the peer runs the outer control loop.
fn spawn_cluster(token: &str) -> (thread::JoinHandle<()>, thread::JoinHandle<()>) {
    let (registry, behaviors) = counter_model();
    let config = MasterConfig::new(registry, behaviors, 1);
    let mut fabrics = LocalFabric::cluster(2).into_iter();
    let root = Arc::new(fabrics.next().unwrap().with_recv_timeout(Duration::from_secs(10)));
    let peer = Arc::new(fabrics.next().unwrap().with_recv_timeout(Duration::from_secs(10)));

    let session = {
        let config = config.clone();
        let token = token.to_string();
        thread::spawn(move || {
            let mut session = ControlSession::new(config, root, &token);
            session.listen().unwrap();
        })
    };
    let peer = thread::spawn(move || {
        peer_main(config, peer).unwrap();
    });
    (session, peer)
}

#[test]
fn scripted_session_runs_and_exports() {
    let population_path = temp_path("population.json");
    std::fs::write(&population_path, POPULATION).unwrap();
    let export_path = temp_path("export.json");

    let token = run_token();
    let queue = ControlQueue::create(&queue_name(&token));
    // Preload the whole script; the session drains it in order.
    queue.send(&format!("init {population_path}"));
    queue.send("run 2");
    queue.send("set_period 3");
    queue.send("run 1");
    queue.send(&format!("export_json {export_path}"));
    queue.send("kill");
    queue.send("quit");

    let (session, peer) = spawn_cluster(&token);
    session.join().unwrap();
    peer.join().unwrap();

    // 2 batches of 1 step, then 1 batch of 3: five steps of doubling.
    assert_eq!(exported_counter_values(&export_path), vec![32, 32]);

    let _ = std::fs::remove_file(&population_path);
    let _ = std::fs::remove_file(&export_path);
}

#[test]
fn bare_run_loops_until_paused() {
    let population_path = temp_path("population.json");
    std::fs::write(&population_path, POPULATION).unwrap();
    let export_path = temp_path("export.json");

    let token = run_token();
    let queue = ControlQueue::create(&queue_name(&token));
    let (session, peer) = spawn_cluster(&token);

    queue.send(&format!("init {population_path}"));
    queue.send("run");
    thread::sleep(Duration::from_millis(200));
    queue.send("pause");
    queue.send(&format!("export_json {export_path}"));
    queue.send("quit");
    session.join().unwrap();
    peer.join().unwrap();

    let values = exported_counter_values(&export_path);
    assert_eq!(values.len(), 2);
    assert_eq!(values[0], values[1]);
    // v = 2^steps; the latch ran at least one batch while we slept.
    assert!(values[0] >= 2, "run latch executed no steps");
    assert_eq!(values[0] & (values[0] - 1), 0, "trajectory must stay a power of two");

    let _ = std::fs::remove_file(&population_path);
    let _ = std::fs::remove_file(&export_path);
}

#[test]
fn invalid_commands_leave_the_session_unharmed() {
    let (registry, behaviors) = counter_model();
    let config = MasterConfig::new(registry, behaviors, 1);
    let fabric = Arc::new(LocalFabric::cluster(1).into_iter().next().unwrap());

    let token = run_token();
    let queue = ControlQueue::create(&queue_name(&token));
    queue.send("bogus");
    queue.send("run");
    queue.send("set_period 5");
    queue.send("run 2 extra");
    queue.send("init");
    queue.send("run notanumber");
    queue.send("run 1");
    queue.send("quit");

    let mut session = ControlSession::new(config, fabric, &token);
    session.listen().unwrap();
}
