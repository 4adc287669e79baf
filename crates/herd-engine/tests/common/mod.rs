//! Shared harness for multi-master scenario tests: runs M masters as
//! threads over an in-process fabric and hands each to a closure.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use herd_core::id::AgentLocalId;
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_agent::BehaviorTable;
use herd_fabric::{Fabric, LocalFabric};
use herd_engine::{Master, MasterConfig};
use herd_snapshot::AgentSeed;

/// Route warnings (dropped interactions, early-ended behaviors) into
/// the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Stand up an M-master cluster (seeds go to the root) and run `body`
/// on every master in its own thread, collecting the results in rank
/// order.
pub fn run_cluster<R>(
    masters: u32,
    threads: usize,
    registry: Arc<TypeRegistry>,
    behaviors: BehaviorTable,
    seeds: Vec<AgentSeed>,
    body: impl Fn(Master) -> R + Send + Sync + Clone + 'static,
) -> Vec<R>
where
    R: Send + 'static,
{
    init_tracing();
    let handles: Vec<_> = LocalFabric::cluster(masters)
        .into_iter()
        .map(|fabric| {
            let fabric = Arc::new(fabric.with_recv_timeout(Duration::from_secs(10)));
            let config = MasterConfig::new(Arc::clone(&registry), behaviors.clone(), threads);
            let seeds = if fabric.master_id().is_root() {
                seeds.clone()
            } else {
                Vec::new()
            };
            let body = body.clone();
            thread::spawn(move || {
                let master = Master::init(config, fabric, seeds).expect("master init");
                body(master)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// Seeds for `values.len()` agents of one type, with one i64 attribute
/// preset per agent.
pub fn seeds_i64(
    registry: &TypeRegistry,
    type_name: &str,
    attr: &str,
    values: &[i64],
) -> Vec<AgentSeed> {
    let ty = registry.agent_type_by_name(type_name).unwrap();
    let attr = registry.attr_by_name(ty, attr).unwrap();
    let descriptor = registry.field_descriptor(ty, attr);
    values
        .iter()
        .enumerate()
        .map(|(id, &v)| {
            let mut payload = registry.default_payload(ty);
            Value::I64(v)
                .encode_into(
                    descriptor.shape,
                    &mut payload[descriptor.offset as usize
                        ..(descriptor.offset + descriptor.size) as usize],
                )
                .unwrap();
            AgentSeed {
                ty,
                local_id: AgentLocalId(id as u64),
                payload,
            }
        })
        .collect()
}

/// Zeroed seeds for `count` agents of one type.
pub fn seeds_default(registry: &TypeRegistry, type_name: &str, count: u64) -> Vec<AgentSeed> {
    let ty = registry.agent_type_by_name(type_name).unwrap();
    (0..count)
        .map(|id| AgentSeed {
            ty,
            local_id: AgentLocalId(id),
            payload: registry.default_payload(ty),
        })
        .collect()
}

/// A unique temp-file path for snapshot tests.
pub fn temp_path(stem: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("herd-{}-{stem}-{n}", std::process::id()))
        .to_string_lossy()
        .into_owned()
}
