//! Interaction-exchange scenarios: the ring relay and the
//! missing-recipient drop policy.

mod common;

use herd_core::id::AgentLocalId;
use herd_core::value::Value;
use herd_test_utils::{chatter_model, relay_model};

use common::{run_cluster, seeds_default};

/// Six agents in a ring across three masters, each forwarding every
/// newly seen origin id to its successor. After N steps every agent has
/// seen all N ids — per-channel FIFO and global completeness.
#[test]
fn ring_floods_every_origin_to_every_agent() {
    const N: u64 = 6;
    let (registry, behaviors) = relay_model();
    let seeds = seeds_default(&registry, "relay", N);

    let results = run_cluster(3, 2, registry, behaviors, seeds, |mut master| {
        master.run(N).unwrap();
        // Collect each owned agent's seen-mask.
        (0..N)
            .filter_map(|id| match master.read_attribute("relay", AgentLocalId(id), "seen") {
                Some(Value::U64(mask)) => Some((id, mask)),
                _ => None,
            })
            .collect::<Vec<_>>()
    });

    let full = (1u64 << N) - 1;
    let mut covered = 0;
    for per_master in &results {
        for &(id, mask) in per_master {
            assert_eq!(mask, full, "agent {id} saw {mask:#b}, expected {full:#b}");
            covered += 1;
        }
    }
    assert_eq!(covered, N, "every agent owned exactly once");
}

/// An interaction whose recipient never existed is dropped with a
/// warning: the step completes and no agent observes any side effect.
#[test]
fn missing_recipient_drops_without_side_effects() {
    let (registry, behaviors) = chatter_model(AgentLocalId(99));
    let seeds = seeds_default(&registry, "chatter", 2);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        master.run(3).unwrap();
        let me = master.master_id().0 as u64;
        (
            master.time_step().0,
            master.read_attribute("chatter", AgentLocalId(me), "v"),
            master.store().len(),
        )
    });

    for (step, v, owned) in results {
        assert_eq!(step, 3, "the step completes");
        assert_eq!(v, Some(Value::I64(0)), "no side effect on other agents");
        assert_eq!(owned, 1);
    }
}
