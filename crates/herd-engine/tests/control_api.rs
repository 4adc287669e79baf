//! Order-level control scenarios: modify-attribute routing and period
//! changes across the order loop.

mod common;

use herd_core::error::ConfigError;
use herd_core::id::AgentLocalId;
use herd_core::value::Value;
use herd_engine::ControlError;
use herd_test_utils::counter_model;

use common::{run_cluster, seeds_i64};

#[test]
fn modify_attribute_reaches_the_owning_master() {
    let (registry, behaviors) = counter_model();
    let seeds = seeds_i64(&registry, "counter", "v", &[1, 1]);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        if master.master_id().is_root() {
            // Agent 1 lives on master 1; the value travels point-to-point.
            master
                .order_modify_attribute("counter", AgentLocalId(1), "v", &Value::I64(9))
                .unwrap();
            master.order_kill().unwrap();
            master.read_attribute("counter", AgentLocalId(0), "v")
        } else {
            master.wait_orders().unwrap();
            master.read_attribute("counter", AgentLocalId(1), "v")
        }
    });

    assert_eq!(results[0], Some(Value::I64(1)), "untargeted agent unchanged");
    assert_eq!(results[1], Some(Value::I64(9)), "owner applied the new value");
}

#[test]
fn modify_attribute_validates_before_broadcasting() {
    let (registry, behaviors) = counter_model();
    let seeds = seeds_i64(&registry, "counter", "v", &[1]);

    // Single master: validation failures must return without touching
    // the fabric, or a peerless broadcast mismatch would hang.
    let results = run_cluster(1, 1, registry, behaviors, seeds, |mut master| {
        let unknown_type = master
            .order_modify_attribute("ghost", AgentLocalId(0), "v", &Value::I64(2))
            .unwrap_err();
        let unknown_attr = master
            .order_modify_attribute("counter", AgentLocalId(0), "ghost", &Value::I64(2))
            .unwrap_err();
        let missing_agent = master
            .order_modify_attribute("counter", AgentLocalId(5), "v", &Value::I64(2))
            .unwrap_err();
        let untouched = master.read_attribute("counter", AgentLocalId(0), "v");
        (unknown_type, unknown_attr, missing_agent, untouched)
    });

    let (unknown_type, unknown_attr, missing_agent, untouched) = &results[0];
    assert!(matches!(
        unknown_type,
        ControlError::Config(ConfigError::UnknownAgentType { .. })
    ));
    assert!(matches!(
        unknown_attr,
        ControlError::Config(ConfigError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        missing_agent,
        ControlError::Config(ConfigError::InvalidArgument { .. })
    ));
    assert_eq!(*untouched, Some(Value::I64(1)));
}

#[test]
fn change_period_propagates_through_the_order_loop() {
    let (registry, behaviors) = counter_model();
    let seeds = seeds_i64(&registry, "counter", "v", &[1, 1]);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        if master.master_id().is_root() {
            master.order_change_period(4).unwrap();
            // One run order now advances four steps everywhere.
            master.order_run().unwrap();
            master.order_kill().unwrap();
        } else {
            master.wait_orders().unwrap();
        }
        (master.period(), master.time_step().0)
    });

    assert_eq!(results[0], (4, 4));
    assert_eq!(results[1], (4, 4));
}
