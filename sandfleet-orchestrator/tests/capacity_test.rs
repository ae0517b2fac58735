// Capacity controller and elastic allocation
mod common;

use common::{autoscale_config, count_calls, create_static_machine, create_test_fleet, test_config, RESULT_PORT};
use sandfleet_common::AcquireCriteria;
use sandfleet_orchestrator::config::AUTOSCALE_TAG;
use sandfleet_orchestrator::store::MachineStore;
use sandfleet_orchestrator::Machinery;
use sandfleet_providers::inventory::InstanceState;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::test]
async fn test_gap_two_starts_exactly_two_of_three() {
    let mut config = test_config();
    config.running_machines_gap = 2;
    let fleet = create_test_fleet(config);
    for name in ["win10-1", "win10-2", "win10-3"] {
        create_static_machine(&fleet, name, InstanceState::Stopped).await;
    }

    fleet.controller.initialize().await.unwrap();

    let calls = fleet.mock.calls().await;
    assert_eq!(count_calls(&calls, "start:"), 2, "{:?}", calls);
    assert_eq!(count_calls(&calls, "create_instance:"), 0);
}

#[tokio::test]
async fn test_gap_three_limit_one_allocates_exactly_one() {
    let fleet = create_test_fleet(autoscale_config(3, 1));

    fleet.controller.initialize().await.unwrap();

    assert_eq!(fleet.mock.launched_count().await, 1);
    assert_eq!(fleet.controller.dynamic_machines_count().await, 1);

    let rows = fleet.store.list_machines().await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.name, "sandfleet_autoscale_001");
    assert!(row.is_dynamic());
    assert_eq!(row.tags, vec!["x64".to_string()]);
    assert_eq!(row.resultserver_ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(row.resultserver_port, Some(i32::from(RESULT_PORT)));

    let info = fleet.mock.instance(&row.label).await.unwrap();
    assert_eq!(info.tag("Name"), Some("sandfleet_autoscale_001"));
    assert_eq!(info.tag(AUTOSCALE_TAG), Some("True"));
    let calls = fleet.mock.calls().await;
    assert!(calls.contains(&format!("source_dest_check:{}", row.label)));

    let report = fleet.controller.start_or_create_machines().await.unwrap();
    assert!(report.ceiling_reached);
    assert!(report.allocated.is_empty());
    assert_eq!(fleet.mock.launched_count().await, 1);
}

#[tokio::test]
async fn test_counter_stays_within_limit_across_acquire_release() {
    let limit = 2;
    let fleet = create_test_fleet(autoscale_config(1, limit));
    fleet.controller.initialize().await.unwrap();
    assert_eq!(fleet.controller.dynamic_machines_count().await, 1);

    let mut held = Vec::new();
    for _ in 0..4 {
        if let Some(m) = fleet.controller.acquire(&AcquireCriteria::default()).await.unwrap() {
            held.push(m.label);
        }
        assert!(fleet.controller.dynamic_machines_count().await <= limit);
    }
    assert_eq!(held.len(), 2);
    assert_eq!(fleet.mock.launched_count().await, 2);

    for label in &held {
        fleet.controller.release(label).await.unwrap();
        assert!(fleet.controller.dynamic_machines_count().await <= limit);
    }
    for _ in 0..3 {
        fleet.controller.acquire(&AcquireCriteria::default()).await.unwrap();
        assert!(fleet.controller.dynamic_machines_count().await <= limit);
    }
    assert_eq!(fleet.mock.launched_count().await, limit);
}

#[tokio::test]
async fn test_elastic_stop_tears_everything_down() {
    let fleet = create_test_fleet(autoscale_config(1, 3));
    fleet.controller.initialize().await.unwrap();
    let machine = fleet
        .controller
        .acquire(&AcquireCriteria::default())
        .await
        .unwrap()
        .unwrap();
    let before = fleet.controller.dynamic_machines_count().await;
    assert_eq!(before, 2);

    // elastic start is a no-op
    fleet.controller.start(&machine.label).await.unwrap();
    assert_eq!(count_calls(&fleet.mock.calls().await, "start:"), 0);

    fleet.controller.stop(&machine.label).await.unwrap();

    assert_eq!(fleet.controller.dynamic_machines_count().await, before - 1);
    assert!(!fleet
        .controller
        .registered_labels()
        .await
        .contains(&machine.label));
    assert!(fleet
        .store
        .view_machine_by_label(&machine.label)
        .await
        .unwrap()
        .is_none());
    let calls = fleet.mock.calls().await;
    assert!(calls.contains(&format!("terminate:{}", machine.label)));
    assert_eq!(
        fleet.mock.instance(&machine.label).await.unwrap().state,
        InstanceState::ShuttingDown
    );
}

#[tokio::test]
async fn test_launch_failure_leaves_counters_untouched() {
    let fleet = create_test_fleet(autoscale_config(1, 2));
    fleet.mock.fail_next_launches(1).await;

    fleet.controller.initialize().await.unwrap();

    assert_eq!(fleet.controller.dynamic_machines_count().await, 0);
    assert!(fleet.store.list_machines().await.unwrap().is_empty());

    let report = fleet.controller.start_or_create_machines().await.unwrap();
    assert_eq!(report.allocated.len(), 1);
    let rows = fleet.store.list_machines().await.unwrap();
    assert_eq!(rows[0].name, "sandfleet_autoscale_002");
}

#[tokio::test]
async fn test_failed_insert_terminates_new_instance() {
    let fleet = create_test_fleet(autoscale_config(1, 2));
    fleet.store.fail_adds(true);

    fleet.controller.initialize().await.unwrap();

    assert_eq!(fleet.mock.launched_count().await, 1);
    assert_eq!(count_calls(&fleet.mock.calls().await, "terminate:"), 1);
    assert_eq!(fleet.controller.dynamic_machines_count().await, 0);
    assert!(fleet.controller.registered_labels().await.is_empty());
    assert!(fleet.store.list_machines().await.unwrap().is_empty());

    fleet.store.fail_adds(false);
    let report = fleet.controller.start_or_create_machines().await.unwrap();
    assert_eq!(report.allocated.len(), 1);
    assert_eq!(fleet.controller.dynamic_machines_count().await, 1);
}

#[tokio::test]
async fn test_autoscale_off_never_allocates() {
    let mut config = test_config();
    config.running_machines_gap = 3;
    let fleet = create_test_fleet(config);

    fleet.controller.initialize().await.unwrap();
    let report = fleet.controller.start_or_create_machines().await.unwrap();

    assert!(report.allocated.is_empty());
    assert!(!report.ceiling_reached);
    assert_eq!(fleet.mock.launched_count().await, 0);
}

#[tokio::test]
async fn test_allocation_reads_live_result_port() {
    let fleet = create_test_fleet(autoscale_config(1, 2));
    fleet.controller.initialize().await.unwrap();
    let first = fleet.store.list_machines().await.unwrap().remove(0);
    assert_eq!(first.resultserver_port, Some(i32::from(RESULT_PORT)));

    fleet.result_port.set_port(3000);
    let acquired = fleet
        .controller
        .acquire(&AcquireCriteria::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acquired.label, first.label);

    let rows = fleet.store.list_machines().await.unwrap();
    assert_eq!(rows.len(), 2);
    let second = rows.iter().find(|m| m.label != first.label).unwrap();
    assert_eq!(second.name, "sandfleet_autoscale_002");
    assert_eq!(second.resultserver_port, Some(3000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_release_stop_respects_limit() {
    let limit = 3;
    let fleet = create_test_fleet(autoscale_config(1, limit));
    fleet.controller.initialize().await.unwrap();
    let held: Arc<Mutex<HashSet<String>>> = Arc::default();

    let mut tasks = Vec::new();
    for worker in 0..16usize {
        let controller = fleet.controller.clone();
        let held = held.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..6usize {
                let Some(machine) = controller.acquire(&AcquireCriteria::default()).await.unwrap() else {
                    tokio::task::yield_now().await;
                    continue;
                };
                assert!(
                    held.lock().await.insert(machine.label.clone()),
                    "{} handed out twice",
                    machine.label
                );
                assert!(controller.dynamic_machines_count().await <= limit);
                held.lock().await.remove(&machine.label);
                if (worker + round) % 2 == 0 {
                    controller.stop(&machine.label).await.unwrap();
                } else {
                    controller.release(&machine.label).await.unwrap();
                }
                assert!(controller.dynamic_machines_count().await <= limit);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let count = fleet.controller.dynamic_machines_count().await;
    assert!(count <= limit);
    let status = fleet.controller.fleet_status().await;
    assert_eq!(status.machines.iter().filter(|m| m.elastic).count(), count);
    let rows = fleet.store.list_machines().await.unwrap();
    assert_eq!(rows.iter().filter(|m| m.is_dynamic()).count(), count);
    let launched = fleet.mock.launched_count().await;
    let terminated = count_calls(&fleet.mock.calls().await, "terminate:");
    assert_eq!(launched - terminated, count);
}
