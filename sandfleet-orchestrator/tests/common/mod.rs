// Common test utilities and fixtures
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use sandfleet_common::{AcquireCriteria, Machine, NewMachine};
use sandfleet_orchestrator::config::{AutoscaleConfig, FleetConfig};
use sandfleet_orchestrator::result_server::SharedResultPort;
use sandfleet_orchestrator::store::{InMemoryMachineStore, MachineStore};
use sandfleet_orchestrator::FleetController;
use sandfleet_providers::inventory::InstanceState;
use sandfleet_providers::mock::MockProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ZONE: &str = "eu-west-1a";
pub const SNAPSHOT: &str = "snap-base";
pub const RESULT_PORT: u16 = 2042;

/// Fast polling so lifecycle waits finish in a few ticks.
pub fn test_config() -> FleetConfig {
    FleetConfig {
        region: ZONE.to_string(),
        vm_state_timeout: Duration::from_secs(2),
        volume_step_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        resultserver_ip: Some("10.0.0.1".to_string()),
        ..Default::default()
    }
}

pub fn autoscale_config(gap: usize, limit: usize) -> FleetConfig {
    FleetConfig {
        running_machines_gap: gap,
        autoscale: AutoscaleConfig {
            enabled: true,
            dynamic_machines_limit: limit,
            image_id: "ami-sandbox".to_string(),
            instance_type: "t3.large".to_string(),
            subnet_id: "subnet-1".to_string(),
            security_groups: vec!["sg-1".to_string()],
            tags: vec!["x64".to_string()],
            ..Default::default()
        },
        ..test_config()
    }
}

/// Machine table whose inserts can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryMachineStore,
    pub fail_adds: AtomicBool,
}

impl FlakyStore {
    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MachineStore for FlakyStore {
    async fn list_machines(&self) -> Result<Vec<Machine>> {
        self.inner.list_machines().await
    }
    async fn get_available_machines(&self) -> Result<Vec<Machine>> {
        self.inner.get_available_machines().await
    }
    async fn count_machines_available(&self) -> Result<usize> {
        self.inner.count_machines_available().await
    }
    async fn add_machine(&self, machine: &NewMachine) -> Result<Machine> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection reset by peer"));
        }
        self.inner.add_machine(machine).await
    }
    async fn upsert_machine(&self, machine: &NewMachine) -> Result<Machine> {
        self.inner.upsert_machine(machine).await
    }
    async fn view_machine_by_label(&self, label: &str) -> Result<Option<Machine>> {
        self.inner.view_machine_by_label(label).await
    }
    async fn delete_machine(&self, label: &str) -> Result<bool> {
        self.inner.delete_machine(label).await
    }
    async fn lock_machine(&self, criteria: &AcquireCriteria) -> Result<Option<Machine>> {
        self.inner.lock_machine(criteria).await
    }
    async fn unlock_machine(&self, label: &str) -> Result<bool> {
        self.inner.unlock_machine(label).await
    }
    async fn set_machine_status(&self, label: &str, status: &str) -> Result<()> {
        self.inner.set_machine_status(label, status).await
    }
}

pub struct TestFleet {
    pub mock: Arc<MockProvider>,
    pub store: Arc<FlakyStore>,
    pub controller: Arc<FleetController>,
    pub result_port: Arc<SharedResultPort>,
}

pub fn create_test_fleet(config: FleetConfig) -> TestFleet {
    create_test_fleet_with(MockProvider::new(ZONE), config)
}

pub fn create_test_fleet_with(mock: MockProvider, config: FleetConfig) -> TestFleet {
    let mock = Arc::new(mock);
    let store = Arc::new(FlakyStore::default());
    let result_port = Arc::new(SharedResultPort::new(RESULT_PORT));
    let controller = Arc::new(FleetController::new(
        mock.clone(),
        store.clone(),
        result_port.clone(),
        config,
    ));
    TestFleet {
        mock,
        store,
        controller,
        result_port,
    }
}

/// Seed a static machine: a cloud instance with one boot volume plus its row.
pub async fn create_static_machine(fleet: &TestFleet, name: &str, state: InstanceState) -> String {
    let label = fleet.mock.add_instance(state, vec![], 1).await;
    fleet
        .store
        .add_machine(&NewMachine {
            name: name.to_string(),
            label: label.clone(),
            platform: "windows".to_string(),
            snapshot: Some(SNAPSHOT.to_string()),
            ..Default::default()
        })
        .await
        .expect("seed machine row");
    label
}

pub fn count_calls(calls: &[String], prefix: &str) -> usize {
    calls.iter().filter(|c| c.starts_with(prefix)).count()
}
