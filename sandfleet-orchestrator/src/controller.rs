//! Fleet controller: the `Machinery` implementation backed by a cloud
//! provider and the machine table.
//!
//! All mutable controller state sits behind one `tokio::sync::Mutex`.
//! Allocation, elastic teardown and capacity passes run under it; static
//! start/stop only take it long enough to look up the handle.

use crate::config::FleetConfig;
use crate::error::{MachineError, MachineResult};
use crate::machinery::Machinery;
use crate::poll::poll_until;
use crate::registry::{InstanceHandle, InstanceRegistry};
use crate::restore::VolumeRestorer;
use crate::result_server::ResultServer;
use crate::state_probe;
use crate::store::MachineStore;
use async_trait::async_trait;
use sandfleet_common::{AcquireCriteria, Machine, MachineState};
use sandfleet_providers::inventory::InstanceState;
use sandfleet_providers::CloudProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct FleetState {
    pub registry: InstanceRegistry,
    pub dynamic_machines_count: usize,
    pub dynamic_machines_sequence: usize,
}

pub struct FleetController {
    pub(crate) provider: Arc<dyn CloudProvider>,
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) result_server: Arc<dyn ResultServer>,
    pub(crate) config: FleetConfig,
    pub(crate) state: Mutex<FleetState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineStatus {
    pub label: String,
    pub state: MachineState,
    pub elastic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub running_machines_gap: usize,
    pub autoscale: bool,
    pub dynamic_machines_limit: usize,
    pub dynamic_machines_count: usize,
    pub machines: Vec<MachineStatus>,
}

impl FleetController {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn MachineStore>,
        result_server: Arc<dyn ResultServer>,
        config: FleetConfig,
    ) -> Self {
        let registry = InstanceRegistry::new(provider.clone());
        Self {
            provider,
            store,
            result_server,
            config,
            state: Mutex::new(FleetState {
                registry,
                dynamic_machines_count: 0,
                dynamic_machines_sequence: 0,
            }),
        }
    }

    pub async fn dynamic_machines_count(&self) -> usize {
        self.state.lock().await.dynamic_machines_count
    }

    pub async fn registered_labels(&self) -> Vec<String> {
        self.state.lock().await.registry.labels()
    }

    pub async fn fleet_status(&self) -> FleetStatus {
        let (handles, count) = {
            let state = self.state.lock().await;
            let handles: Vec<InstanceHandle> = state
                .registry
                .labels()
                .iter()
                .filter_map(|l| state.registry.get(l).ok())
                .collect();
            (handles, state.dynamic_machines_count)
        };
        let mut machines = Vec::with_capacity(handles.len());
        for handle in handles {
            machines.push(MachineStatus {
                label: handle.instance_id().to_string(),
                state: state_probe::probe(&handle).await,
                elastic: handle.is_autoscaled().await,
            });
        }
        FleetStatus {
            running_machines_gap: self.config.running_machines_gap,
            autoscale: self.config.autoscale.enabled,
            dynamic_machines_limit: self.config.autoscale.dynamic_machines_limit,
            dynamic_machines_count: count,
            machines,
        }
    }

    async fn handle(&self, label: &str) -> MachineResult<InstanceHandle> {
        self.state.lock().await.registry.get(label)
    }

    /// Block until the machine reports `target`. An `Error` reading ends the
    /// wait immediately.
    async fn wait_status(&self, handle: &InstanceHandle, target: MachineState) -> MachineResult<()> {
        let label = handle.instance_id();
        let what = format!("{} to reach {}", label, target);
        poll_until(
            self.config.poll_interval,
            self.config.vm_state_timeout,
            &what,
            || async move {
                match state_probe::probe(handle).await {
                    s if s == target => Ok(Some(())),
                    MachineState::Error => Err(MachineError::UnexpectedState {
                        resource: format!("instance {}", label),
                        expected: target.to_string(),
                        actual: MachineState::Error.to_string(),
                    }),
                    _ => Ok(None),
                }
            },
        )
        .await
    }

    async fn record_status(&self, label: &str, state: MachineState) {
        if let Err(e) = self.store.set_machine_status(label, state.as_str()).await {
            tracing::warn!("[controller] could not record status of {}: {:#}", label, e);
        }
    }

    async fn run_capacity_logged(&self, after: &str) {
        if let Err(e) = self.start_or_create_machines().await {
            tracing::error!("[capacity] ❌ pass after {} failed: {}", after, e);
        }
    }

    async fn teardown_elastic(&self, state: &mut FleetState, handle: &InstanceHandle) -> MachineResult<()> {
        let label = handle.instance_id().to_string();
        handle
            .terminate()
            .await
            .map_err(|e| MachineError::cloud(format!("terminate {}", label), e))?;
        state.registry.forget(&label);

        // The cloud side is already gone; a failed delete is swept at next start.
        match self.store.delete_machine(&label).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("[controller] no machine row for elastic {}", label),
            Err(e) => tracing::error!("[controller] ❌ delete row of {} failed: {:#}", label, e),
        }
        state.dynamic_machines_count = state.dynamic_machines_count.saturating_sub(1);
        tracing::info!(
            "[controller] 🗑️ terminated elastic machine {} ({} dynamic left)",
            label,
            state.dynamic_machines_count
        );
        Ok(())
    }

    async fn stop_static(&self, handle: &InstanceHandle) -> MachineResult<()> {
        let label = handle.instance_id();
        handle
            .stop(true)
            .await
            .map_err(|e| MachineError::cloud(format!("stop {}", label), e))?;
        self.wait_status(handle, MachineState::Poweroff).await?;

        let snapshot = self
            .store
            .view_machine_by_label(label)
            .await
            .map_err(MachineError::Database)?
            .and_then(|m| m.snapshot);
        let outcome = VolumeRestorer::new(self.provider.as_ref(), &self.config)
            .restore(handle, snapshot.as_deref())
            .await?;
        tracing::info!(
            "[controller] {} restored ({} -> {})",
            label,
            outcome.old_volume,
            outcome.new_volume
        );
        self.record_status(label, MachineState::Poweroff).await;
        Ok(())
    }
}

#[async_trait]
impl Machinery for FleetController {
    async fn initialize(&self) -> MachineResult<()> {
        let mut state = self.state.lock().await;
        state.registry.clear();
        state.dynamic_machines_count = 0;
        state.dynamic_machines_sequence = 0;

        let live = self
            .provider
            .list_instances(&[
                InstanceState::Running,
                InstanceState::Stopped,
                InstanceState::Stopping,
            ])
            .await
            .map_err(|e| MachineError::cloud("list instances", e))?;

        let mut by_label = HashMap::new();
        for info in live {
            if info.has_tag(crate::config::AUTOSCALE_TAG) {
                tracing::info!("[registry] 🧹 terminating orphan elastic instance {}", info.instance_id);
                if let Err(e) = self.provider.terminate_instance(&info.instance_id).await {
                    tracing::error!("[registry] terminate orphan {} failed: {:#}", info.instance_id, e);
                }
                continue;
            }
            by_label.insert(info.instance_id.clone(), info);
        }

        let machines = self.store.list_machines().await.map_err(MachineError::Database)?;
        let mut to_stop = Vec::new();
        for machine in machines {
            if machine.is_dynamic() {
                tracing::info!("[registry] removing stale dynamic record {} ({})", machine.name, machine.label);
                if let Err(e) = self.store.delete_machine(&machine.label).await {
                    tracing::error!("[registry] delete {} failed: {:#}", machine.label, e);
                }
                continue;
            }
            let Some(info) = by_label.remove(&machine.label) else {
                tracing::warn!(
                    "[registry] ⚠️ machine {} ({}) has no live instance, skipping",
                    machine.name,
                    machine.label
                );
                continue;
            };
            let current = state_probe::canonical_state(&info.state);
            state.registry.insert(info);
            if current != MachineState::Poweroff {
                to_stop.push(machine.label.clone());
            }
        }
        tracing::info!("[registry] {} static machine(s) registered", state.registry.len());
        drop(state);

        // A machine whose disk was not restored must never reach the capacity pass.
        for label in to_stop {
            if let Err(e) = self.stop(&label).await {
                tracing::error!("[registry] ❌ could not stop {} during startup: {}", label, e);
                return Err(e);
            }
        }

        let report = self.start_or_create_machines().await?;
        tracing::info!(
            "[registry] initialized: available={} started={} allocated={}",
            report.available,
            report.started.len(),
            report.allocated.len()
        );
        Ok(())
    }

    async fn acquire(&self, criteria: &AcquireCriteria) -> MachineResult<Option<Machine>> {
        let machine = self
            .store
            .lock_machine(criteria)
            .await
            .map_err(MachineError::Database)?;
        match &machine {
            Some(m) => tracing::info!("[controller] 🔒 acquired {} ({})", m.name, m.label),
            None => tracing::debug!("[controller] no machine matches {:?}", criteria),
        }
        self.run_capacity_logged("acquire").await;
        Ok(machine)
    }

    async fn release(&self, label: &str) -> MachineResult<()> {
        let found = self
            .store
            .unlock_machine(label)
            .await
            .map_err(MachineError::Database)?;
        if !found {
            return Err(MachineError::NotFound {
                label: label.to_string(),
            });
        }
        tracing::info!("[controller] 🔓 released {}", label);
        self.run_capacity_logged("release").await;
        Ok(())
    }

    async fn start(&self, label: &str) -> MachineResult<()> {
        let handle = self.handle(label).await?;
        if handle.is_autoscaled().await {
            tracing::debug!("[controller] {} is elastic and already booted", label);
            return Ok(());
        }
        handle
            .start()
            .await
            .map_err(|e| MachineError::cloud(format!("start {}", label), e))?;
        self.wait_status(&handle, MachineState::Running).await?;
        self.record_status(label, MachineState::Running).await;
        Ok(())
    }

    async fn stop(&self, label: &str) -> MachineResult<()> {
        let mut state = self.state.lock().await;
        let handle = state.registry.get(label)?;
        if handle.is_autoscaled().await {
            if state_probe::probe(&handle).await == MachineState::Poweroff {
                return Err(MachineError::already_stopped(label));
            }
            return self.teardown_elastic(&mut state, &handle).await;
        }
        drop(state);

        if state_probe::probe(&handle).await == MachineState::Poweroff {
            return Err(MachineError::already_stopped(label));
        }
        self.stop_static(&handle).await
    }

    async fn status(&self, label: &str) -> MachineState {
        match self.handle(label).await {
            Ok(handle) => state_probe::probe(&handle).await,
            Err(_) => MachineState::Error,
        }
    }
}
