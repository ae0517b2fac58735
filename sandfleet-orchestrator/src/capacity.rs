//! Ready-gap maintenance: power on idle machines first, then grow the fleet.

use crate::controller::{FleetController, FleetState};
use crate::error::MachineResult;
use crate::state_probe;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    /// Upper bound on idle machines to power on.
    pub to_start: usize,
    /// Upper bound on elastic machines to create.
    pub to_allocate: usize,
}

pub fn plan(
    available: usize,
    gap: usize,
    autoscale: bool,
    dynamic_count: usize,
    limit: usize,
) -> CapacityPlan {
    let to_allocate = if autoscale && available < gap {
        (gap - available).min(limit.saturating_sub(dynamic_count))
    } else {
        0
    };
    CapacityPlan {
        to_start: available.min(gap),
        to_allocate,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapacityReport {
    pub available: usize,
    pub started: Vec<String>,
    pub allocated: Vec<String>,
    pub ceiling_reached: bool,
}

impl FleetController {
    /// One capacity pass under the controller lock.
    pub async fn start_or_create_machines(&self) -> MachineResult<CapacityReport> {
        let mut state = self.state.lock().await;
        self.capacity_pass(&mut state).await
    }

    pub(crate) async fn capacity_pass(&self, state: &mut FleetState) -> MachineResult<CapacityReport> {
        self.reconcile_dynamic_count(state).await;

        let mut available = self
            .store
            .count_machines_available()
            .await
            .map_err(crate::error::MachineError::Database)?;
        let gap = self.config.running_machines_gap;
        let limit = self.config.autoscale.dynamic_machines_limit;
        let planned = plan(
            available,
            gap,
            self.config.autoscale.enabled,
            state.dynamic_machines_count,
            limit,
        );
        tracing::debug!(
            "[capacity] available={} gap={} -> start<={} allocate<={}",
            available,
            gap,
            planned.to_start,
            planned.to_allocate
        );

        let mut report = CapacityReport {
            available,
            ..Default::default()
        };

        if planned.to_start > 0 {
            let candidates = self
                .store
                .get_available_machines()
                .await
                .map_err(crate::error::MachineError::Database)?;
            for machine in candidates {
                if report.started.len() >= planned.to_start {
                    break;
                }
                let Ok(handle) = state.registry.get(&machine.label) else {
                    tracing::debug!("[capacity] {} is not registered, skipping", machine.label);
                    continue;
                };
                if !state_probe::probe(&handle).await.is_startable() {
                    continue;
                }
                match handle.start().await {
                    Ok(()) => {
                        tracing::info!("[capacity] ▶️ powering on {} ({})", machine.name, machine.label);
                        report.started.push(machine.label.clone());
                    }
                    Err(e) => {
                        tracing::warn!("[capacity] start {} failed, skipping: {:#}", machine.label, e)
                    }
                }
            }
        }

        for _ in 0..planned.to_allocate {
            match self.allocate_new_machine(state).await {
                Ok(machine) => {
                    report.allocated.push(machine.label);
                    available += 1;
                }
                Err(e) => {
                    tracing::error!("[capacity] ❌ allocation failed: {}", e);
                    break;
                }
            }
        }
        if self.config.autoscale.enabled && available < gap && state.dynamic_machines_count >= limit {
            tracing::debug!("[capacity] reached dynamic machines limit ({})", limit);
            report.ceiling_reached = true;
        }

        if !report.started.is_empty() || !report.allocated.is_empty() {
            tracing::info!(
                "[capacity] available={} gap={} started={} allocated={} dynamic={}/{}",
                report.available,
                gap,
                report.started.len(),
                report.allocated.len(),
                state.dynamic_machines_count,
                limit
            );
        }
        Ok(report)
    }

    /// The counter must match the autoscale-tagged handles. On divergence the
    /// registry wins.
    async fn reconcile_dynamic_count(&self, state: &mut FleetState) {
        let derived = state.registry.count_autoscaled().await;
        if derived != state.dynamic_machines_count {
            tracing::warn!(
                "[capacity] dynamic machines counter {} disagrees with registry ({}), adopting registry",
                state.dynamic_machines_count,
                derived
            );
            state.dynamic_machines_count = derived;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_are_bounded_by_available_and_gap() {
        assert_eq!(plan(3, 2, false, 0, 0).to_start, 2);
        assert_eq!(plan(1, 4, false, 0, 0).to_start, 1);
        assert_eq!(plan(5, 0, true, 0, 9), CapacityPlan { to_start: 0, to_allocate: 0 });
    }

    #[test]
    fn allocation_respects_ceiling() {
        assert_eq!(plan(0, 3, true, 0, 1).to_allocate, 1);
        assert_eq!(plan(0, 3, true, 1, 1).to_allocate, 0);
        assert_eq!(plan(1, 3, true, 0, 5).to_allocate, 2);
        assert_eq!(plan(0, 3, false, 0, 5).to_allocate, 0);
        // counter above limit (limit lowered between runs) never underflows
        assert_eq!(plan(0, 3, true, 4, 2).to_allocate, 0);
    }
}
