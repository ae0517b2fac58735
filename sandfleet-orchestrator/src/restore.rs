//! Boot volume swap for static machines.
//!
//! detach (forced) -> delete old -> create from snapshot -> attach. Each step
//! waits for the provider to settle and checks the terminal state. There are
//! no retries; a failure between delete and attach leaves the machine without
//! a boot volume until an operator intervenes.

use crate::config::FleetConfig;
use crate::error::{MachineError, MachineResult};
use crate::poll::poll_until;
use crate::registry::InstanceHandle;
use crate::state_probe;
use sandfleet_common::MachineState;
use sandfleet_providers::inventory::VolumeState;
use sandfleet_providers::CloudProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    pub old_volume: String,
    pub new_volume: String,
}

pub struct VolumeRestorer<'a> {
    provider: &'a dyn CloudProvider,
    config: &'a FleetConfig,
}

impl<'a> VolumeRestorer<'a> {
    pub fn new(provider: &'a dyn CloudProvider, config: &'a FleetConfig) -> Self {
        Self { provider, config }
    }

    pub async fn restore(
        &self,
        handle: &InstanceHandle,
        snapshot: Option<&str>,
    ) -> MachineResult<RestoreOutcome> {
        let label = handle.instance_id();

        let state = state_probe::probe(handle).await;
        if state != MachineState::Poweroff {
            return Err(MachineError::wrong_state(label, MachineState::Poweroff, state));
        }
        let volumes = handle
            .volumes()
            .await
            .map_err(|e| MachineError::cloud(format!("list volumes of {}", label), e))?;
        if volumes.len() != 1 {
            return Err(MachineError::InvariantViolation(format!(
                "instance '{}' has {} attached volumes, expected 1",
                label,
                volumes.len()
            )));
        }
        let snapshot = match snapshot.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => {
                return Err(MachineError::Configuration(format!(
                    "no snapshot configured for machine '{}'",
                    label
                )))
            }
        };
        let old = &volumes[0];
        tracing::info!(
            "[restore] {}: swapping volume {} for a copy of {}",
            label,
            old.volume_id,
            snapshot
        );

        handle
            .detach(&old.volume_id, true)
            .await
            .map_err(|e| MachineError::cloud(format!("detach {}", old.volume_id), e))?;
        let detached = self.wait_volume_leaves(&old.volume_id, VolumeState::InUse).await?;
        if detached != VolumeState::Available {
            tracing::error!(
                "[restore] {}: old volume {} is {} after detach, manual cleanup needed",
                label,
                old.volume_id,
                detached
            );
            return Err(unexpected(&old.volume_id, VolumeState::Available, &detached));
        }

        self.provider
            .delete_volume(&old.volume_id)
            .await
            .map_err(|e| MachineError::cloud(format!("delete {}", old.volume_id), e))?;
        tracing::debug!("[restore] {}: deleted old volume {}", label, old.volume_id);

        let zone = handle
            .availability_zone()
            .await
            .map_err(|e| MachineError::cloud(format!("describe {}", label), e))?;
        let created = self
            .provider
            .create_volume_from_snapshot(snapshot, &zone, &old.volume_type)
            .await
            .map_err(|e| MachineError::cloud(format!("create volume from {}", snapshot), e))?;
        let new_id = created.volume_id;

        match self.wait_volume_leaves(&new_id, VolumeState::Creating).await {
            Ok(VolumeState::Available) => {}
            Ok(other) => {
                self.discard(&new_id).await;
                return Err(unexpected(&new_id, VolumeState::Available, &other));
            }
            Err(e) => {
                self.discard(&new_id).await;
                return Err(e);
            }
        }

        if let Err(e) = handle.attach(&new_id, &self.config.boot_device).await {
            self.discard(&new_id).await;
            return Err(MachineError::cloud(format!("attach {}", new_id), e));
        }
        match self.wait_volume_leaves(&new_id, VolumeState::Available).await {
            Ok(VolumeState::InUse) => {}
            Ok(other) => {
                self.discard(&new_id).await;
                return Err(unexpected(&new_id, VolumeState::InUse, &other));
            }
            Err(e) => {
                self.discard(&new_id).await;
                return Err(e);
            }
        }

        tracing::info!(
            "[restore] ✅ {}: volume {} attached at {}",
            label,
            new_id,
            self.config.boot_device
        );
        Ok(RestoreOutcome {
            old_volume: old.volume_id.clone(),
            new_volume: new_id,
        })
    }

    /// Poll until the volume is no longer in `from`; returns the state it landed in.
    async fn wait_volume_leaves(
        &self,
        volume_id: &str,
        from: VolumeState,
    ) -> MachineResult<VolumeState> {
        let what = format!("volume {} to leave {}", volume_id, from);
        poll_until(
            self.config.poll_interval,
            self.config.volume_step_timeout,
            &what,
            || {
                let from = from.clone();
                async move {
                    let info = self
                        .provider
                        .describe_volume(volume_id)
                        .await
                        .map_err(|e| MachineError::cloud(format!("describe {}", volume_id), e))?;
                    Ok((info.state != from).then_some(info.state))
                }
            },
        )
        .await
    }

    async fn discard(&self, volume_id: &str) {
        match self.provider.delete_volume(volume_id).await {
            Ok(()) => tracing::warn!("[restore] deleted unusable volume {}", volume_id),
            Err(e) => tracing::error!(
                "[restore] could not delete unusable volume {}: {:#}",
                volume_id,
                e
            ),
        }
    }
}

fn unexpected(volume_id: &str, expected: VolumeState, actual: &VolumeState) -> MachineError {
    MachineError::UnexpectedState {
        resource: format!("volume {}", volume_id),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
