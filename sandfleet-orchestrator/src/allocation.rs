use crate::config::{AUTOSCALE_TAG, DEFAULT_BOOT_VOLUME_TYPE};
use crate::controller::{FleetController, FleetState};
use crate::error::{MachineError, MachineResult};
use sandfleet_common::{Machine, NewMachine};
use sandfleet_providers::inventory::{BlockDevice, LaunchRequest, Tag};

pub fn autoscale_name(sequence: usize) -> String {
    format!("sandfleet_autoscale_{:03}", sequence)
}

impl FleetController {
    fn launch_request(&self, name: &str) -> LaunchRequest {
        let autoscale = &self.config.autoscale;
        LaunchRequest {
            image_id: autoscale.image_id.clone(),
            instance_type: autoscale.instance_type.clone(),
            subnet_id: autoscale.subnet_id.clone(),
            security_groups: autoscale.security_groups.clone(),
            block_device: BlockDevice {
                device_name: self.config.boot_device.clone(),
                volume_type: DEFAULT_BOOT_VOLUME_TYPE.to_string(),
                delete_on_termination: true,
            },
            tags: vec![Tag::new("Name", name), Tag::new(AUTOSCALE_TAG, "True")],
        }
    }

    /// Create one elastic machine and persist it.
    ///
    /// Either every effect lands (instance, handle, row, counter) or none
    /// does. The sequence advances on every attempt so names are never reused.
    pub(crate) async fn allocate_new_machine(&self, state: &mut FleetState) -> MachineResult<Machine> {
        state.dynamic_machines_sequence += 1;
        let name = autoscale_name(state.dynamic_machines_sequence);
        tracing::info!("[allocation] all machines are busy, allocating new machine {}", name);

        let info = self
            .provider
            .create_instance(&self.launch_request(&name))
            .await
            .map_err(|e| MachineError::cloud(format!("create instance {}", name), e))?;
        let label = info.instance_id.clone();
        let ip = info.private_ip.clone();
        state.registry.insert(info);

        match self.provider.disable_source_dest_check(&label).await {
            Ok(true) => tracing::debug!("[allocation] source/dest check disabled on {}", label),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                "[allocation] could not disable source/dest check on {}: {:#}",
                label,
                e
            ),
        }

        let autoscale = &self.config.autoscale;
        let port = autoscale
            .resultserver_port
            .unwrap_or_else(|| self.result_server.current_port());
        let row = NewMachine {
            name: name.clone(),
            label: label.clone(),
            ip,
            platform: autoscale.platform.clone(),
            options: autoscale.options.clone(),
            tags: autoscale.tags.clone(),
            interface: self.config.autoscale_interface(),
            snapshot: None,
            resultserver_ip: self.config.autoscale_resultserver_ip(),
            resultserver_port: Some(i32::from(port)),
        };

        match self.store.add_machine(&row).await {
            Ok(machine) => {
                state.dynamic_machines_count += 1;
                tracing::info!(
                    "[allocation] ✅ {} is {} ({}/{} dynamic)",
                    name,
                    label,
                    state.dynamic_machines_count,
                    autoscale.dynamic_machines_limit
                );
                Ok(machine)
            }
            Err(e) => {
                tracing::error!(
                    "[allocation] ❌ could not record {} ({}), terminating it: {:#}",
                    name,
                    label,
                    e
                );
                if let Err(term) = self.provider.terminate_instance(&label).await {
                    tracing::error!("[allocation] terminate {} failed: {:#}", label, term);
                }
                state.registry.forget(&label);
                Err(MachineError::Database(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(autoscale_name(1), "sandfleet_autoscale_001");
        assert_eq!(autoscale_name(42), "sandfleet_autoscale_042");
        assert_eq!(autoscale_name(1234), "sandfleet_autoscale_1234");
    }
}
