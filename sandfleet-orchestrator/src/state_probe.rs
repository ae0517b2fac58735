use crate::registry::{InstanceHandle, InstanceRegistry};
use sandfleet_common::MachineState;
use sandfleet_providers::inventory::InstanceState;

pub fn canonical_state(state: &InstanceState) -> MachineState {
    match state {
        InstanceState::Running => MachineState::Running,
        InstanceState::Stopped => MachineState::Poweroff,
        InstanceState::Pending => MachineState::Pending,
        InstanceState::Stopping => MachineState::Stopping,
        _ => MachineState::Error,
    }
}

/// Refresh the handle and map its state. Never fails: any cloud error reads
/// as `Error`.
pub async fn probe(handle: &InstanceHandle) -> MachineState {
    match handle.reload().await {
        Ok(info) => canonical_state(&info.state),
        Err(e) => {
            tracing::warn!(
                "[probe] describe {} failed, reporting error state: {:#}",
                handle.instance_id(),
                e
            );
            MachineState::Error
        }
    }
}

pub async fn probe_label(registry: &InstanceRegistry, label: &str) -> MachineState {
    match registry.get(label) {
        Ok(handle) => probe(&handle).await,
        Err(_) => MachineState::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandfleet_providers::mock::MockProvider;
    use std::sync::Arc;

    #[test]
    fn mapping_is_fixed() {
        assert_eq!(canonical_state(&InstanceState::Running), MachineState::Running);
        assert_eq!(canonical_state(&InstanceState::Stopped), MachineState::Poweroff);
        assert_eq!(canonical_state(&InstanceState::Pending), MachineState::Pending);
        assert_eq!(canonical_state(&InstanceState::Stopping), MachineState::Stopping);
        assert_eq!(canonical_state(&InstanceState::ShuttingDown), MachineState::Error);
        assert_eq!(canonical_state(&InstanceState::Terminated), MachineState::Error);
        assert_eq!(
            canonical_state(&InstanceState::Other("rebooting".into())),
            MachineState::Error
        );
    }

    #[tokio::test]
    async fn probe_degrades_to_error() {
        let mock = Arc::new(MockProvider::new("eu-west-1a"));
        let id = mock.add_instance(InstanceState::Running, vec![], 1).await;
        let mut registry = InstanceRegistry::new(mock.clone());
        registry.register(&id).await.unwrap();

        assert_eq!(probe_label(&registry, &id).await, MachineState::Running);
        mock.set_unreachable(&id, true).await;
        assert_eq!(probe_label(&registry, &id).await, MachineState::Error);
        assert_eq!(probe_label(&registry, "i-unknown").await, MachineState::Error);
    }
}
