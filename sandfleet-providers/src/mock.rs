use crate::inventory::{
    InstanceInfo, InstanceState, LaunchRequest, Tag, VolumeInfo, VolumeState,
};
use crate::CloudProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tokio::sync::Mutex;

struct MockInstance {
    info: InstanceInfo,
    pending: VecDeque<InstanceState>,
    volumes: Vec<String>,
}

struct MockVolume {
    info: VolumeInfo,
    pending: VecDeque<VolumeState>,
    delete_on_termination: bool,
}

#[derive(Default)]
struct MockState {
    instances: BTreeMap<String, MockInstance>,
    volumes: BTreeMap<String, MockVolume>,
    deleted_volumes: Vec<String>,
    broken_snapshots: HashSet<String>,
    jammed_detach: HashSet<String>,
    unreachable_instances: HashSet<String>,
    fail_next_attach: bool,
    failing_launches: usize,
    launched: usize,
    next_ip: u8,
    calls: Vec<String>,
}

/// In-memory provider emulating EC2-style asynchronous state transitions.
///
/// Every state change is applied lazily: an action records the target state
/// and each subsequent `describe_*` call advances one step, after
/// `transition_delay` unchanged reads. Faults can be injected per snapshot,
/// per volume or per instance.
pub struct MockProvider {
    zone: String,
    transition_delay: usize,
    state: Mutex<MockState>,
}

fn short_id() -> String {
    uuid::Uuid::new_v4()
        .to_string()
        .replace('-', "")
        .chars()
        .take(17)
        .collect()
}

fn schedule<S: Clone>(queue: &mut VecDeque<S>, current: &S, target: S, delay: usize) {
    queue.clear();
    for _ in 0..delay {
        queue.push_back(current.clone());
    }
    queue.push_back(target);
}

impl MockProvider {
    pub fn new(zone: &str) -> Self {
        Self {
            zone: zone.to_string(),
            transition_delay: 0,
            state: Mutex::new(MockState {
                next_ip: 10,
                ..Default::default()
            }),
        }
    }

    /// Number of unchanged reads before a pending transition lands.
    pub fn with_transition_delay(mut self, reads: usize) -> Self {
        self.transition_delay = reads;
        self
    }

    fn new_volume(&self, volume_type: &str, snapshot_id: Option<&str>, state: VolumeState) -> MockVolume {
        MockVolume {
            info: VolumeInfo {
                volume_id: format!("vol-{}", short_id()),
                state,
                volume_type: volume_type.to_string(),
                availability_zone: self.zone.clone(),
                snapshot_id: snapshot_id.map(|s| s.to_string()),
                attached_to: None,
            },
            pending: VecDeque::new(),
            delete_on_termination: false,
        }
    }

    /// Seed a pre-existing instance with `volume_count` attached gp2 volumes.
    pub async fn add_instance(&self, state: InstanceState, tags: Vec<Tag>, volume_count: usize) -> String {
        let mut st = self.state.lock().await;
        let instance_id = format!("i-{}", short_id());
        let ip = format!("10.0.0.{}", st.next_ip);
        st.next_ip = st.next_ip.wrapping_add(1);

        let mut volumes = Vec::new();
        for _ in 0..volume_count {
            let mut vol = self.new_volume("gp2", None, VolumeState::InUse);
            vol.info.attached_to = Some(instance_id.clone());
            volumes.push(vol.info.volume_id.clone());
            st.volumes.insert(vol.info.volume_id.clone(), vol);
        }

        st.instances.insert(
            instance_id.clone(),
            MockInstance {
                info: InstanceInfo {
                    instance_id: instance_id.clone(),
                    state,
                    private_ip: Some(ip),
                    availability_zone: self.zone.clone(),
                    tags,
                },
                pending: VecDeque::new(),
                volumes,
            },
        );
        instance_id
    }

    /// Volumes created from this snapshot end in `error` instead of `available`.
    pub async fn break_snapshot(&self, snapshot_id: &str) {
        self.state
            .lock()
            .await
            .broken_snapshots
            .insert(snapshot_id.to_string());
    }

    /// Detaching this volume leaves it in `error`.
    pub async fn jam_detach(&self, volume_id: &str) {
        self.state
            .lock()
            .await
            .jammed_detach
            .insert(volume_id.to_string());
    }

    /// The next attach ends in `error` instead of `in-use`.
    pub async fn fail_next_attach(&self) {
        self.state.lock().await.fail_next_attach = true;
    }

    /// The next `count` launches are rejected.
    pub async fn fail_next_launches(&self, count: usize) {
        self.state.lock().await.failing_launches = count;
    }

    /// `describe_instance` on this instance errors until cleared.
    pub async fn set_unreachable(&self, instance_id: &str, unreachable: bool) {
        let mut st = self.state.lock().await;
        if unreachable {
            st.unreachable_instances.insert(instance_id.to_string());
        } else {
            st.unreachable_instances.remove(instance_id);
        }
    }

    /// Current view without advancing pending transitions.
    pub async fn instance(&self, instance_id: &str) -> Option<InstanceInfo> {
        let st = self.state.lock().await;
        st.instances.get(instance_id).map(|i| i.info.clone())
    }

    pub async fn volume(&self, volume_id: &str) -> Option<VolumeInfo> {
        let st = self.state.lock().await;
        st.volumes.get(volume_id).map(|v| v.info.clone())
    }

    pub async fn attached_volume_ids(&self, instance_id: &str) -> Vec<String> {
        let st = self.state.lock().await;
        st.instances
            .get(instance_id)
            .map(|i| i.volumes.clone())
            .unwrap_or_default()
    }

    pub async fn deleted_volumes(&self) -> Vec<String> {
        self.state.lock().await.deleted_volumes.clone()
    }

    pub async fn volume_count(&self) -> usize {
        self.state.lock().await.volumes.len()
    }

    pub async fn launched_count(&self) -> usize {
        self.state.lock().await.launched
    }

    /// Mutating calls received so far, as `action:target` strings.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn list_instances(&self, states: &[InstanceState]) -> Result<Vec<InstanceInfo>> {
        let st = self.state.lock().await;
        Ok(st
            .instances
            .values()
            .filter(|i| states.contains(&i.info.state))
            .map(|i| i.info.clone())
            .collect())
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo> {
        let mut st = self.state.lock().await;
        if st.unreachable_instances.contains(instance_id) {
            return Err(anyhow::anyhow!(
                "MockProvider: describe {} timed out",
                instance_id
            ));
        }
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        if let Some(next) = inst.pending.pop_front() {
            inst.info.state = next;
        }
        Ok(inst.info.clone())
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls.push(format!("start:{}", instance_id));
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        match inst.info.state {
            InstanceState::Running | InstanceState::Pending => Ok(()),
            InstanceState::ShuttingDown | InstanceState::Terminated => Err(anyhow::anyhow!(
                "MockProvider: cannot start {} in state {}",
                instance_id,
                inst.info.state
            )),
            _ => {
                inst.info.state = InstanceState::Pending;
                schedule(&mut inst.pending, &InstanceState::Pending, InstanceState::Running, delay);
                Ok(())
            }
        }
    }

    async fn stop_instance(&self, instance_id: &str, force: bool) -> Result<()> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls.push(format!("stop:{}:force={}", instance_id, force));
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        match inst.info.state {
            InstanceState::Stopped => Ok(()),
            InstanceState::ShuttingDown | InstanceState::Terminated => Err(anyhow::anyhow!(
                "MockProvider: cannot stop {} in state {}",
                instance_id,
                inst.info.state
            )),
            _ => {
                inst.info.state = InstanceState::Stopping;
                schedule(&mut inst.pending, &InstanceState::Stopping, InstanceState::Stopped, delay);
                Ok(())
            }
        }
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls.push(format!("terminate:{}", instance_id));
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        inst.info.state = InstanceState::ShuttingDown;
        schedule(
            &mut inst.pending,
            &InstanceState::ShuttingDown,
            InstanceState::Terminated,
            delay,
        );
        let attached = std::mem::take(&mut inst.volumes);

        for volume_id in attached {
            let remove = st
                .volumes
                .get(&volume_id)
                .map(|v| v.delete_on_termination)
                .unwrap_or(false);
            if remove {
                st.volumes.remove(&volume_id);
                st.deleted_volumes.push(volume_id);
            } else if let Some(v) = st.volumes.get_mut(&volume_id) {
                v.info.attached_to = None;
                v.info.state = VolumeState::Available;
            }
        }
        Ok(())
    }

    async fn create_instance(&self, request: &LaunchRequest) -> Result<InstanceInfo> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls.push(format!(
            "create_instance:{}",
            request.name().unwrap_or("unnamed")
        ));
        if st.failing_launches > 0 {
            st.failing_launches -= 1;
            return Err(anyhow::anyhow!(
                "MockProvider: InsufficientInstanceCapacity for {}",
                request.instance_type
            ));
        }

        let instance_id = format!("i-{}", short_id());
        let ip = format!("10.0.1.{}", st.next_ip);
        st.next_ip = st.next_ip.wrapping_add(1);
        st.launched += 1;

        let mut boot = self.new_volume(&request.block_device.volume_type, None, VolumeState::InUse);
        boot.info.attached_to = Some(instance_id.clone());
        boot.delete_on_termination = request.block_device.delete_on_termination;
        let boot_id = boot.info.volume_id.clone();
        st.volumes.insert(boot_id.clone(), boot);

        let mut pending = VecDeque::new();
        schedule(&mut pending, &InstanceState::Pending, InstanceState::Running, delay);
        let info = InstanceInfo {
            instance_id: instance_id.clone(),
            state: InstanceState::Pending,
            private_ip: Some(ip),
            availability_zone: self.zone.clone(),
            tags: request.tags.clone(),
        };
        st.instances.insert(
            instance_id,
            MockInstance {
                info: info.clone(),
                pending,
                volumes: vec![boot_id],
            },
        );
        Ok(info)
    }

    async fn list_attached_volumes(&self, instance_id: &str) -> Result<Vec<VolumeInfo>> {
        let st = self.state.lock().await;
        let inst = st
            .instances
            .get(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        Ok(inst
            .volumes
            .iter()
            .filter_map(|id| st.volumes.get(id).map(|v| v.info.clone()))
            .collect())
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<VolumeInfo> {
        let mut st = self.state.lock().await;
        let vol = st
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: volume {} not found", volume_id))?;
        if let Some(next) = vol.pending.pop_front() {
            vol.info.state = next;
        }
        Ok(vol.info.clone())
    }

    async fn detach_volume(&self, instance_id: &str, volume_id: &str, force: bool) -> Result<()> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls
            .push(format!("detach:{}:{}:force={}", instance_id, volume_id, force));
        let jammed = st.jammed_detach.contains(volume_id);
        let inst = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: instance {} not found", instance_id))?;
        let pos = inst
            .volumes
            .iter()
            .position(|v| v == volume_id)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "MockProvider: volume {} is not attached to {}",
                    volume_id,
                    instance_id
                )
            })?;
        inst.volumes.remove(pos);

        let vol = st
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: volume {} not found", volume_id))?;
        vol.info.attached_to = None;
        let target = if jammed {
            VolumeState::Error
        } else {
            VolumeState::Available
        };
        schedule(&mut vol.pending, &VolumeState::InUse, target, delay);
        Ok(())
    }

    async fn attach_volume(&self, instance_id: &str, volume_id: &str, device: &str) -> Result<()> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls
            .push(format!("attach:{}:{}:{}", instance_id, volume_id, device));
        let fail = std::mem::take(&mut st.fail_next_attach);
        if !st.instances.contains_key(instance_id) {
            return Err(anyhow::anyhow!(
                "MockProvider: instance {} not found",
                instance_id
            ));
        }
        let vol = st
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: volume {} not found", volume_id))?;
        if vol.info.state != VolumeState::Available || vol.info.attached_to.is_some() {
            return Err(anyhow::anyhow!(
                "MockProvider: volume {} is {} and cannot be attached",
                volume_id,
                vol.info.state
            ));
        }
        vol.info.attached_to = Some(instance_id.to_string());
        let target = if fail {
            VolumeState::Error
        } else {
            VolumeState::InUse
        };
        schedule(&mut vol.pending, &VolumeState::Available, target, delay);
        if let Some(inst) = st.instances.get_mut(instance_id) {
            inst.volumes.push(volume_id.to_string());
        }
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.calls.push(format!("delete_volume:{}", volume_id));
        let state = st
            .volumes
            .get(volume_id)
            .map(|v| v.info.state.clone())
            .ok_or_else(|| anyhow::anyhow!("MockProvider: volume {} not found", volume_id))?;
        if state == VolumeState::InUse {
            return Err(anyhow::anyhow!(
                "MockProvider: VolumeInUse: {} is still attached",
                volume_id
            ));
        }
        st.volumes.remove(volume_id);
        for inst in st.instances.values_mut() {
            inst.volumes.retain(|v| v != volume_id);
        }
        st.deleted_volumes.push(volume_id.to_string());
        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        availability_zone: &str,
        volume_type: &str,
    ) -> Result<VolumeInfo> {
        let delay = self.transition_delay;
        let mut st = self.state.lock().await;
        st.calls.push(format!("create_volume:{}", snapshot_id));
        let broken = st.broken_snapshots.contains(snapshot_id);

        let mut vol = self.new_volume(volume_type, Some(snapshot_id), VolumeState::Creating);
        vol.info.availability_zone = availability_zone.to_string();
        let target = if broken {
            VolumeState::Error
        } else {
            VolumeState::Available
        };
        schedule(&mut vol.pending, &VolumeState::Creating, target, delay);
        let info = vol.info.clone();
        st.volumes.insert(info.volume_id.clone(), vol);
        Ok(info)
    }

    async fn disable_source_dest_check(&self, instance_id: &str) -> Result<bool> {
        let mut st = self.state.lock().await;
        st.calls.push(format!("source_dest_check:{}", instance_id));
        Ok(st.instances.contains_key(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::BlockDevice;

    fn launch(name: &str) -> LaunchRequest {
        LaunchRequest {
            image_id: "ami-1".into(),
            instance_type: "t3.medium".into(),
            subnet_id: "subnet-1".into(),
            security_groups: vec!["sg-1".into()],
            block_device: BlockDevice {
                device_name: "/dev/sda1".into(),
                volume_type: "gp2".into(),
                delete_on_termination: true,
            },
            tags: vec![Tag::new("Name", name)],
        }
    }

    #[tokio::test]
    async fn stop_lands_after_configured_reads() {
        let mock = MockProvider::new("eu-west-1a").with_transition_delay(2);
        let id = mock.add_instance(InstanceState::Running, vec![], 1).await;

        mock.stop_instance(&id, true).await.unwrap();
        assert_eq!(mock.describe_instance(&id).await.unwrap().state, InstanceState::Stopping);
        assert_eq!(mock.describe_instance(&id).await.unwrap().state, InstanceState::Stopping);
        assert_eq!(mock.describe_instance(&id).await.unwrap().state, InstanceState::Stopped);
        assert_eq!(mock.describe_instance(&id).await.unwrap().state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn volume_swap_lifecycle() {
        let mock = MockProvider::new("eu-west-1a");
        let id = mock.add_instance(InstanceState::Stopped, vec![], 1).await;
        let old = mock.attached_volume_ids(&id).await.remove(0);

        assert!(mock.delete_volume(&old).await.is_err(), "in-use volume must not be deleted");

        mock.detach_volume(&id, &old, true).await.unwrap();
        assert_eq!(mock.describe_volume(&old).await.unwrap().state, VolumeState::Available);
        mock.delete_volume(&old).await.unwrap();

        let new = mock
            .create_volume_from_snapshot("snap-1", "eu-west-1a", "gp2")
            .await
            .unwrap();
        assert_eq!(new.state, VolumeState::Creating);
        assert_eq!(
            mock.describe_volume(&new.volume_id).await.unwrap().state,
            VolumeState::Available
        );
        mock.attach_volume(&id, &new.volume_id, "/dev/sda1").await.unwrap();
        assert_eq!(
            mock.describe_volume(&new.volume_id).await.unwrap().state,
            VolumeState::InUse
        );
        assert_eq!(mock.attached_volume_ids(&id).await, vec![new.volume_id]);
        assert_eq!(mock.deleted_volumes().await, vec![old]);
    }

    #[tokio::test]
    async fn broken_snapshot_ends_in_error() {
        let mock = MockProvider::new("eu-west-1a");
        mock.break_snapshot("snap-bad").await;
        let vol = mock
            .create_volume_from_snapshot("snap-bad", "eu-west-1a", "gp2")
            .await
            .unwrap();
        assert_eq!(
            mock.describe_volume(&vol.volume_id).await.unwrap().state,
            VolumeState::Error
        );
    }

    #[tokio::test]
    async fn launch_failures_and_termination() {
        let mock = MockProvider::new("eu-west-1a");
        mock.fail_next_launches(1).await;
        assert!(mock.create_instance(&launch("a")).await.is_err());
        assert_eq!(mock.launched_count().await, 0);

        let info = mock.create_instance(&launch("b")).await.unwrap();
        assert_eq!(info.tag("Name"), Some("b"));
        assert_eq!(
            mock.describe_instance(&info.instance_id).await.unwrap().state,
            InstanceState::Running
        );

        mock.terminate_instance(&info.instance_id).await.unwrap();
        assert_eq!(
            mock.describe_instance(&info.instance_id).await.unwrap().state,
            InstanceState::Terminated
        );
        assert_eq!(mock.volume_count().await, 0, "boot volume is delete-on-termination");
        let listed = mock
            .list_instances(&[InstanceState::Running, InstanceState::Stopped])
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
