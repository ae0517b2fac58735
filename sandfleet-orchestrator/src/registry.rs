//! Label -> live instance handle map.

use crate::config::AUTOSCALE_TAG;
use crate::error::{MachineError, MachineResult};
use sandfleet_providers::inventory::{InstanceInfo, VolumeInfo};
use sandfleet_providers::CloudProvider;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reference to one cloud instance with its last described view.
///
/// Clones share the cached view, so a `reload` through any clone is seen by
/// all of them.
#[derive(Clone)]
pub struct InstanceHandle {
    instance_id: String,
    provider: Arc<dyn CloudProvider>,
    cached: Arc<RwLock<Option<InstanceInfo>>>,
}

impl InstanceHandle {
    pub fn new(instance_id: &str, provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            provider,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Seed the cache with a view already fetched by the caller.
    pub fn with_info(info: InstanceInfo, provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            instance_id: info.instance_id.clone(),
            provider,
            cached: Arc::new(RwLock::new(Some(info))),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn reload(&self) -> anyhow::Result<InstanceInfo> {
        let info = self.provider.describe_instance(&self.instance_id).await?;
        *self.cached.write().await = Some(info.clone());
        Ok(info)
    }

    pub async fn cached(&self) -> Option<InstanceInfo> {
        self.cached.read().await.clone()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.provider.start_instance(&self.instance_id).await
    }

    pub async fn stop(&self, force: bool) -> anyhow::Result<()> {
        self.provider.stop_instance(&self.instance_id, force).await
    }

    pub async fn terminate(&self) -> anyhow::Result<()> {
        self.provider.terminate_instance(&self.instance_id).await
    }

    pub async fn volumes(&self) -> anyhow::Result<Vec<VolumeInfo>> {
        self.provider.list_attached_volumes(&self.instance_id).await
    }

    pub async fn detach(&self, volume_id: &str, force: bool) -> anyhow::Result<()> {
        self.provider
            .detach_volume(&self.instance_id, volume_id, force)
            .await
    }

    pub async fn attach(&self, volume_id: &str, device: &str) -> anyhow::Result<()> {
        self.provider
            .attach_volume(&self.instance_id, volume_id, device)
            .await
    }

    pub async fn availability_zone(&self) -> anyhow::Result<String> {
        if let Some(info) = self.cached().await {
            return Ok(info.availability_zone);
        }
        Ok(self.reload().await?.availability_zone)
    }

    /// Tag read from the cached view. Tags are fixed at creation, so the cache
    /// never goes stale for this.
    pub async fn is_autoscaled(&self) -> bool {
        self.cached
            .read()
            .await
            .as_ref()
            .map(|i| i.has_tag(AUTOSCALE_TAG))
            .unwrap_or(false)
    }
}

pub struct InstanceRegistry {
    provider: Arc<dyn CloudProvider>,
    handles: BTreeMap<String, InstanceHandle>,
}

impl InstanceRegistry {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            handles: BTreeMap::new(),
        }
    }

    /// Bind a handle to `label` and fill its cache. Re-registering replaces the
    /// previous handle.
    pub async fn register(&mut self, label: &str) -> MachineResult<InstanceHandle> {
        let handle = InstanceHandle::new(label, self.provider.clone());
        handle
            .reload()
            .await
            .map_err(|e| MachineError::cloud(format!("describe {}", label), e))?;
        self.handles.insert(label.to_string(), handle.clone());
        Ok(handle)
    }

    /// Register from a view the caller already has (listing or launch result).
    pub fn insert(&mut self, info: InstanceInfo) -> InstanceHandle {
        let label = info.instance_id.clone();
        let handle = InstanceHandle::with_info(info, self.provider.clone());
        self.handles.insert(label, handle.clone());
        handle
    }

    pub fn get(&self, label: &str) -> MachineResult<InstanceHandle> {
        self.handles
            .get(label)
            .cloned()
            .ok_or_else(|| MachineError::NotFound {
                label: label.to_string(),
            })
    }

    pub fn forget(&mut self, label: &str) -> Option<InstanceHandle> {
        self.handles.remove(label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub async fn count_autoscaled(&self) -> usize {
        let mut n = 0;
        for handle in self.handles.values() {
            if handle.is_autoscaled().await {
                n += 1;
            }
        }
        n
    }
}
