use anyhow::Result;
use async_trait::async_trait;

/// Control-plane operations the fleet controller needs from a cloud.
///
/// A provider instance is bound to one region/zone at construction time, so
/// none of the calls take a zone argument. Volume operations are asynchronous
/// on every real cloud: the calls return once the request is accepted and the
/// caller polls `describe_volume` for the terminal state.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Enumerate instances currently in one of `states`.
    async fn list_instances(
        &self,
        states: &[inventory::InstanceState],
    ) -> Result<Vec<inventory::InstanceInfo>>;

    /// Fresh view of a single instance. Errors if the instance no longer exists.
    async fn describe_instance(&self, instance_id: &str) -> Result<inventory::InstanceInfo>;

    async fn start_instance(&self, instance_id: &str) -> Result<()>;
    async fn stop_instance(&self, instance_id: &str, force: bool) -> Result<()>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    /// Launch one instance. The instance is powered on by the provider (or by
    /// the implementation right after creation).
    async fn create_instance(
        &self,
        request: &inventory::LaunchRequest,
    ) -> Result<inventory::InstanceInfo>;

    async fn list_attached_volumes(&self, instance_id: &str)
        -> Result<Vec<inventory::VolumeInfo>>;
    async fn describe_volume(&self, volume_id: &str) -> Result<inventory::VolumeInfo>;
    async fn detach_volume(&self, instance_id: &str, volume_id: &str, force: bool) -> Result<()>;
    async fn attach_volume(&self, instance_id: &str, volume_id: &str, device: &str) -> Result<()>;
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        availability_zone: &str,
        volume_type: &str,
    ) -> Result<inventory::VolumeInfo>;

    // Optional: turn off source/destination checking so the sandbox can route
    // traffic for the analysis network. Default is a no-op returning false.
    async fn disable_source_dest_check(&self, _instance_id: &str) -> Result<bool> {
        Ok(false)
    }
}

pub mod inventory {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Provider-side instance lifecycle, in EC2 vocabulary.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum InstanceState {
        Pending,
        Running,
        Stopping,
        Stopped,
        ShuttingDown,
        Terminated,
        Other(String),
    }

    impl InstanceState {
        pub fn parse(raw: &str) -> Self {
            match raw.trim().to_ascii_lowercase().as_str() {
                "pending" => InstanceState::Pending,
                "running" => InstanceState::Running,
                "stopping" => InstanceState::Stopping,
                "stopped" => InstanceState::Stopped,
                "shutting-down" => InstanceState::ShuttingDown,
                "terminated" => InstanceState::Terminated,
                other => InstanceState::Other(other.to_string()),
            }
        }

        pub fn as_str(&self) -> &str {
            match self {
                InstanceState::Pending => "pending",
                InstanceState::Running => "running",
                InstanceState::Stopping => "stopping",
                InstanceState::Stopped => "stopped",
                InstanceState::ShuttingDown => "shutting-down",
                InstanceState::Terminated => "terminated",
                InstanceState::Other(s) => s.as_str(),
            }
        }
    }

    impl fmt::Display for InstanceState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum VolumeState {
        Creating,
        Available,
        InUse,
        Deleting,
        Deleted,
        Error,
        Other(String),
    }

    impl VolumeState {
        pub fn parse(raw: &str) -> Self {
            match raw.trim().to_ascii_lowercase().as_str() {
                "creating" => VolumeState::Creating,
                "available" => VolumeState::Available,
                "in-use" | "in_use" => VolumeState::InUse,
                "deleting" => VolumeState::Deleting,
                "deleted" => VolumeState::Deleted,
                "error" => VolumeState::Error,
                other => VolumeState::Other(other.to_string()),
            }
        }

        pub fn as_str(&self) -> &str {
            match self {
                VolumeState::Creating => "creating",
                VolumeState::Available => "available",
                VolumeState::InUse => "in-use",
                VolumeState::Deleting => "deleting",
                VolumeState::Deleted => "deleted",
                VolumeState::Error => "error",
                VolumeState::Other(s) => s.as_str(),
            }
        }
    }

    impl fmt::Display for VolumeState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Tag {
        pub key: String,
        pub value: String,
    }

    impl Tag {
        pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                key: key.into(),
                value: value.into(),
            }
        }

        /// `KEY=value` form for providers whose tags are plain strings.
        pub fn to_flat(&self) -> String {
            format!("{}={}", self.key, self.value)
        }

        pub fn from_flat(raw: &str) -> Self {
            match raw.split_once('=') {
                Some((k, v)) => Tag::new(k.trim(), v.trim()),
                None => Tag::new(raw.trim(), ""),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct InstanceInfo {
        pub instance_id: String,
        pub state: InstanceState,
        pub private_ip: Option<String>,
        pub availability_zone: String,
        pub tags: Vec<Tag>,
    }

    impl InstanceInfo {
        pub fn tag(&self, key: &str) -> Option<&str> {
            self.tags
                .iter()
                .find(|t| t.key == key)
                .map(|t| t.value.as_str())
        }

        pub fn has_tag(&self, key: &str) -> bool {
            self.tags.iter().any(|t| t.key == key)
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct VolumeInfo {
        pub volume_id: String,
        pub state: VolumeState,
        pub volume_type: String,
        pub availability_zone: String,
        pub snapshot_id: Option<String>,
        /// Instance the volume is attached to, if any.
        pub attached_to: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct BlockDevice {
        pub device_name: String,
        pub volume_type: String,
        pub delete_on_termination: bool,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct LaunchRequest {
        pub image_id: String,
        pub instance_type: String,
        pub subnet_id: String,
        pub security_groups: Vec<String>,
        pub block_device: BlockDevice,
        pub tags: Vec<Tag>,
    }

    impl LaunchRequest {
        pub fn name(&self) -> Option<&str> {
            self.tags
                .iter()
                .find(|t| t.key == "Name")
                .map(|t| t.value.as_str())
        }
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "scaleway")]
pub mod scaleway;

#[cfg(test)]
mod tests {
    use super::inventory::*;

    #[test]
    fn instance_state_parsing_is_total() {
        assert_eq!(InstanceState::parse("Running"), InstanceState::Running);
        assert_eq!(InstanceState::parse("stopped"), InstanceState::Stopped);
        assert_eq!(
            InstanceState::parse("shutting-down"),
            InstanceState::ShuttingDown
        );
        assert_eq!(
            InstanceState::parse("hibernating"),
            InstanceState::Other("hibernating".to_string())
        );
        assert_eq!(InstanceState::parse("pending").as_str(), "pending");
    }

    #[test]
    fn volume_state_accepts_both_spellings() {
        assert_eq!(VolumeState::parse("in-use"), VolumeState::InUse);
        assert_eq!(VolumeState::parse("in_use"), VolumeState::InUse);
        assert_eq!(VolumeState::InUse.to_string(), "in-use");
        assert_eq!(
            VolumeState::parse("snapshotting"),
            VolumeState::Other("snapshotting".to_string())
        );
    }

    #[test]
    fn flat_tags() {
        let t = Tag::from_flat("AUTOSCALE_SANDFLEET=True");
        assert_eq!(t, Tag::new("AUTOSCALE_SANDFLEET", "True"));
        assert_eq!(t.to_flat(), "AUTOSCALE_SANDFLEET=True");
        assert_eq!(Tag::from_flat("bare"), Tag::new("bare", ""));
    }
}
