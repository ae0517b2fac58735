use crate::error::MachineResult;
use async_trait::async_trait;
use sandfleet_common::{AcquireCriteria, Machine, MachineState};

/// Lifecycle contract the task scheduler drives.
#[async_trait]
pub trait Machinery: Send + Sync {
    /// Reconcile with the cloud after a restart, then fill the ready gap.
    async fn initialize(&self) -> MachineResult<()>;

    /// Lock a machine matching `criteria`. `None` when nothing is free.
    async fn acquire(&self, criteria: &AcquireCriteria) -> MachineResult<Option<Machine>>;
    async fn release(&self, label: &str) -> MachineResult<()>;

    async fn start(&self, label: &str) -> MachineResult<()>;
    async fn stop(&self, label: &str) -> MachineResult<()>;

    async fn status(&self, label: &str) -> MachineState;
}
