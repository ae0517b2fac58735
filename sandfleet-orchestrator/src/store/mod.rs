//! Machine table access. The controller only talks to the `MachineStore`
//! trait; the scheduler's lock bookkeeping lives behind `lock_machine` /
//! `unlock_machine`.

use anyhow::Result;
use async_trait::async_trait;
use sandfleet_common::{AcquireCriteria, Machine, NewMachine};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryMachineStore;
pub use postgres::PgMachineStore;

#[async_trait]
pub trait MachineStore: Send + Sync {
    async fn list_machines(&self) -> Result<Vec<Machine>>;

    /// Unlocked machines, oldest first.
    async fn get_available_machines(&self) -> Result<Vec<Machine>>;
    async fn count_machines_available(&self) -> Result<usize>;

    async fn add_machine(&self, machine: &NewMachine) -> Result<Machine>;

    /// Insert or refresh a row keyed by label. Keeps the lock state.
    async fn upsert_machine(&self, machine: &NewMachine) -> Result<Machine>;

    async fn view_machine_by_label(&self, label: &str) -> Result<Option<Machine>>;

    /// Delete in its own transaction. Returns false when no row matched.
    async fn delete_machine(&self, label: &str) -> Result<bool>;

    /// Claim the first unlocked machine matching `criteria`.
    async fn lock_machine(&self, criteria: &AcquireCriteria) -> Result<Option<Machine>>;
    async fn unlock_machine(&self, label: &str) -> Result<bool>;

    async fn set_machine_status(&self, label: &str, status: &str) -> Result<()>;
}
