use super::MachineStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sandfleet_common::{AcquireCriteria, Machine, NewMachine};
use tokio::sync::Mutex;

#[derive(Default)]
struct Rows {
    next_id: i64,
    machines: Vec<Machine>,
}

/// Process-local machine table. Used when no `DATABASE_URL` is configured,
/// and by tests.
#[derive(Default)]
pub struct InMemoryMachineStore {
    rows: Mutex<Rows>,
}

fn to_row(id: i64, m: &NewMachine) -> Machine {
    Machine {
        id,
        name: m.name.clone(),
        label: m.label.clone(),
        ip: m.ip.clone(),
        platform: m.platform.clone(),
        options: m.options.clone(),
        tags: m.tags.clone(),
        interface: m.interface.clone(),
        snapshot: m.snapshot.clone(),
        resultserver_ip: m.resultserver_ip.clone(),
        resultserver_port: m.resultserver_port,
        locked: false,
        locked_changed_on: None,
        status: None,
        status_changed_on: None,
    }
}

impl InMemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineStore for InMemoryMachineStore {
    async fn list_machines(&self) -> Result<Vec<Machine>> {
        Ok(self.rows.lock().await.machines.clone())
    }

    async fn get_available_machines(&self) -> Result<Vec<Machine>> {
        let rows = self.rows.lock().await;
        Ok(rows.machines.iter().filter(|m| !m.locked).cloned().collect())
    }

    async fn count_machines_available(&self) -> Result<usize> {
        let rows = self.rows.lock().await;
        Ok(rows.machines.iter().filter(|m| !m.locked).count())
    }

    async fn add_machine(&self, machine: &NewMachine) -> Result<Machine> {
        let mut rows = self.rows.lock().await;
        if rows.machines.iter().any(|m| m.label == machine.label) {
            return Err(anyhow::anyhow!(
                "duplicate key value violates unique constraint on label '{}'",
                machine.label
            ));
        }
        rows.next_id += 1;
        let row = to_row(rows.next_id, machine);
        rows.machines.push(row.clone());
        Ok(row)
    }

    async fn upsert_machine(&self, machine: &NewMachine) -> Result<Machine> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows.machines.iter_mut().find(|m| m.label == machine.label) {
            let mut row = to_row(existing.id, machine);
            row.locked = existing.locked;
            row.locked_changed_on = existing.locked_changed_on;
            row.status = existing.status.take();
            row.status_changed_on = existing.status_changed_on;
            *existing = row.clone();
            return Ok(row);
        }
        rows.next_id += 1;
        let row = to_row(rows.next_id, machine);
        rows.machines.push(row.clone());
        Ok(row)
    }

    async fn view_machine_by_label(&self, label: &str) -> Result<Option<Machine>> {
        let rows = self.rows.lock().await;
        Ok(rows.machines.iter().find(|m| m.label == label).cloned())
    }

    async fn delete_machine(&self, label: &str) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        let before = rows.machines.len();
        rows.machines.retain(|m| m.label != label);
        Ok(rows.machines.len() != before)
    }

    async fn lock_machine(&self, criteria: &AcquireCriteria) -> Result<Option<Machine>> {
        let mut rows = self.rows.lock().await;
        match rows
            .machines
            .iter_mut()
            .find(|m| !m.locked && criteria.matches(m))
        {
            Some(m) => {
                m.locked = true;
                m.locked_changed_on = Some(Utc::now());
                Ok(Some(m.clone()))
            }
            None => Ok(None),
        }
    }

    async fn unlock_machine(&self, label: &str) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.machines.iter_mut().find(|m| m.label == label) {
            Some(m) => {
                m.locked = false;
                m.locked_changed_on = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_machine_status(&self, label: &str, status: &str) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(m) = rows.machines.iter_mut().find(|m| m.label == label) {
            m.status = Some(status.to_string());
            m.status_changed_on = Some(Utc::now());
        }
        Ok(())
    }
}
