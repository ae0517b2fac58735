use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod list;

// --- Enums ---

/// Canonical view of a sandbox machine, independent of provider vocabulary.
/// Never stored: always recomputed from the provider-reported state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Pending,  // Power-on requested, booting
    Running,  // Powered on
    Poweroff, // Stopped, safe to restore
    Stopping, // Power-off in progress
    Error,    // Unknown or unreachable, never handed out
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Pending => "pending",
            MachineState::Running => "running",
            MachineState::Poweroff => "poweroff",
            MachineState::Stopping => "stopping",
            MachineState::Error => "error",
        }
    }

    /// Machines the capacity pass may power on without waiting.
    pub fn is_startable(&self) -> bool {
        matches!(self, MachineState::Poweroff | MachineState::Stopping)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Entities (SQLx Mapped) ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    /// Provider instance id. Unique across the table.
    pub label: String,
    pub ip: Option<String>,
    pub platform: String,
    pub options: Option<String>,
    #[sqlx(default)]
    pub tags: Vec<String>,
    pub interface: Option<String>,
    /// `None` marks an elastically created machine (nothing to restore).
    pub snapshot: Option<String>,
    pub resultserver_ip: Option<String>,
    pub resultserver_port: Option<i32>,
    pub locked: bool,
    pub locked_changed_on: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub status_changed_on: Option<DateTime<Utc>>,
}

impl Machine {
    pub fn is_dynamic(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn has_tags(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|t| self.tags.iter().any(|have| have == t))
    }
}

/// Insert payload for a machine row.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NewMachine {
    pub name: String,
    pub label: String,
    pub ip: Option<String>,
    pub platform: String,
    pub options: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub interface: Option<String>,
    pub snapshot: Option<String>,
    pub resultserver_ip: Option<String>,
    pub resultserver_port: Option<i32>,
}

/// Selection filter used by the scheduler when asking for a machine.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AcquireCriteria {
    /// Machine name (not label).
    pub machine_id: Option<String>,
    pub platform: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AcquireCriteria {
    pub fn matches(&self, machine: &Machine) -> bool {
        if let Some(name) = &self.machine_id {
            if &machine.name != name {
                return false;
            }
        }
        if let Some(platform) = &self.platform {
            if &machine.platform != platform {
                return false;
            }
        }
        machine.has_tags(&self.tags)
    }
}
