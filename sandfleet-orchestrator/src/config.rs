//! Controller settings, read from the process environment.
//!
//! A `.env` file is loaded by the binary before `FleetConfig::from_env` runs.
//! The static machine inventory lives in a separate TOML file (`MACHINES_FILE`).

use crate::error::{MachineError, MachineResult};
use sandfleet_common::list::{parse_comma_list, parse_flag};
use sandfleet_common::NewMachine;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const AUTOSCALE_TAG: &str = "AUTOSCALE_SANDFLEET";
pub const DEFAULT_BOOT_DEVICE: &str = "/dev/sda1";
pub const DEFAULT_BOOT_VOLUME_TYPE: &str = "gp2";

#[derive(Debug, Clone, PartialEq)]
pub struct AutoscaleConfig {
    pub enabled: bool,
    pub dynamic_machines_limit: usize,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_groups: Vec<String>,
    pub platform: String,
    pub options: Option<String>,
    pub tags: Vec<String>,
    pub interface: Option<String>,
    pub resultserver_ip: Option<String>,
    pub resultserver_port: Option<u16>,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dynamic_machines_limit: 0,
            image_id: String::new(),
            instance_type: String::new(),
            subnet_id: String::new(),
            security_groups: Vec::new(),
            platform: "windows".to_string(),
            options: None,
            tags: Vec::new(),
            interface: None,
            resultserver_ip: None,
            resultserver_port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    pub region: String,
    pub running_machines_gap: usize,
    /// General machinery interface, used when autoscale has none.
    pub interface: Option<String>,
    pub resultserver_ip: Option<String>,
    pub vm_state_timeout: Duration,
    pub volume_step_timeout: Duration,
    pub poll_interval: Duration,
    pub boot_device: String,
    pub autoscale: AutoscaleConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1a".to_string(),
            running_machines_gap: 0,
            interface: None,
            resultserver_ip: None,
            vm_state_timeout: Duration::from_secs(60),
            volume_step_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1000),
            boot_device: DEFAULT_BOOT_DEVICE.to_string(),
            autoscale: AutoscaleConfig::default(),
        }
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> MachineResult<T> {
    match non_empty(vars, key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            MachineError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str) -> MachineResult<bool> {
    let raw = vars.get(key).map(|s| s.as_str()).unwrap_or("");
    parse_flag(raw)
        .ok_or_else(|| MachineError::Configuration(format!("{} must be a boolean, got '{}'", key, raw)))
}

impl FleetConfig {
    pub fn from_env() -> MachineResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build from an explicit variable map. Unknown keys are ignored.
    pub fn from_vars(vars: &HashMap<String, String>) -> MachineResult<Self> {
        let defaults = FleetConfig::default();

        let autoscale = AutoscaleConfig {
            enabled: parse_bool(vars, "AUTOSCALE")?,
            dynamic_machines_limit: parse_num(vars, "DYNAMIC_MACHINES_LIMIT", 0)?,
            image_id: non_empty(vars, "AUTOSCALE_IMAGE_ID").unwrap_or_default(),
            instance_type: non_empty(vars, "AUTOSCALE_INSTANCE_TYPE").unwrap_or_default(),
            subnet_id: non_empty(vars, "AUTOSCALE_SUBNET_ID").unwrap_or_default(),
            security_groups: parse_comma_list(vars.get("AUTOSCALE_SECURITY_GROUPS").map(|s| s.as_str())),
            platform: non_empty(vars, "AUTOSCALE_PLATFORM")
                .unwrap_or_else(|| AutoscaleConfig::default().platform),
            options: non_empty(vars, "AUTOSCALE_OPTIONS"),
            tags: parse_comma_list(vars.get("AUTOSCALE_TAGS").map(|s| s.as_str())),
            interface: non_empty(vars, "AUTOSCALE_INTERFACE"),
            resultserver_ip: non_empty(vars, "AUTOSCALE_RESULTSERVER_IP"),
            resultserver_port: match non_empty(vars, "AUTOSCALE_RESULTSERVER_PORT") {
                Some(_) => Some(parse_num(vars, "AUTOSCALE_RESULTSERVER_PORT", 0u16)?),
                None => None,
            },
        };

        let config = FleetConfig {
            region: non_empty(vars, "SANDFLEET_REGION").unwrap_or(defaults.region),
            running_machines_gap: parse_num(vars, "RUNNING_MACHINES_GAP", 0)?,
            interface: non_empty(vars, "MACHINERY_INTERFACE"),
            resultserver_ip: non_empty(vars, "RESULTSERVER_IP"),
            vm_state_timeout: Duration::from_secs(parse_num(
                vars,
                "VM_STATE_TIMEOUT_SECS",
                defaults.vm_state_timeout.as_secs(),
            )?),
            volume_step_timeout: Duration::from_secs(parse_num(
                vars,
                "VOLUME_STEP_TIMEOUT_SECS",
                defaults.volume_step_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(parse_num(
                vars,
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            boot_device: non_empty(vars, "BOOT_DEVICE").unwrap_or(defaults.boot_device),
            autoscale,
        };
        config.validate()?;
        Ok(config)
    }

    /// Autoscale needs launch parameters and somewhere to send results.
    pub fn validate(&self) -> MachineResult<()> {
        if self.poll_interval.is_zero() {
            return Err(MachineError::Configuration(
                "POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        if !self.autoscale.enabled {
            return Ok(());
        }
        let mut missing = Vec::new();
        if self.autoscale.image_id.is_empty() {
            missing.push("AUTOSCALE_IMAGE_ID");
        }
        if self.autoscale.instance_type.is_empty() {
            missing.push("AUTOSCALE_INSTANCE_TYPE");
        }
        if self.autoscale.subnet_id.is_empty() {
            missing.push("AUTOSCALE_SUBNET_ID");
        }
        if self.autoscale.security_groups.is_empty() {
            missing.push("AUTOSCALE_SECURITY_GROUPS");
        }
        if self.autoscale.resultserver_ip.is_none() && self.resultserver_ip.is_none() {
            missing.push("AUTOSCALE_RESULTSERVER_IP or RESULTSERVER_IP");
        }
        if !missing.is_empty() {
            return Err(MachineError::Configuration(format!(
                "autoscale is enabled but missing: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn autoscale_interface(&self) -> Option<String> {
        self.autoscale
            .interface
            .clone()
            .or_else(|| self.interface.clone())
    }

    pub fn autoscale_resultserver_ip(&self) -> Option<String> {
        self.autoscale
            .resultserver_ip
            .clone()
            .or_else(|| self.resultserver_ip.clone())
    }
}

// --- Static machine inventory ---

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StaticMachine {
    pub name: String,
    pub label: String,
    pub platform: String,
    pub snapshot: String,
    pub ip: Option<String>,
    pub options: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub interface: Option<String>,
    pub resultserver_ip: Option<String>,
    pub resultserver_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MachineInventory {
    #[serde(default, rename = "machine")]
    pub machines: Vec<StaticMachine>,
}

impl MachineInventory {
    pub fn parse(raw: &str) -> MachineResult<Self> {
        let inventory: MachineInventory = toml::from_str(raw)
            .map_err(|e| MachineError::Configuration(format!("invalid machine inventory: {}", e)))?;
        for m in &inventory.machines {
            if m.snapshot.trim().is_empty() {
                return Err(MachineError::Configuration(format!(
                    "static machine '{}' has no snapshot configured",
                    m.name
                )));
            }
        }
        Ok(inventory)
    }

    pub fn load(path: &str) -> MachineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MachineError::Configuration(format!("cannot read machine inventory {}: {}", path, e))
        })?;
        Self::parse(&raw)
    }
}

impl StaticMachine {
    /// Row payload, falling back to the general machinery settings.
    pub fn to_new_machine(&self, config: &FleetConfig) -> NewMachine {
        NewMachine {
            name: self.name.clone(),
            label: self.label.clone(),
            ip: self.ip.clone(),
            platform: self.platform.clone(),
            options: self.options.clone(),
            tags: self.tags.clone(),
            interface: self.interface.clone().or_else(|| config.interface.clone()),
            snapshot: Some(self.snapshot.clone()),
            resultserver_ip: self
                .resultserver_ip
                .clone()
                .or_else(|| config.resultserver_ip.clone()),
            resultserver_port: self.resultserver_port.map(i32::from),
        }
    }
}
