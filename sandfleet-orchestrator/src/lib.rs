pub mod allocation;
pub mod capacity;
pub mod capacity_job;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod machinery;
pub mod poll;
pub mod provider_manager;
pub mod registry;
pub mod restore;
pub mod result_server;
pub mod state_probe;
pub mod store;

pub use controller::FleetController;
pub use error::{ErrorKind, MachineError, MachineResult};
pub use machinery::Machinery;
