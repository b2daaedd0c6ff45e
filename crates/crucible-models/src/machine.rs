//! Machine - a bare-metal host under management

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Keyed;

/// A machine being provisioned.
///
/// Machines move through stages; each stage selects a boot environment and a
/// list of tasks that the job runner executes on the machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Primary key.
    pub uuid: Uuid,

    /// Human-readable name, unique alongside the UUID.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// IP address used to find the machine from DHCP traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,

    /// Boot environment the machine should boot into next.
    pub boot_env: String,

    /// Current stage in the provisioning workflow.
    #[serde(default)]
    pub stage: String,

    /// Remaining tasks for the current stage.
    #[serde(default)]
    pub tasks: Vec<String>,

    /// The currently executing (or last) job for this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<Uuid>,

    /// Whether the job runner may pick up work for this machine.
    #[serde(default)]
    pub runnable: bool,

    /// Free-form parameters consumed by templates and plugins.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl Machine {
    pub fn new(name: impl Into<String>, boot_env: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: None,
            address: None,
            boot_env: boot_env.into(),
            stage: String::new(),
            tasks: Vec::new(),
            current_job: None,
            runnable: true,
            params: HashMap::new(),
        }
    }

    /// Validate the fields that must hold before the machine is stored.
    pub fn validate(&self) -> Result<(), String> {
        if !crate::valid_name(&self.name) {
            return Err(format!("invalid machine name `{}`", self.name));
        }
        if self.boot_env.is_empty() {
            return Err("machine requires a boot environment".to_string());
        }
        Ok(())
    }
}

impl Keyed for Machine {
    const PREFIX: &'static str = "machines";

    fn key(&self) -> String {
        self.uuid.to_string()
    }
}
