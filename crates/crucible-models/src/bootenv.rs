//! BootEnv - a bootable OS environment

use serde::{Deserialize, Serialize};

use crate::Keyed;

/// Information about the operating system a boot environment installs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name of the ISO the file server expects to have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_file: Option<String>,

    /// Where the ISO can be downloaded from if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_url: Option<String>,
}

/// A network boot environment: kernel, initrds, and the command line handed
/// to machines booting into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootEnv {
    /// Primary key; unique per environment.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub os: OsInfo,

    /// Kernel path relative to the file server root.
    #[serde(default)]
    pub kernel: String,

    /// Initrd paths, in load order.
    #[serde(default)]
    pub initrds: Vec<String>,

    /// Kernel command-line template.
    #[serde(default)]
    pub boot_params: String,

    /// Parameters machines must carry before booting this environment.
    #[serde(default)]
    pub required_params: Vec<String>,

    #[serde(default)]
    pub optional_params: Vec<String>,

    /// Whether this environment serves machines we have no record of.
    #[serde(default)]
    pub only_unknown: bool,
}

impl BootEnv {
    pub fn validate(&self) -> Result<(), String> {
        if !crate::valid_name(&self.name) {
            return Err(format!("invalid boot environment name `{}`", self.name));
        }
        Ok(())
    }
}

impl Keyed for BootEnv {
    const PREFIX: &'static str = "bootenvs";

    fn key(&self) -> String {
        self.name.clone()
    }
}
