//! GPU capability oracle
//!
//! Reports which hardware accelerators are present when a job is built.
//! Queried once per job start; implementations hold no per-job state.

use crate::config::GpuConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hardware family providing encode/decode offload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Cpu,
    Nvidia,
    Amd,
    Intel,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Cpu => "cpu",
            Vendor::Nvidia => "nvidia",
            Vendor::Amd => "amd",
            Vendor::Intel => "intel",
        }
    }

    /// Parse a vendor name as found in config files
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Vendor::Cpu),
            "nvidia" => Some(Vendor::Nvidia),
            "amd" => Some(Vendor::Amd),
            "intel" => Some(Vendor::Intel),
            _ => None,
        }
    }

    /// Classify a display adapter description by vendor substring
    pub fn from_adapter_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.contains("nvidia") {
            Some(Vendor::Nvidia)
        } else if lower.contains("amd") || lower.contains("radeon") || lower.contains("ati ") {
            Some(Vendor::Amd)
        } else if lower.contains("intel") {
            Some(Vendor::Intel)
        } else {
            None
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accelerator as reported by the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub vendor: Vendor,
    pub index: u32,
    pub name: String,
}

impl GpuDevice {
    pub fn new(vendor: Vendor, index: u32, name: impl Into<String>) -> Self {
        Self {
            vendor,
            index,
            name: name.into(),
        }
    }
}

/// Source of the accelerator inventory
pub trait GpuOracle: Send + Sync {
    fn devices(&self) -> Vec<GpuDevice>;
}

/// Fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    devices: Vec<GpuDevice>,
}

impl StaticOracle {
    pub fn new(devices: Vec<GpuDevice>) -> Self {
        Self { devices }
    }
}

impl GpuOracle for StaticOracle {
    fn devices(&self) -> Vec<GpuDevice> {
        self.devices.clone()
    }
}

/// Oracle for machines where detection is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGpuOracle;

impl GpuOracle for NoGpuOracle {
    fn devices(&self) -> Vec<GpuDevice> {
        Vec::new()
    }
}

/// Enumerates display controllers through `lspci`
#[derive(Debug, Clone, Default)]
pub struct LspciOracle;

impl GpuOracle for LspciOracle {
    fn devices(&self) -> Vec<GpuDevice> {
        match Command::new("lspci").output() {
            Ok(output) if output.status.success() => {
                parse_lspci(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = ?output.status, "lspci exited unsuccessfully");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "lspci unavailable, assuming no accelerators");
                Vec::new()
            }
        }
    }
}

/// Extract accelerators from `lspci` output
///
/// Only VGA, 3D and display controllers are considered; devices are indexed
/// in enumeration order across all vendors.
pub fn parse_lspci(output: &str) -> Vec<GpuDevice> {
    let mut devices = Vec::new();
    let mut index = 0;

    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        let is_display = lower.contains("vga compatible controller")
            || lower.contains("3d controller")
            || lower.contains("display controller");
        if !is_display {
            continue;
        }

        let name = line
            .splitn(2, ": ")
            .nth(1)
            .unwrap_or(line)
            .trim()
            .to_string();
        if let Some(vendor) = Vendor::from_adapter_name(&name) {
            devices.push(GpuDevice::new(vendor, index, name));
        }
        index += 1;
    }

    devices
}

/// Build the oracle described by the `[gpu]` config section
pub fn oracle_from_config(cfg: &GpuConfig) -> Arc<dyn GpuOracle> {
    if let Some(declared) = &cfg.devices {
        let devices = declared
            .iter()
            .filter_map(|d| match Vendor::parse(&d.vendor) {
                Some(Vendor::Cpu) | None => {
                    warn!(vendor = %d.vendor, "Ignoring unknown accelerator vendor in config");
                    None
                }
                Some(vendor) => Some(GpuDevice::new(vendor, d.index, d.name.clone())),
            })
            .collect();
        return Arc::new(StaticOracle::new(devices));
    }

    if cfg.detect {
        Arc::new(LspciOracle)
    } else {
        Arc::new(NoGpuOracle)
    }
}
