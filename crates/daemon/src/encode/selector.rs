//! Encode/decode selection under per-vendor quotas
//!
//! The quota check is a point-in-time scan with no reservation. Two jobs
//! starting together may both pass the same vendor's check; the ceiling is
//! therefore soft.

use crate::concurrency::{VendorQuotas, VendorUsage};
use crate::encode::settings::{DecodeSettings, EncodeConfiguration, EncodeSettings};
use crate::gpu::{GpuDevice, Vendor};
use thiserror::Error;
use tracing::warn;

/// Widest output for which Intel is preferred over other accelerators
pub const INTEL_PREFERRED_MAX_WIDTH: u32 = 480;

/// Error type for codec selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("None of available encoders can be found")]
    NoEncoder,

    #[error("None of available decoders can be found")]
    NoDecoder,
}

/// Outcome of the selection decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Small output on Intel, software decode
    IntelSmall,
    /// NVIDIA decode and encode
    Nvidia,
    /// AMD encode; decode on NVIDIA when one is installed
    Amd { nvidia_decode: bool },
    /// Intel as last accelerator, software decode, longer segments
    IntelFallback,
    /// Software decode and encode
    Software,
}

impl Selection {
    pub fn vendor(&self) -> Vendor {
        match self {
            Selection::IntelSmall | Selection::IntelFallback => Vendor::Intel,
            Selection::Nvidia => Vendor::Nvidia,
            Selection::Amd { .. } => Vendor::Amd,
            Selection::Software => Vendor::Cpu,
        }
    }

    pub fn decode(&self) -> DecodeSettings {
        match self {
            Selection::Nvidia | Selection::Amd { nvidia_decode: true } => DecodeSettings::Nvidia,
            _ => DecodeSettings::Software,
        }
    }

    pub fn encode(&self) -> EncodeSettings {
        match self {
            Selection::IntelSmall | Selection::IntelFallback => EncodeSettings::intel(),
            Selection::Nvidia => EncodeSettings::nvidia(),
            Selection::Amd { .. } => EncodeSettings::amd(),
            Selection::Software => EncodeSettings::software(),
        }
    }

    /// Whether the Intel fallback segment duration replaces the configured one
    pub fn uses_fallback_segment_duration(&self) -> bool {
        matches!(self, Selection::IntelFallback)
    }
}

/// Pick decode and encode settings for an output of `width` pixels
///
/// First viable choice wins, where viable means the vendor is installed and
/// its running count is strictly below its quota:
/// 1. Intel when `width <= 480`
/// 2. NVIDIA
/// 3. AMD (NVIDIA decode if any NVIDIA device exists, regardless of quota)
/// 4. Intel regardless of width
/// 5. Software
pub fn select_codecs(
    width: u32,
    devices: &[GpuDevice],
    usage: &VendorUsage,
    quotas: &VendorQuotas,
) -> Selection {
    if devices.is_empty() {
        return Selection::Software;
    }

    let present = |vendor: Vendor| devices.iter().any(|d| d.vendor == vendor);
    let viable = |vendor: Vendor| {
        if !present(vendor) {
            return false;
        }
        if usage.has_capacity(vendor, quotas) {
            true
        } else {
            warn!(vendor = %vendor, running = usage.count(vendor), "Encoding concurrent limit reached");
            false
        }
    };

    if width <= INTEL_PREFERRED_MAX_WIDTH && viable(Vendor::Intel) {
        return Selection::IntelSmall;
    }

    if viable(Vendor::Nvidia) {
        return Selection::Nvidia;
    }

    if viable(Vendor::Amd) {
        return Selection::Amd {
            nvidia_decode: present(Vendor::Nvidia),
        };
    }

    // Small outputs already tried Intel in step 1
    if width > INTEL_PREFERRED_MAX_WIDTH && viable(Vendor::Intel) {
        return Selection::IntelFallback;
    }

    Selection::Software
}

/// Apply a selection to a configuration
pub fn apply_selection(
    cfg: &mut EncodeConfiguration,
    selection: Selection,
    fallback_segment_duration: u32,
) {
    cfg.decode = Some(selection.decode());
    cfg.encode = Some(selection.encode());
    if selection.uses_fallback_segment_duration() {
        cfg.segment_duration = Some(fallback_segment_duration);
    }
}

/// Reject a configuration that ended up without a decoder or an encoder
pub fn ensure_codecs(cfg: &EncodeConfiguration) -> Result<(), SelectError> {
    if cfg.encode.is_none() {
        return Err(SelectError::NoEncoder);
    }
    if cfg.decode.is_none() {
        return Err(SelectError::NoDecoder);
    }
    Ok(())
}
