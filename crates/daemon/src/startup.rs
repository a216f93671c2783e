//! Startup checks module
//!
//! Preflight checks run before the daemon accepts streams:
//! - the transcoder program runs and reports a usable version
//! - every detected accelerator has its encoder compiled into the transcoder

use crate::config::Config;
use crate::encode::EncodeSettings;
use crate::gpu::{GpuDevice, GpuOracle, Vendor};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Oldest transcoder major version with `-hls_init_time` and `-forced-idr`
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Transcoder not available: {0}")]
    FfmpegUnavailable(String),

    #[error("Transcoder version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Facts gathered about the transcoder during startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderInfo {
    /// First line of `-version`
    pub banner: String,
    /// Parsed major version, `None` for unversioned builds
    pub major: Option<u32>,
    /// Video encoders compiled in
    pub encoders: Vec<String>,
}

/// Parse the transcoder version string and extract the major version number
///
/// Handles:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
///
/// Git snapshots ("N-113345-g...") carry no release number and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?
        .to_lowercase();

    let version = line.split("ffmpeg version").nth(1)?.split_whitespace().next()?;
    let version = version.strip_prefix('n').unwrap_or(version);

    version.split(['.', '-']).next()?.parse().ok()
}

/// Parse the video encoder names from `-encoders` output
///
/// The listing starts after a ` ------` separator; each entry is a six-letter
/// capability field (`V` first for video) followed by the encoder name.
pub fn parse_encoders(encoders_output: &str) -> Vec<String> {
    encoders_output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6 && flags.starts_with('V')).then(|| name.to_string())
        })
        .collect()
}

/// Encoder the selector would use for `vendor`
fn encoder_name(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Cpu => EncodeSettings::software().encoder_name(),
        Vendor::Nvidia => EncodeSettings::nvidia().encoder_name(),
        Vendor::Amd => EncodeSettings::amd().encoder_name(),
        Vendor::Intel => EncodeSettings::intel().encoder_name(),
    }
}

/// Vendors present on the machine whose encoder the transcoder lacks
///
/// The software encoder is always checked.
pub fn missing_encoders(encoders: &[String], devices: &[GpuDevice]) -> Vec<(Vendor, &'static str)> {
    let mut vendors = vec![Vendor::Cpu];
    for device in devices {
        if !vendors.contains(&device.vendor) {
            vendors.push(device.vendor);
        }
    }

    vendors
        .into_iter()
        .map(|vendor| (vendor, encoder_name(vendor)))
        .filter(|(_, name)| !encoders.iter().any(|e| e == name))
        .collect()
}

fn run_program(program: &Path, arg: &str) -> Result<String, StartupError> {
    let output = Command::new(program)
        .arg("-hide_banner")
        .arg(arg)
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} {} failed; is it installed and in PATH? Error: {}",
                program.display(),
                arg,
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} {} exited with {}",
            program.display(),
            arg,
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Verify the transcoder runs and meets the minimum version
pub fn check_transcoder(program: &Path) -> Result<TranscoderInfo, StartupError> {
    let version_output = run_program(program, "-version")?;
    let banner = version_output.lines().next().unwrap_or("(empty)").to_string();
    let major = parse_ffmpeg_version(&version_output);

    match major {
        Some(major) if major < MIN_FFMPEG_MAJOR => {
            return Err(StartupError::FfmpegVersion(format!(
                "{}.x or newer required, got: {}",
                MIN_FFMPEG_MAJOR, major
            )));
        }
        Some(_) => {}
        None => warn!(banner = %banner, "Could not parse transcoder version, continuing"),
    }

    let encoders = parse_encoders(&run_program(program, "-encoders")?);
    Ok(TranscoderInfo {
        banner,
        major,
        encoders,
    })
}

/// Run all startup checks
///
/// Missing accelerator encoders are warnings: the selector may still pick
/// that vendor, and the job will then fail to start with the transcoder's
/// own error.
pub fn run_startup_checks(cfg: &Config, oracle: &dyn GpuOracle) -> Result<TranscoderInfo, StartupError> {
    let info = check_transcoder(&cfg.transcoder.program)?;
    info!(banner = %info.banner, encoders = info.encoders.len(), "Transcoder found");

    let devices = oracle.devices();
    for device in &devices {
        info!(vendor = %device.vendor, index = device.index, name = %device.name, "Accelerator detected");
    }
    for (vendor, encoder) in missing_encoders(&info.encoders, &devices) {
        warn!(vendor = %vendor, encoder, "Encoder not available in transcoder build");
    }

    Ok(info)
}
