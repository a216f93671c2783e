//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Stream output and heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Root of the `<channel>/<profile>/realplay.m3u8` output tree
    pub base_dir: PathBuf,
    /// Seconds without a heartbeat before a stream is evicted
    pub overtime_secs: u64,
    /// HLS segment duration in seconds
    pub segment_duration_secs: u32,
    /// Number of segments kept in the playlist
    pub segment_list_size: u32,
    /// Segment duration used when Intel is picked as the fallback encoder
    pub intel_fallback_segment_duration_secs: u32,
    pub default_width: u32,
    pub default_height: u32,
    /// Credentials used when a request carries none
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./hls"),
            overtime_secs: 30,
            segment_duration_secs: 1,
            segment_list_size: 5,
            intel_fallback_segment_duration_secs: 2,
            default_width: 480,
            default_height: 270,
            username: None,
            password: None,
        }
    }
}

/// External transcoder invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Program to launch (ffmpeg by default)
    pub program: PathBuf,
    /// Arguments placed before the assembled command line
    pub global_args: Vec<String>,
    /// Default RTSP port for identities that do not specify one
    pub rtsp_port: u16,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            global_args: vec![
                "-loglevel".to_string(),
                "level".to_string(),
                "-hide_banner".to_string(),
            ],
            rtsp_port: 554,
        }
    }
}

/// Per-vendor concurrency ceilings for hardware encoders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaConfig {
    pub nvidia: u32,
    pub amd: u32,
    pub intel: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            nvidia: 3,
            amd: 3,
            intel: 3,
        }
    }
}

/// Statically declared accelerator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuDeviceConfig {
    /// One of `nvidia`, `amd`, `intel`
    pub vendor: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub name: String,
}

/// GPU detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GpuConfig {
    /// Probe the machine for accelerators (default true)
    pub detect: bool,
    /// Fixed device list; replaces detection when present
    pub devices: Option<Vec<GpuDeviceConfig>>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            detect: true,
            devices: None,
        }
    }
}

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:7878".to_string(),
        }
    }
}

/// Stream started at boot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrewarmConfig {
    pub host: String,
    pub port: Option<u16>,
    pub channel: u32,
    /// `main` or `sub`
    #[serde(default = "default_prewarm_profile")]
    pub profile: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn default_prewarm_profile() -> String {
    "sub".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub quotas: QuotaConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub prewarm: Vec<PrewarmConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RTSP_HLS_BASE_DIR -> stream.base_dir
    /// - RTSP_HLS_OVERTIME_SECS -> stream.overtime_secs
    /// - RTSP_HLS_USERNAME / RTSP_HLS_PASSWORD -> stream.username / stream.password
    /// - RTSP_HLS_FFMPEG -> transcoder.program
    /// - RTSP_HLS_QUOTA_NVIDIA / _AMD / _INTEL -> quotas.*
    /// - RTSP_HLS_STATUS_BIND -> status.bind
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RTSP_HLS_BASE_DIR") {
            self.stream.base_dir = PathBuf::from(val);
        }

        if let Some(secs) = parse_env::<u64>("RTSP_HLS_OVERTIME_SECS") {
            self.stream.overtime_secs = secs;
        }

        if let Ok(val) = env::var("RTSP_HLS_USERNAME") {
            self.stream.username = Some(val);
        }

        if let Ok(val) = env::var("RTSP_HLS_PASSWORD") {
            self.stream.password = Some(val);
        }

        if let Ok(val) = env::var("RTSP_HLS_FFMPEG") {
            self.transcoder.program = PathBuf::from(val);
        }

        if let Some(limit) = parse_env::<u32>("RTSP_HLS_QUOTA_NVIDIA") {
            self.quotas.nvidia = limit;
        }

        if let Some(limit) = parse_env::<u32>("RTSP_HLS_QUOTA_AMD") {
            self.quotas.amd = limit;
        }

        if let Some(limit) = parse_env::<u32>("RTSP_HLS_QUOTA_INTEL") {
            self.quotas.intel = limit;
        }

        if let Ok(val) = env::var("RTSP_HLS_STATUS_BIND") {
            self.status.bind = val;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests must not interleave
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for name in [
            "RTSP_HLS_BASE_DIR",
            "RTSP_HLS_OVERTIME_SECS",
            "RTSP_HLS_USERNAME",
            "RTSP_HLS_PASSWORD",
            "RTSP_HLS_FFMPEG",
            "RTSP_HLS_QUOTA_NVIDIA",
            "RTSP_HLS_QUOTA_AMD",
            "RTSP_HLS_QUOTA_INTEL",
            "RTSP_HLS_STATUS_BIND",
        ] {
            env::remove_var(name);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            overtime in 1u64..3600,
            segment in 1u32..10,
            list_size in 1u32..20,
            nvidia in 0u32..16,
            amd in 0u32..16,
            intel in 0u32..16,
            detect in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[stream]
base_dir = "/var/hls"
overtime_secs = {}
segment_duration_secs = {}
segment_list_size = {}

[transcoder]
program = "/usr/bin/ffmpeg"

[quotas]
nvidia = {}
amd = {}
intel = {}

[gpu]
detect = {}
"#,
                overtime, segment, list_size, nvidia, amd, intel, detect
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.stream.base_dir, PathBuf::from("/var/hls"));
            prop_assert_eq!(config.stream.overtime_secs, overtime);
            prop_assert_eq!(config.stream.segment_duration_secs, segment);
            prop_assert_eq!(config.stream.segment_list_size, list_size);
            prop_assert_eq!(config.transcoder.program, PathBuf::from("/usr/bin/ffmpeg"));
            prop_assert_eq!(config.quotas.nvidia, nvidia);
            prop_assert_eq!(config.quotas.amd, amd);
            prop_assert_eq!(config.quotas.intel, intel);
            prop_assert_eq!(config.gpu.detect, detect);
        }

        #[test]
        fn prop_env_overrides_quotas(
            initial in 0u32..8,
            override_nvidia in 0u32..32,
            override_intel in 0u32..32,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[quotas]\nnvidia = {0}\namd = {0}\nintel = {0}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RTSP_HLS_QUOTA_NVIDIA", override_nvidia.to_string());
            env::set_var("RTSP_HLS_QUOTA_INTEL", override_intel.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.quotas.nvidia, override_nvidia);
            prop_assert_eq!(config.quotas.amd, initial);
            prop_assert_eq!(config.quotas.intel, override_intel);
        }

        #[test]
        fn prop_env_overrides_overtime(
            initial in 1u64..600,
            override_secs in 1u64..600,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[stream]\novertime_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RTSP_HLS_OVERTIME_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.stream.overtime_secs, override_secs);
        }
    }

    #[test]
    fn test_invalid_env_value_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("RTSP_HLS_OVERTIME_SECS", "soon");
        env::set_var("RTSP_HLS_USERNAME", "admin");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.stream.overtime_secs, 30);
        assert_eq!(config.stream.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.stream.base_dir, PathBuf::from("./hls"));
        assert_eq!(config.stream.overtime_secs, 30);
        assert_eq!(config.stream.segment_duration_secs, 1);
        assert_eq!(config.stream.segment_list_size, 5);
        assert_eq!(config.stream.intel_fallback_segment_duration_secs, 2);
        assert_eq!(config.transcoder.program, PathBuf::from("ffmpeg"));
        assert_eq!(
            config.transcoder.global_args,
            vec!["-loglevel", "level", "-hide_banner"]
        );
        assert_eq!(config.transcoder.rtsp_port, 554);
        assert_eq!(config.quotas, QuotaConfig::default());
        assert!(config.gpu.detect);
        assert!(config.gpu.devices.is_none());
        assert!(config.status.enabled);
        assert!(config.prewarm.is_empty());
    }

    #[test]
    fn test_static_devices_and_prewarm_parse() {
        let toml_str = r#"
[gpu]
devices = [
    { vendor = "nvidia", index = 0, name = "RTX 3060" },
    { vendor = "intel" },
]

[[prewarm]]
host = "192.168.1.64"
channel = 1

[[prewarm]]
host = "192.168.1.65"
port = 8554
channel = 2
profile = "main"
width = 1280
height = 720
"#;
        let config = Config::parse_toml(toml_str).expect("TOML should parse");

        let devices = config.gpu.devices.expect("devices present");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].vendor, "nvidia");
        assert_eq!(devices[1].index, 0);
        assert_eq!(config.prewarm.len(), 2);
        assert_eq!(config.prewarm[0].profile, "sub");
        assert_eq!(config.prewarm[0].port, None);
        assert_eq!(config.prewarm[1].port, Some(8554));
        assert_eq!(config.prewarm[1].width, Some(1280));
    }
}
