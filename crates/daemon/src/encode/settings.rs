//! Per-vendor decode/encode settings and the per-job encode configuration

use crate::gpu::Vendor;
use crate::identity::{Credentials, Resolution, StreamIdentity};
use std::path::PathBuf;

/// Decoder applied to the incoming RTSP stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeSettings {
    /// Software h264 decoder
    Software,
    /// NVDEC through the cuvid wrapper
    Nvidia,
}

impl DecodeSettings {
    pub fn vendor(&self) -> Vendor {
        match self {
            DecodeSettings::Software => Vendor::Cpu,
            DecodeSettings::Nvidia => Vendor::Nvidia,
        }
    }

    pub fn decoder_name(&self) -> &'static str {
        match self {
            DecodeSettings::Software => "h264",
            DecodeSettings::Nvidia => "h264_cuvid",
        }
    }

    pub fn decoder_options(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Encoder producing the HLS output, each variant carrying its own option set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeSettings {
    Software { preset: String, tune: String },
    Nvidia { preset: String },
    Amd { quality: String },
    Intel { preset: String },
}

impl EncodeSettings {
    pub fn software() -> Self {
        EncodeSettings::Software {
            preset: "veryfast".to_string(),
            tune: "zerolatency".to_string(),
        }
    }

    pub fn nvidia() -> Self {
        EncodeSettings::Nvidia {
            preset: "p1".to_string(),
        }
    }

    pub fn amd() -> Self {
        EncodeSettings::Amd {
            quality: "speed".to_string(),
        }
    }

    pub fn intel() -> Self {
        EncodeSettings::Intel {
            preset: "veryfast".to_string(),
        }
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            EncodeSettings::Software { .. } => Vendor::Cpu,
            EncodeSettings::Nvidia { .. } => Vendor::Nvidia,
            EncodeSettings::Amd { .. } => Vendor::Amd,
            EncodeSettings::Intel { .. } => Vendor::Intel,
        }
    }

    pub fn encoder_name(&self) -> &'static str {
        match self {
            EncodeSettings::Software { .. } => "libx264",
            EncodeSettings::Nvidia { .. } => "h264_nvenc",
            EncodeSettings::Amd { .. } => "h264_amf",
            EncodeSettings::Intel { .. } => "h264_qsv",
        }
    }

    pub fn encoder_options(&self) -> Vec<String> {
        match self {
            EncodeSettings::Software { preset, tune } => vec![
                "-preset".to_string(),
                preset.clone(),
                "-tune".to_string(),
                tune.clone(),
            ],
            EncodeSettings::Nvidia { preset } | EncodeSettings::Intel { preset } => {
                vec!["-preset".to_string(), preset.clone()]
            }
            EncodeSettings::Amd { quality } => vec!["-quality".to_string(), quality.clone()],
        }
    }
}

/// Everything needed to assemble one transcoder invocation
///
/// Built once when a job starts and never mutated afterwards; a restart
/// builds a fresh one.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeConfiguration {
    pub source: StreamIdentity,
    pub credentials: Option<Credentials>,
    pub decode: Option<DecodeSettings>,
    pub encode: Option<EncodeSettings>,
    pub resolution: Option<Resolution>,
    /// HLS segment length in seconds, also drives forced keyframes
    pub segment_duration: Option<u32>,
    pub segment_list_size: Option<u32>,
    pub save_path: Option<PathBuf>,
}

impl EncodeConfiguration {
    /// Configuration with only the source set; codecs are filled in by the selector
    pub fn for_source(source: StreamIdentity) -> Self {
        Self {
            source,
            credentials: None,
            decode: None,
            encode: None,
            resolution: None,
            segment_duration: None,
            segment_list_size: None,
            save_path: None,
        }
    }

    /// Vendor whose encoder quota this configuration consumes
    pub fn vendor(&self) -> Vendor {
        self.encode
            .as_ref()
            .map(EncodeSettings::vendor)
            .unwrap_or(Vendor::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_vendor_mapping() {
        assert_eq!(EncodeSettings::software().vendor(), Vendor::Cpu);
        assert_eq!(EncodeSettings::nvidia().vendor(), Vendor::Nvidia);
        assert_eq!(EncodeSettings::amd().vendor(), Vendor::Amd);
        assert_eq!(EncodeSettings::intel().vendor(), Vendor::Intel);
    }

    #[test]
    fn test_encoder_options() {
        assert_eq!(
            EncodeSettings::software().encoder_options(),
            vec!["-preset", "veryfast", "-tune", "zerolatency"]
        );
        assert_eq!(EncodeSettings::amd().encoder_options(), vec!["-quality", "speed"]);
        assert_eq!(EncodeSettings::nvidia().encoder_name(), "h264_nvenc");
    }

    #[test]
    fn test_configuration_vendor_defaults_to_cpu() {
        let identity = StreamIdentity::new("cam", 554, 1, crate::identity::Profile::Sub);
        let mut cfg = EncodeConfiguration::for_source(identity);
        assert_eq!(cfg.vendor(), Vendor::Cpu);

        cfg.encode = Some(EncodeSettings::intel());
        assert_eq!(cfg.vendor(), Vendor::Intel);
    }
}
