//! RTSP to HLS stream supervisor
//!
//! Keeps one transcoder process per camera stream, deduplicates concurrent
//! start requests, picks hardware encoders under per-vendor quotas and evicts
//! streams whose consumers stopped sending heartbeats.

pub mod classify;
pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod gpu;
pub mod identity;
pub mod janitor;
pub mod job;
pub mod metrics;
pub mod registry;
pub mod startup;
pub mod status_server;

pub use classify::{classify_line, readiness_path, OutputEvent};
pub use concurrency::{VendorQuotas, VendorUsage};
pub use daemon::{prewarm_target, Daemon, DaemonError};
pub use encode::{
    build_transcode_args, select_codecs, AssembleError, DecodeSettings, EncodeConfiguration,
    EncodeSettings, SelectError, Selection, TranscodeArgs,
};
pub use gpu::{oracle_from_config, GpuDevice, GpuOracle, LspciOracle, NoGpuOracle, StaticOracle, Vendor};
pub use identity::{Credentials, Profile, Resolution, StreamIdentity, PLAYLIST_FILE_NAME};
pub use janitor::HeartbeatJanitor;
pub use job::{resolve_segment_path, JobError, JobSettings, JobState, JobStatus, StreamJob};
pub use metrics::{collect_system_metrics, StatusSnapshot, StreamStatus, SystemMetrics};
pub use registry::Registry;
pub use rtsp_hls_config as config;
pub use rtsp_hls_config::Config;
pub use startup::{
    check_transcoder, parse_encoders, parse_ffmpeg_version, run_startup_checks, StartupError,
    TranscoderInfo,
};
pub use status_server::{create_status_router, run_status_server, ServerError};
