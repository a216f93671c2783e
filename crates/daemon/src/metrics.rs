//! Status snapshot module
//!
//! Point-in-time view of every registered stream plus host load, served as
//! JSON by the status endpoint.

use crate::concurrency::VendorUsage;
use crate::gpu::Vendor;
use crate::job::{JobState, JobStatus};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Per-stream status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStatus {
    /// `host:port/{channel}0{profile}`
    pub identity: String,
    pub job_id: Uuid,
    pub state: String,
    /// Failure reason when `state` is `error`
    pub reason: Option<String>,
    pub vendor: Option<Vendor>,
    pub pid: Option<u32>,
    pub output_path: String,
    pub uptime_secs: u64,
    /// Milliseconds since the last heartbeat; absent for streams not acquired with one
    pub heartbeat_age_ms: Option<u64>,
}

impl StreamStatus {
    pub fn from_job(status: JobStatus, heartbeat_age_ms: Option<u64>) -> Self {
        let reason = match &status.state {
            JobState::Error(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            identity: status.identity.to_string(),
            job_id: status.id,
            state: status.state.as_str().to_string(),
            reason,
            vendor: status.vendor,
            pid: status.pid,
            output_path: status.output_path.to_string_lossy().to_string(),
            uptime_secs: status.uptime_secs,
            heartbeat_age_ms,
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete status snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub streams: Vec<StreamStatus>,
    pub system: SystemMetrics,
    pub vendor_usage: VendorUsage,
}

impl StatusSnapshot {
    /// Snapshot stamped with the current wall-clock time
    pub fn new(streams: Vec<StreamStatus>, system: SystemMetrics, vendor_usage: VendorUsage) -> Self {
        let timestamp_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Self {
            timestamp_unix_ms,
            streams,
            system,
            vendor_usage,
        }
    }
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let mem_usage = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}
