//! Configuration module for the RTSP to HLS stream supervisor
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
