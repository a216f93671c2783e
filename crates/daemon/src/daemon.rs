//! Daemon startup and main loop
//!
//! Wires configuration, GPU oracle, registry, janitor and status server
//! together, pre-warms configured streams and tears everything down when the
//! shutdown signal fires.

use crate::config::{Config, ConfigError, PrewarmConfig};
use crate::gpu::{oracle_from_config, GpuOracle};
use crate::identity::{Profile, Resolution, StreamIdentity};
use crate::janitor::HeartbeatJanitor;
use crate::job::JobError;
use crate::registry::Registry;
use crate::startup::{run_startup_checks, StartupError};
use crate::status_server::{run_status_server, ServerError};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Stream failed to start
    #[error("Stream error: {0}")]
    Job(#[from] JobError),

    /// Status server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Invalid pre-warm entry
    #[error("Invalid prewarm stream {host}: {reason}")]
    Prewarm { host: String, reason: String },
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    janitor: Arc<HeartbeatJanitor>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Loads the file, applies environment overrides and runs the startup
    /// checks before building the registry.
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration, running startup checks
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        let oracle = oracle_from_config(&config.gpu);
        run_startup_checks(&config, oracle.as_ref())?;
        Ok(Self::assemble(config, oracle))
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when the transcoder is not installed. Must be called
    /// from within a tokio runtime.
    pub fn new_without_checks(config: Config) -> Self {
        let oracle = oracle_from_config(&config.gpu);
        Self::assemble(config, oracle)
    }

    fn assemble(config: Config, oracle: Arc<dyn GpuOracle>) -> Self {
        let registry = Registry::from_config(&config, oracle);
        let overtime = Duration::from_secs(config.stream.overtime_secs);
        let janitor = Arc::new(HeartbeatJanitor::start(registry, overtime));

        Self { config, janitor }
    }

    /// Entry point used by consumers of the stream core
    pub fn janitor(&self) -> Arc<HeartbeatJanitor> {
        Arc::clone(&self.janitor)
    }

    /// Start every `[[prewarm]]` stream in the background
    ///
    /// Pre-warmed streams bypass the heartbeat ledger and run until shutdown.
    pub fn start_prewarm(&self) -> Result<Vec<JoinHandle<()>>, DaemonError> {
        let targets = self
            .config
            .prewarm
            .iter()
            .map(|entry| prewarm_target(entry, &self.config))
            .collect::<Result<Vec<_>, _>>()?;

        let handles = targets
            .into_iter()
            .map(|(identity, resolution)| {
                let registry = self.janitor.registry().clone();
                tokio::spawn(async move {
                    info!(stream = %identity, resolution = %resolution, "Pre-warming stream");
                    if let Err(e) = registry.acquire(identity.clone(), resolution, None).await {
                        error!(stream = %identity, error = %e, "Pre-warm failed");
                    }
                })
            })
            .collect();

        Ok(handles)
    }

    /// Run until `shutdown` resolves, then stop every stream
    ///
    /// Returns early with an error when the status server fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut server = if self.config.status.enabled {
            let janitor = self.janitor();
            let bind = self.config.status.bind.clone();
            let mut stop_rx = stop_rx.clone();
            Some(tokio::spawn(async move {
                run_status_server(janitor, &bind, async move {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                })
                .await
            }))
        } else {
            None
        };
        drop(stop_rx);

        let prewarm = match self.start_prewarm() {
            Ok(handles) => handles,
            Err(e) => {
                let _ = stop_tx.send(true);
                self.janitor.shutdown().await;
                return Err(e);
            }
        };

        tokio::pin!(shutdown);
        let server_exit = match server.as_mut() {
            Some(handle) => tokio::select! {
                _ = &mut shutdown => None,
                joined = handle => Some(joined),
            },
            None => {
                shutdown.await;
                None
            }
        };
        info!("Shutting down");

        let _ = stop_tx.send(true);
        for handle in prewarm {
            handle.abort();
        }
        self.janitor.shutdown().await;

        let result = match server_exit {
            Some(joined) => joined,
            None => match server {
                Some(handle) => handle.await,
                None => Ok(Ok(())),
            },
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Status server task ended abnormally");
                Ok(())
            }
        }
    }
}

/// Identity and output size of a pre-warm entry
pub fn prewarm_target(
    entry: &PrewarmConfig,
    config: &Config,
) -> Result<(StreamIdentity, Resolution), DaemonError> {
    let profile: Profile = entry.profile.parse().map_err(|reason| DaemonError::Prewarm {
        host: entry.host.clone(),
        reason,
    })?;

    let identity = StreamIdentity::new(
        entry.host.clone(),
        entry.port.unwrap_or(config.transcoder.rtsp_port),
        entry.channel,
        profile,
    );
    let resolution = Resolution::new(
        entry.width.unwrap_or(config.stream.default_width),
        entry.height.unwrap_or(config.stream.default_height),
    );

    Ok((identity, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuConfig;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.gpu = GpuConfig {
            detect: false,
            devices: None,
        };
        config.status.enabled = false;
        config
    }

    fn prewarm(profile: &str) -> PrewarmConfig {
        PrewarmConfig {
            host: "10.0.0.5".to_string(),
            port: None,
            channel: 2,
            profile: profile.to_string(),
            width: Some(1280),
            height: None,
        }
    }

    #[test]
    fn test_prewarm_target_fills_defaults() {
        let config = test_config();
        let (identity, resolution) = prewarm_target(&prewarm("main"), &config).unwrap();

        assert_eq!(identity, StreamIdentity::new("10.0.0.5", 554, 2, Profile::Main));
        assert_eq!(resolution, Resolution::new(1280, 270));
    }

    #[test]
    fn test_prewarm_target_rejects_unknown_profile() {
        let err = prewarm_target(&prewarm("ultra"), &test_config()).unwrap_err();
        assert!(matches!(err, DaemonError::Prewarm { .. }));
    }

    #[tokio::test]
    async fn test_daemon_runs_until_shutdown() {
        let daemon = Daemon::new_without_checks(test_config());
        let janitor = daemon.janitor();

        daemon.run_until(async {}).await.unwrap();
        assert!(janitor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_prewarm_fails_run() {
        let mut config = test_config();
        config.prewarm.push(prewarm("ultra"));
        let daemon = Daemon::new_without_checks(config);

        let err = daemon.run_until(async {}).await.unwrap_err();
        assert!(matches!(err, DaemonError::Prewarm { .. }));
    }

    #[tokio::test]
    async fn test_status_bind_failure_ends_run() {
        let mut config = test_config();
        config.status.enabled = true;
        config.status.bind = "not-an-address".to_string();
        let daemon = Daemon::new_without_checks(config);

        let err = daemon
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Server(ServerError::Bind { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prewarmed_stream_runs_until_shutdown() {
        use crate::job::test_support::FakeTranscoder;
        use crate::job::JobState;

        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config();
        config.stream.base_dir = dir.path().join("hls");
        config.transcoder.program = "sh".into();
        config.transcoder.global_args = vec![FakeTranscoder::Ready
            .install(dir.path())
            .to_string_lossy()
            .to_string()];
        config.prewarm.push(prewarm("sub"));

        let daemon = Daemon::new_without_checks(config.clone());
        let janitor = daemon.janitor();
        let (identity, _) = prewarm_target(&config.prewarm[0], &config).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(daemon.run_until(async move {
            let _ = rx.await;
        }));

        let mut running = false;
        for _ in 0..50 {
            if janitor.lookup(&identity).map(|job| job.state()) == Some(JobState::Running) {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(running, "pre-warmed stream never became ready");

        tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(janitor.registry().is_empty());
    }
}
