//! Heartbeat janitor
//!
//! Wraps a [`Registry`] with a freshness ledger. Consumers acquire streams
//! through [`HeartbeatJanitor::acquire_with_heartbeat`] and keep them alive
//! with [`HeartbeatJanitor::touch`]; a single background loop stops every
//! stream whose last heartbeat is older than the overtime threshold.

use crate::identity::{Credentials, Resolution, StreamIdentity};
use crate::job::{JobError, StreamJob};
use crate::metrics::{collect_system_metrics, StatusSnapshot, StreamStatus};
use crate::registry::Registry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interval between eviction sweeps
pub const JANITOR_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    last_seen: Instant,
    job_id: Uuid,
}

type Ledger = DashMap<StreamIdentity, Heartbeat>;

/// Registry wrapper that evicts streams nobody is watching
pub struct HeartbeatJanitor {
    registry: Registry,
    ledger: Arc<Ledger>,
    overtime: Duration,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatJanitor {
    /// Start the janitor with the default one-second sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(registry: Registry, overtime: Duration) -> Self {
        Self::start_with_tick(registry, overtime, JANITOR_TICK)
    }

    pub fn start_with_tick(registry: Registry, overtime: Duration, tick: Duration) -> Self {
        let ledger: Arc<Ledger> = Arc::new(DashMap::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_eviction_loop(
            registry.clone(),
            Arc::clone(&ledger),
            overtime,
            tick,
            Arc::clone(&shutdown),
        ));
        info!(overtime_secs = overtime.as_secs_f64(), "Heartbeat janitor started");

        Self {
            registry,
            ledger,
            overtime,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn overtime(&self) -> Duration {
        self.overtime
    }

    /// Acquire a stream and record a heartbeat for it
    ///
    /// The ledger entry lives as long as the job; it is dropped when the job
    /// terminates or is evicted.
    pub async fn acquire_with_heartbeat(
        &self,
        identity: StreamIdentity,
        resolution: Resolution,
        credentials: Option<Credentials>,
    ) -> Result<Arc<StreamJob>, JobError> {
        let job = self
            .registry
            .acquire(identity.clone(), resolution, credentials)
            .await?;

        let beat = Heartbeat {
            last_seen: Instant::now(),
            job_id: job.id(),
        };
        let previous = self.ledger.insert(identity, beat);

        if previous.map(|p| p.job_id) != Some(job.id()) {
            let ledger = Arc::downgrade(&self.ledger);
            job.on_exit(Box::new(move |job| {
                if let Some(ledger) = ledger.upgrade() {
                    ledger.remove_if(job.identity(), |_, beat| beat.job_id == job.id());
                }
            }));
        }

        Ok(job)
    }

    /// Refresh the heartbeat for `identity`
    pub fn touch(&self, identity: &StreamIdentity) {
        match self.ledger.get_mut(identity) {
            Some(mut beat) => beat.last_seen = Instant::now(),
            None => warn!(stream = %identity, "Heartbeat for unknown stream"),
        }
    }

    /// Live job for `identity`
    pub fn lookup(&self, identity: &StreamIdentity) -> Option<Arc<StreamJob>> {
        self.registry.lookup(identity)
    }

    /// Stop the stream for `identity` and forget its heartbeat
    pub async fn release(&self, identity: &StreamIdentity) -> Option<Arc<StreamJob>> {
        self.ledger.remove(identity);
        self.registry.release(identity).await
    }

    /// Time since the last heartbeat for `identity`
    pub fn heartbeat_age(&self, identity: &StreamIdentity) -> Option<Duration> {
        self.ledger.get(identity).map(|beat| beat.last_seen.elapsed())
    }

    /// Status of every stream plus host metrics
    pub fn snapshot(&self) -> StatusSnapshot {
        let streams = self
            .registry
            .statuses()
            .into_iter()
            .map(|status| {
                let heartbeat_age_ms = self
                    .heartbeat_age(&status.identity)
                    .map(|age| age.as_millis() as u64);
                StreamStatus::from_job(status, heartbeat_age_ms)
            })
            .collect();

        StatusSnapshot::new(streams, collect_system_metrics(), self.registry.usage())
    }

    /// Stop the eviction loop, then every stream
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Eviction loop ended abnormally");
            }
        }

        self.ledger.clear();
        self.registry.shutdown().await;
        info!("Heartbeat janitor stopped");
    }
}

impl Drop for HeartbeatJanitor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

async fn run_eviction_loop(
    registry: Registry,
    ledger: Arc<Ledger>,
    overtime: Duration,
    tick: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stale: Vec<(StreamIdentity, Heartbeat)> = ledger
            .iter()
            .filter(|e| e.value().last_seen.elapsed() > overtime)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        for (identity, beat) in stale {
            // A touch since the scan keeps the entry
            let evicted = ledger
                .remove_if(&identity, |_, current| {
                    current.job_id == beat.job_id && current.last_seen == beat.last_seen
                })
                .is_some();
            if !evicted {
                continue;
            }

            warn!(stream = %identity, job = %beat.job_id, "Heartbeat overtime, stopping stream");
            let registry = registry.clone();
            tokio::spawn(async move {
                match registry.lookup(&identity) {
                    Some(job) if job.id() == beat.job_id => job.stop().await,
                    _ => debug!(stream = %identity, "Evicted stream already gone"),
                }
            });
        }
    }

    debug!("Eviction loop exited");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::gpu::StaticOracle;
    use crate::identity::Profile;
    use crate::job::test_support::FakeTranscoder;
    use crate::job::JobState;
    use tempfile::TempDir;

    const TEST_TICK: Duration = Duration::from_millis(100);

    fn janitor(dir: &TempDir, overtime: Duration) -> HeartbeatJanitor {
        let registry = Registry::new(
            FakeTranscoder::Ready.settings(dir.path()),
            Arc::new(StaticOracle::new(Vec::new())),
        );
        HeartbeatJanitor::start_with_tick(registry, overtime, TEST_TICK)
    }

    fn identity() -> StreamIdentity {
        StreamIdentity::new("127.0.0.1", 554, 1, Profile::Main)
    }

    fn resolution() -> Resolution {
        Resolution::new(480, 270)
    }

    // ========== Eviction Tests ==========

    #[tokio::test]
    async fn test_stale_stream_is_evicted() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_millis(300));

        let job = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();
        assert!(janitor.heartbeat_age(&identity()).is_some());

        tokio::time::timeout(Duration::from_secs(5), job.wait_terminated())
            .await
            .expect("stale stream was not evicted");

        assert_eq!(job.state(), JobState::Terminated);
        assert!(janitor.lookup(&identity()).is_none());
        assert!(janitor.heartbeat_age(&identity()).is_none());
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_touched_stream_survives() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_millis(500));

        let job = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            janitor.touch(&identity());
        }

        assert_eq!(job.state(), JobState::Running);
        janitor.shutdown().await;
        assert!(job.state().is_terminal());
    }

    #[tokio::test]
    async fn test_second_acquire_refreshes_same_job() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_secs(30));

        let first = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();
        let second = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_of_old_job_keeps_newer_heartbeat() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_secs(30));

        let old = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();

        let newer = Uuid::new_v4();
        janitor.ledger.insert(
            identity(),
            Heartbeat {
                last_seen: Instant::now(),
                job_id: newer,
            },
        );

        old.stop().await;
        assert_eq!(old.state(), JobState::Terminated);
        assert_eq!(janitor.ledger.get(&identity()).map(|b| b.job_id), Some(newer));

        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_and_unknown_touch() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_secs(30));

        janitor.touch(&identity());
        assert!(janitor.release(&identity()).await.is_none());

        let job = janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();
        let released = janitor.release(&identity()).await.unwrap();
        assert_eq!(released.id(), job.id());
        assert!(janitor.heartbeat_age(&identity()).is_none());
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_reports_streams() {
        let dir = TempDir::new().unwrap();
        let janitor = janitor(&dir, Duration::from_secs(30));

        janitor
            .acquire_with_heartbeat(identity(), resolution(), None)
            .await
            .unwrap();

        let snapshot = janitor.snapshot();
        assert_eq!(snapshot.streams.len(), 1);
        assert_eq!(snapshot.streams[0].state, "running");
        assert!(snapshot.streams[0].heartbeat_age_ms.is_some());
        assert_eq!(snapshot.vendor_usage.cpu, 1);

        janitor.shutdown().await;
        assert!(janitor.registry().is_empty());
    }
}
