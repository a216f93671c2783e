//! Stream registry
//!
//! Concurrent map from [`StreamIdentity`] to its live [`StreamJob`]. At most
//! one non-terminal job exists per identity: concurrent acquires race on a
//! single insert and every loser returns the winner's job. Each job removes
//! its own entry from its terminal transition through a weak back-reference,
//! so the registry holds the only strong reference to the job map.

use crate::concurrency::VendorUsage;
use crate::config::Config;
use crate::gpu::GpuOracle;
use crate::identity::{Credentials, Resolution, StreamIdentity};
use crate::job::{JobError, JobSettings, JobStatus, StartContext, StreamJob};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

struct RegistryInner {
    jobs: DashMap<StreamIdentity, Arc<StreamJob>>,
    settings: JobSettings,
    oracle: Arc<dyn GpuOracle>,
    default_credentials: Option<Credentials>,
    closed: AtomicBool,
}

/// Keyed registry of transcode jobs
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(settings: JobSettings, oracle: Arc<dyn GpuOracle>) -> Self {
        Self::with_default_credentials(settings, oracle, None)
    }

    /// Registry whose jobs fall back to `credentials` when a request carries none
    pub fn with_default_credentials(
        settings: JobSettings,
        oracle: Arc<dyn GpuOracle>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: DashMap::new(),
                settings,
                oracle,
                default_credentials: credentials,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build a registry from configuration
    pub fn from_config(cfg: &Config, oracle: Arc<dyn GpuOracle>) -> Self {
        let credentials = cfg.stream.username.as_ref().map(|user| {
            Credentials::new(user.clone(), cfg.stream.password.clone().unwrap_or_default())
        });
        Self::with_default_credentials(JobSettings::from_config(cfg), oracle, credentials)
    }

    pub fn settings(&self) -> &JobSettings {
        &self.inner.settings
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Return the live job for `identity`, starting one when absent
    ///
    /// Only the caller that inserts the job starts it and waits for
    /// readiness. A cache hit returns the existing job as is; use
    /// [`StreamJob::await_ready`] to wait for a job still starting.
    /// Fails with [`JobError::Closed`] once [`Registry::shutdown`] began.
    pub async fn acquire(
        &self,
        identity: StreamIdentity,
        resolution: Resolution,
        credentials: Option<Credentials>,
    ) -> Result<Arc<StreamJob>, JobError> {
        let job = loop {
            if self.is_closed() {
                return Err(JobError::Closed);
            }
            if let Some(existing) = self.inner.jobs.get(&identity).map(|e| Arc::clone(e.value())) {
                if !existing.state().is_terminal() {
                    debug!(stream = %identity, job = %existing.id(), "Reusing live job");
                    return Ok(existing);
                }
                self.inner
                    .jobs
                    .remove_if(&identity, |_, stored| stored.id() == existing.id());
                continue;
            }

            let candidate = Arc::new(StreamJob::new(identity.clone(), &self.inner.settings.base_dir));
            match self.inner.jobs.entry(identity.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&candidate));
                    break candidate;
                }
            }
        };

        // Shutdown may have taken its snapshot before this insert
        if self.is_closed() {
            self.remove_job(&job);
            return Err(JobError::Closed);
        }

        self.watch_exit(&job);

        let usage = self.usage_excluding(&job);
        let ctx = StartContext {
            settings: &self.inner.settings,
            oracle: Arc::clone(&self.inner.oracle),
            usage,
            resolution,
            credentials: credentials.or_else(|| self.inner.default_credentials.clone()),
        };

        match job.start(ctx).await {
            Ok(()) => {
                info!(stream = %identity, job = %job.id(), "Stream started");
                Ok(job)
            }
            Err(e) => {
                self.remove_job(&job);
                Err(e)
            }
        }
    }

    /// Remove the entry when the job terminates, unless it was replaced
    fn watch_exit(&self, job: &Arc<StreamJob>) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        job.on_exit(Box::new(move |job| {
            if let Some(inner) = registry.upgrade() {
                let removed = inner
                    .jobs
                    .remove_if(job.identity(), |_, stored| stored.id() == job.id())
                    .is_some();
                if removed {
                    debug!(stream = %job.identity(), job = %job.id(), "Removed terminated job");
                }
            }
        }));
    }

    fn remove_job(&self, job: &StreamJob) {
        self.inner
            .jobs
            .remove_if(job.identity(), |_, stored| stored.id() == job.id());
    }

    /// Live job for `identity`
    pub fn lookup(&self, identity: &StreamIdentity) -> Option<Arc<StreamJob>> {
        self.inner
            .jobs
            .get(identity)
            .map(|e| Arc::clone(e.value()))
            .filter(|job| !job.state().is_terminal())
    }

    /// Gracefully stop the job for `identity` and return it
    pub async fn release(&self, identity: &StreamIdentity) -> Option<Arc<StreamJob>> {
        let job = self.inner.jobs.get(identity).map(|e| Arc::clone(e.value()));
        match job {
            Some(job) => {
                job.stop().await;
                Some(job)
            }
            None => {
                warn!(stream = %identity, "Cannot find stream to release");
                None
            }
        }
    }

    /// Encoder usage across all live jobs
    pub fn usage(&self) -> VendorUsage {
        self.inner
            .jobs
            .iter()
            .filter_map(|e| e.value().encoder_vendor())
            .collect()
    }

    fn usage_excluding(&self, job: &StreamJob) -> VendorUsage {
        self.inner
            .jobs
            .iter()
            .filter(|e| e.value().id() != job.id())
            .filter_map(|e| e.value().encoder_vendor())
            .collect()
    }

    /// Status of every registered job
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.inner.jobs.iter().map(|e| e.value().status()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Close admission, then stop every registered job and wait until each is terminal
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        let jobs: Vec<Arc<StreamJob>> = self
            .inner
            .jobs
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        if jobs.is_empty() {
            return;
        }
        info!(count = jobs.len(), "Stopping all streams");

        let mut stops = JoinSet::new();
        for job in jobs {
            stops.spawn(async move {
                job.stop().await;
                job.wait_terminated().await;
            });
        }
        while stops.join_next().await.is_some() {}
    }
}
