//! In-flight encrypt/decrypt jobs, at most one per (device, kind).
//!
//! Jobs are created by their first progress tick and evicted by their
//! terminal notification. Every terminal notification leaves a short-lived
//! tombstone on its key, whether or not a job was tracked, and all ticks for
//! a tombstoned key are dropped until the window closes. A tick reordered
//! behind its own terminal therefore cannot start a job that would never
//! see another terminal.

use diskenc_provider::{DeviceId, JobKind};
use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const PROGRESS_MIN: f64 = 0.0;
pub const PROGRESS_MAX: f64 = 100.0;

/// Registry key: one job per device and job kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub device: DeviceId,
    pub kind: JobKind,
}

impl JobKey {
    pub fn new(device: DeviceId, kind: JobKind) -> Self {
        Self { device, kind }
    }
}

/// Lifecycle of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Active,
    Terminal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceJob {
    pub key: JobKey,
    pub display_name: String,
    /// Last reported progress, clamped to 0..=100 and never decreasing.
    pub progress: f64,
    pub state: JobState,
}

impl DeviceJob {
    fn pending(key: JobKey, display_name: &str) -> Self {
        Self {
            key,
            display_name: display_name.to_string(),
            progress: PROGRESS_MIN,
            state: JobState::Pending,
        }
    }

    pub fn label(&self) -> String {
        self.key.device.label(&self.display_name)
    }
}

/// What a progress tick did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEffect {
    /// A new job was created for the key.
    Started,
    /// An existing job was updated.
    Advanced,
    /// The tick belonged to a job that already finished and was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub effect: ProgressEffect,
    /// Progress as exposed after the update (the final value for stale ticks).
    pub progress: f64,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    final_progress: f64,
    at: Instant,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobKey, DeviceJob>,
    tombstones: HashMap<JobKey, Tombstone>,
    stale_window: Duration,
}

impl JobRegistry {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            tombstones: HashMap::new(),
            stale_window,
        }
    }

    /// Record a progress tick, creating the job on its first tick.
    pub fn on_progress(
        &mut self,
        device: &DeviceId,
        kind: JobKind,
        display_name: &str,
        progress: f64,
    ) -> ProgressUpdate {
        self.on_progress_at(device, kind, display_name, progress, Instant::now())
    }

    pub(crate) fn on_progress_at(
        &mut self,
        device: &DeviceId,
        kind: JobKind,
        display_name: &str,
        progress: f64,
        now: Instant,
    ) -> ProgressUpdate {
        self.prune_tombstones(now);
        let key = JobKey::new(device.clone(), kind);
        let clamped = clamp_progress(progress);

        if let Some(job) = self.jobs.get_mut(&key) {
            if let Some(value) = clamped {
                job.progress = job.progress.max(value);
            }
            return ProgressUpdate {
                effect: ProgressEffect::Advanced,
                progress: job.progress,
            };
        }

        if let Some(tombstone) = self.tombstones.get(&key) {
            debug!("ignoring late {kind} progress for {device}");
            return ProgressUpdate {
                effect: ProgressEffect::Stale,
                progress: tombstone.final_progress,
            };
        }

        let mut job = DeviceJob::pending(key.clone(), display_name);
        job.state = JobState::Active;
        job.progress = clamped.unwrap_or(PROGRESS_MIN);
        let progress = job.progress;
        self.jobs.insert(key, job);
        ProgressUpdate {
            effect: ProgressEffect::Started,
            progress,
        }
    }

    /// Evict the job for (device, kind) and tombstone the key.
    ///
    /// The key is tombstoned even when nothing was tracked, which covers jobs
    /// that fail before their first tick arrives.
    pub fn on_terminal(&mut self, device: &DeviceId, kind: JobKind) -> Option<DeviceJob> {
        self.on_terminal_at(device, kind, Instant::now())
    }

    pub(crate) fn on_terminal_at(
        &mut self,
        device: &DeviceId,
        kind: JobKind,
        now: Instant,
    ) -> Option<DeviceJob> {
        self.prune_tombstones(now);
        let key = JobKey::new(device.clone(), kind);
        let evicted = self.jobs.remove(&key).map(|mut job| {
            job.state = JobState::Terminal;
            job
        });
        self.tombstones.insert(
            key,
            Tombstone {
                final_progress: evicted.as_ref().map_or(PROGRESS_MIN, |job| job.progress),
                at: now,
            },
        );
        evicted
    }

    /// Explicitly drop a job without a terminal notification (e.g. the owner closed it).
    pub fn close(&mut self, device: &DeviceId, kind: JobKind) -> Option<DeviceJob> {
        self.jobs.remove(&JobKey::new(device.clone(), kind))
    }

    pub fn has_any_active_job(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn job(&self, device: &DeviceId, kind: JobKind) -> Option<&DeviceJob> {
        self.jobs.get(&JobKey::new(device.clone(), kind))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &DeviceJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn prune_tombstones(&mut self, now: Instant) {
        let window = self.stale_window;
        self.tombstones
            .retain(|_, tombstone| now.saturating_duration_since(tombstone.at) < window);
    }
}

/// Clamp to 0..=100. NaN carries no information and yields `None`.
fn clamp_progress(progress: f64) -> Option<f64> {
    if progress.is_nan() {
        None
    } else {
        Some(progress.clamp(PROGRESS_MIN, PROGRESS_MAX))
    }
}
