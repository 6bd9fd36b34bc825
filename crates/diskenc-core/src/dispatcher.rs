//! Routes daemon notifications to the job registry and the outcome policy.

use crate::presenter::{decide, Decision, OutcomePresenter, Presentation};
use crate::registry::{DeviceJob, JobKey, JobRegistry, ProgressEffect, ProgressUpdate};
use crate::signal::{Notification, Signal};
use crate::taxonomy::{judge, Operation, Verdict};
use diskenc_provider::{DeviceId, JobKind, Presenter, ProgressSurface, SessionManager};
use log::info;
use std::sync::Arc;

/// Everything that happened while handling one terminal notification.
#[derive(Debug, Clone)]
pub struct TerminalReport {
    pub device: DeviceId,
    pub verdict: Verdict,
    pub decision: Decision,
    pub presentation: Presentation,
    /// The job evicted from the registry, if one was tracked.
    pub evicted: Option<DeviceJob>,
}

#[derive(Debug, Clone)]
pub enum Dispatched {
    Progress { key: JobKey, update: ProgressUpdate },
    Terminal(TerminalReport),
}

/// Owns the registry and applies every notification to it in arrival order.
///
/// With deferred reboot offers, a reboot-worthy result is reported as
/// `Presentation::RebootPending` and the caller runs
/// `OutcomePresenter::offer_reboot` itself, so the question never blocks
/// later notifications.
pub struct NotificationDispatcher<S, N, R> {
    registry: JobRegistry,
    surface: S,
    outcomes: Arc<OutcomePresenter<N, R>>,
    defer_reboot_offers: bool,
}

impl<S, N, R> NotificationDispatcher<S, N, R>
where
    S: ProgressSurface,
    N: Presenter,
    R: SessionManager,
{
    pub fn new(registry: JobRegistry, surface: S, outcomes: OutcomePresenter<N, R>) -> Self {
        Self {
            registry,
            surface,
            outcomes: Arc::new(outcomes),
            defer_reboot_offers: false,
        }
    }

    pub fn defer_reboot_offers(&mut self, defer: bool) {
        self.defer_reboot_offers = defer;
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn outcomes(&self) -> &OutcomePresenter<N, R> {
        &self.outcomes
    }

    /// Shared handle for answering deferred reboot offers off the dispatch path.
    pub fn shared_outcomes(&self) -> Arc<OutcomePresenter<N, R>> {
        Arc::clone(&self.outcomes)
    }

    pub fn has_any_active_job(&self) -> bool {
        self.registry.has_any_active_job()
    }

    pub fn dispatch(&mut self, signal: Signal) -> Dispatched {
        match signal.into_notification() {
            Notification::Progress {
                device,
                display_name,
                kind,
                progress,
            } => self.on_progress(device, &display_name, kind, progress),
            Notification::Terminal {
                device,
                display_name,
                operation,
                code,
            } => Dispatched::Terminal(self.on_terminal(device, &display_name, operation, code)),
        }
    }

    /// Tear down a job's indicator at the owner's request, before its terminal notification.
    pub fn close(&mut self, device: &DeviceId, kind: JobKind) -> Option<DeviceJob> {
        let job = self.registry.close(device, kind)?;
        self.surface.close(device, kind);
        Some(job)
    }

    fn on_progress(
        &mut self,
        device: DeviceId,
        display_name: &str,
        kind: JobKind,
        progress: f64,
    ) -> Dispatched {
        let update = self
            .registry
            .on_progress(&device, kind, display_name, progress);

        match update.effect {
            ProgressEffect::Started => {
                self.outcomes.presenter().restore_busy_cursor();
                let title = match kind {
                    JobKind::Encrypt => format!("Encrypting...{}", device.label(display_name)),
                    JobKind::Decrypt => format!("Decrypting...{}", device.label(display_name)),
                };
                info!("{kind} job started for {device}");
                self.surface.open(&device, kind, &title);
                self.surface.update(&device, kind, update.progress);
            }
            ProgressEffect::Advanced => self.surface.update(&device, kind, update.progress),
            ProgressEffect::Stale => {}
        }

        Dispatched::Progress {
            key: JobKey::new(device, kind),
            update,
        }
    }

    fn on_terminal(
        &mut self,
        device: DeviceId,
        display_name: &str,
        operation: Operation,
        code: i32,
    ) -> TerminalReport {
        self.outcomes.presenter().restore_busy_cursor();

        let evicted = operation.job_kind().and_then(|kind| {
            let job = self.registry.on_terminal(&device, kind)?;
            self.surface.close(&device, kind);
            Some(job)
        });

        let verdict = judge(operation, code);
        info!(
            "{operation} result for {device}: code {code} -> {}",
            verdict.outcome
        );
        let decision = decide(&verdict, &device.label(display_name));
        let presentation = if decision.offer_reboot && self.defer_reboot_offers {
            Presentation::RebootPending
        } else {
            self.outcomes.present(&decision)
        };

        TerminalReport {
            device,
            verdict,
            decision,
            presentation,
            evicted,
        }
    }
}
