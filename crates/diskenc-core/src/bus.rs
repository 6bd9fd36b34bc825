//! Single-queue event loop that owns the dispatcher.
//!
//! Every notification is applied on one tokio task, in the order it was
//! published. Device-password requests and "reboot now?" questions are
//! answered on blocking workers so a pending prompt never holds up progress
//! or result handling.

use crate::dispatcher::{Dispatched, NotificationDispatcher};
use crate::error::{DiskencError, DiskencResult};
use crate::presenter::Presentation;
use crate::registry::DeviceJob;
use crate::signal::Signal;
use crate::strategy::{HookAnswer, PassphraseAcquirer};
use diskenc_provider::{
    DeviceId, KeyTypeSource, Presenter, ProgressSurface, SecretPrompt, SessionManager,
    TpmUnsealer,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Handler for the daemon's "acquire device password" request.
pub trait DevicePasswordHook: Send + Sync + 'static {
    fn request_device_password(&self, device: &DeviceId) -> HookAnswer;
}

impl<K, T, P, N> DevicePasswordHook for PassphraseAcquirer<K, T, P, N>
where
    K: KeyTypeSource<Error = DiskencError> + Send + Sync + 'static,
    T: TpmUnsealer<Error = DiskencError> + Send + Sync + 'static,
    P: SecretPrompt<Error = DiskencError> + Send + Sync + 'static,
    N: Presenter + Send + Sync + 'static,
{
    fn request_device_password(&self, device: &DeviceId) -> HookAnswer {
        self.answer(device)
    }
}

enum Command {
    Signal(Signal),
    Acquire {
        device: DeviceId,
        reply: oneshot::Sender<HookAnswer>,
    },
    ActiveJobs {
        reply: oneshot::Sender<Vec<DeviceJob>>,
    },
    Shutdown,
}

/// Cloneable handle for feeding the event loop.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventBus {
    fn send(&self, command: Command) -> DiskencResult<()> {
        self.tx
            .send(command)
            .map_err(|_| DiskencError::Bus("event loop has stopped".to_string()))
    }

    /// Queue a daemon notification for dispatch.
    pub fn publish(&self, signal: Signal) -> DiskencResult<()> {
        self.send(Command::Signal(signal))
    }

    /// Ask the password hook for `device` and wait for its answer.
    pub async fn acquire_password(&self, device: DeviceId) -> DiskencResult<HookAnswer> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Acquire { device, reply })?;
        answer
            .await
            .map_err(|_| DiskencError::Bus("password hook dropped its reply".to_string()))
    }

    /// Snapshot of the jobs currently in flight, taken after everything published so far.
    pub async fn active_jobs(&self) -> DiskencResult<Vec<DeviceJob>> {
        let (reply, jobs) = oneshot::channel();
        self.send(Command::ActiveJobs { reply })?;
        jobs.await
            .map_err(|_| DiskencError::Bus("event loop dropped the job snapshot".to_string()))
    }
}

struct EventLoop<S, N, R> {
    dispatcher: NotificationDispatcher<S, N, R>,
    hook: Arc<dyn DevicePasswordHook>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl<S, N, R> EventLoop<S, N, R>
where
    S: ProgressSurface,
    N: Presenter + Send + Sync + 'static,
    R: SessionManager + Send + Sync + 'static,
{
    async fn run(mut self) -> NotificationDispatcher<S, N, R> {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Signal(signal) => {
                    debug!("dispatching {} for {}", signal.name(), signal.device());
                    if let Dispatched::Terminal(report) = self.dispatcher.dispatch(signal) {
                        if report.presentation == Presentation::RebootPending {
                            let outcomes = self.dispatcher.shared_outcomes();
                            let device = report.device;
                            let decision = report.decision;
                            tokio::task::spawn_blocking(move || {
                                let presentation = outcomes.offer_reboot(&decision);
                                info!("reboot offer for {device}: {presentation:?}");
                            });
                        }
                    }
                }
                Command::Acquire { device, reply } => {
                    let hook = Arc::clone(&self.hook);
                    tokio::task::spawn_blocking(move || {
                        let answer = hook.request_device_password(&device);
                        if reply.send(answer).is_err() {
                            warn!("password request for {device} was abandoned");
                        }
                    });
                }
                Command::ActiveJobs { reply } => {
                    let _ = reply.send(self.dispatcher.registry().jobs().cloned().collect());
                }
                Command::Shutdown => break,
            }
        }

        if self.dispatcher.has_any_active_job() {
            info!(
                "event loop stopping with {} job(s) still in flight",
                self.dispatcher.registry().len()
            );
        }
        self.dispatcher
    }
}

/// Owns the running event loop for one orchestration session.
pub struct OrchestrationContext<S, N, R> {
    bus: EventBus,
    handle: JoinHandle<NotificationDispatcher<S, N, R>>,
}

impl<S, N, R> OrchestrationContext<S, N, R>
where
    S: ProgressSurface + Send + 'static,
    N: Presenter + Send + Sync + 'static,
    R: SessionManager + Send + Sync + 'static,
{
    /// Spawn the event loop on the current tokio runtime.
    ///
    /// Reboot offers from the dispatcher are deferred for the lifetime of the loop.
    pub fn start(
        mut dispatcher: NotificationDispatcher<S, N, R>,
        hook: Arc<dyn DevicePasswordHook>,
    ) -> Self {
        dispatcher.defer_reboot_offers(true);
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop {
            dispatcher,
            hook,
            rx,
        };
        let handle = tokio::spawn(event_loop.run());
        Self {
            bus: EventBus { tx },
            handle,
        }
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Drain everything queued so far, stop the loop, and hand back the dispatcher.
    pub async fn shutdown(self) -> DiskencResult<NotificationDispatcher<S, N, R>> {
        // The loop may already be gone if it panicked; the join below reports that.
        let _ = self.bus.send(Command::Shutdown);
        self.handle
            .await
            .map_err(|err| DiskencError::Bus(format!("event loop failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::OutcomePresenter;
    use crate::registry::JobRegistry;
    use diskenc_provider::{JobKind, Severity};
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use zeroize::Zeroizing;

    #[derive(Default)]
    struct Quiet {
        notices: Mutex<Vec<String>>,
    }

    impl ProgressSurface for Quiet {
        fn open(&self, _device: &DeviceId, _kind: JobKind, _title: &str) {}
        fn update(&self, _device: &DeviceId, _kind: JobKind, _progress: f64) {}
        fn close(&self, _device: &DeviceId, _kind: JobKind) {}
    }

    impl Presenter for Quiet {
        fn present(&self, title: &str, _message: &str, _severity: Severity) {
            self.notices.lock().unwrap().push(title.to_string());
        }

        fn confirm_reboot(&self, _title: &str, _message: &str) -> bool {
            false
        }

        fn restore_busy_cursor(&self) {}
    }

    impl SessionManager for Quiet {
        type Error = io::Error;

        fn request_reboot(&self) -> Result<(), io::Error> {
            Ok(())
        }
    }

    /// Blocks until the test releases it, like a user staring at a prompt.
    struct GatedHook {
        gate: Mutex<std::sync::mpsc::Receiver<&'static str>>,
    }

    impl DevicePasswordHook for GatedHook {
        fn request_device_password(&self, _device: &DeviceId) -> HookAnswer {
            match self.gate.lock().unwrap().recv() {
                Ok(secret) => HookAnswer {
                    handled: true,
                    secret: Zeroizing::new(secret.to_string()),
                    cancelled: false,
                },
                Err(_) => HookAnswer::unhandled(),
            }
        }
    }

    fn context(
        hook: Arc<dyn DevicePasswordHook>,
    ) -> (
        OrchestrationContext<Arc<Quiet>, Arc<Quiet>, Arc<Quiet>>,
        Arc<Quiet>,
    ) {
        let quiet = Arc::new(Quiet::default());
        let dispatcher = NotificationDispatcher::new(
            JobRegistry::new(Duration::from_secs(3)),
            quiet.clone(),
            OutcomePresenter::new(quiet.clone(), quiet.clone()),
        );
        (OrchestrationContext::start(dispatcher, hook), quiet)
    }

    fn progress(device: &str, value: f64) -> Signal {
        Signal::EncryptProgress(device.into(), "disk".into(), value)
    }

    #[tokio::test]
    async fn notifications_apply_in_publish_order() {
        let (_gate, rx) = std::sync::mpsc::channel();
        let (context, quiet) = context(Arc::new(GatedHook {
            gate: Mutex::new(rx),
        }));
        let bus = context.bus();

        bus.publish(progress("/dev/sda1", 10.0)).unwrap();
        bus.publish(progress("/dev/sda1", 60.0)).unwrap();
        bus.publish(progress("/dev/sdb1", 5.0)).unwrap();
        bus.publish(Signal::EncryptDiskResult(
            "/dev/sdb1".into(),
            "disk".into(),
            0,
        ))
        .unwrap();

        let jobs = bus.active_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key.device, DeviceId::new("/dev/sda1"));
        assert_eq!(jobs[0].progress, 60.0);

        let dispatcher = context.shutdown().await.unwrap();
        assert!(dispatcher.has_any_active_job());
        assert_eq!(quiet.notices.lock().unwrap().as_slice(), ["Encrypt done"]);
    }

    #[tokio::test]
    async fn pending_prompt_does_not_block_dispatch() {
        let (gate, rx) = std::sync::mpsc::channel();
        let (context, _quiet) = context(Arc::new(GatedHook {
            gate: Mutex::new(rx),
        }));
        let bus = context.bus();

        let waiting = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.acquire_password(DeviceId::new("/dev/sda1")).await })
        };

        bus.publish(progress("/dev/sdc1", 25.0)).unwrap();
        assert_eq!(bus.active_jobs().await.unwrap().len(), 1);
        assert!(!waiting.is_finished());

        gate.send("hunter2").unwrap();
        let answer = waiting.await.unwrap().unwrap();
        assert!(answer.handled);
        assert_eq!(answer.secret.as_str(), "hunter2");

        context.shutdown().await.unwrap();
    }

    /// Holds the reboot question open until the test answers it.
    struct GatedDialog {
        answer: Mutex<std::sync::mpsc::Receiver<bool>>,
        reboots: Mutex<std::sync::mpsc::Sender<()>>,
    }

    impl Presenter for GatedDialog {
        fn present(&self, _title: &str, _message: &str, _severity: Severity) {}

        fn confirm_reboot(&self, _title: &str, _message: &str) -> bool {
            self.answer.lock().unwrap().recv().unwrap_or(false)
        }

        fn restore_busy_cursor(&self) {}
    }

    impl SessionManager for GatedDialog {
        type Error = io::Error;

        fn request_reboot(&self) -> Result<(), io::Error> {
            let _ = self.reboots.lock().unwrap().send(());
            Ok(())
        }
    }

    #[tokio::test]
    async fn open_reboot_question_does_not_block_dispatch() {
        let (answer_tx, answer_rx) = std::sync::mpsc::channel();
        let (reboot_tx, reboot_rx) = std::sync::mpsc::channel();
        let dialog = Arc::new(GatedDialog {
            answer: Mutex::new(answer_rx),
            reboots: Mutex::new(reboot_tx),
        });
        let (_gate, rx) = std::sync::mpsc::channel();
        let dispatcher = NotificationDispatcher::new(
            JobRegistry::new(Duration::from_secs(3)),
            Arc::new(Quiet::default()),
            OutcomePresenter::new(dialog.clone(), dialog.clone()),
        );
        let context = OrchestrationContext::start(
            dispatcher,
            Arc::new(GatedHook {
                gate: Mutex::new(rx),
            }),
        );
        let bus = context.bus();

        bus.publish(Signal::DecryptDiskResult(
            "/dev/sda1".into(),
            "root".into(),
            String::new(),
            -1,
        ))
        .unwrap();
        bus.publish(progress("/dev/sdb1", 40.0)).unwrap();
        assert_eq!(bus.active_jobs().await.unwrap().len(), 1);
        assert!(reboot_rx.try_recv().is_err());

        answer_tx.send(true).unwrap();
        let rebooted = tokio::task::spawn_blocking(move || {
            reboot_rx.recv_timeout(Duration::from_secs(5))
        })
        .await
        .unwrap();
        assert!(rebooted.is_ok());

        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_an_error() {
        let (_gate, rx) = std::sync::mpsc::channel();
        let (context, _quiet) = context(Arc::new(GatedHook {
            gate: Mutex::new(rx),
        }));
        let bus = context.bus();
        context.shutdown().await.unwrap();

        let err = bus.publish(progress("/dev/sda1", 1.0)).unwrap_err();
        assert!(matches!(err, DiskencError::Bus(_)));
    }
}
