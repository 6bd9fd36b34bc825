//! Orchestration core for disk-encryption lifecycle jobs.
//!
//! The daemon does the actual work; this crate tracks which jobs are in
//! flight, classifies the daemon's result codes, decides what the user should
//! be told, and answers the daemon's device-password requests.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod presenter;
pub mod registry;
pub mod signal;
pub mod strategy;
pub mod taxonomy;

pub use bus::{DevicePasswordHook, EventBus, OrchestrationContext};
pub use config::{ConfigFormat, DiskencConfig, KeyTypeSetting};
pub use dispatcher::{Dispatched, NotificationDispatcher, TerminalReport};
pub use error::{DiskencError, DiskencResult};
pub use presenter::{decide, Decision, OutcomePresenter, Presentation};
pub use registry::{DeviceJob, JobKey, JobRegistry, JobState, ProgressEffect, ProgressUpdate};
pub use signal::{HookReply, HookRequest, Inbound, Notification, Signal, SUBSCRIBED_SIGNALS};
pub use strategy::{
    Acquisition, AcquisitionStrategy, HookAnswer, PassphraseAcquirer, UnlockKeyKind,
    UnlockKeyResult,
};
pub use taxonomy::{classify, judge, Operation, Outcome, ResultCode, Verdict};

pub use diskenc_provider::{DeviceId, JobKind, PromptMode, SecKeyType, Severity};
