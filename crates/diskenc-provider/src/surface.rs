//! Contracts for everything the user sees or confirms.
//!
//! Rendering is entirely up to the host. Notices and progress indicators are
//! fire-and-forget; prompts and the reboot confirmation block their caller
//! until the user answers.

use crate::{DeviceId, JobKind, PromptMode, Severity};
use std::error::Error;
use std::sync::Arc;
use zeroize::Zeroizing;

/// What a modal credential prompt returned.
#[derive(Debug, Clone)]
pub struct PromptResponse {
    /// Text the user typed. Empty when the prompt was dismissed.
    pub entered: Zeroizing<String>,
    /// Kind of secret actually entered. A PIN prompt may hand back a raw
    /// passphrase when the user picked the fallback path.
    pub mode: PromptMode,
    /// `false` when the user cancelled.
    pub accepted: bool,
}

impl PromptResponse {
    pub fn accepted(mode: PromptMode, entered: impl Into<String>) -> Self {
        Self {
            entered: Zeroizing::new(entered.into()),
            mode,
            accepted: true,
        }
    }

    pub fn cancelled(mode: PromptMode) -> Self {
        Self {
            entered: Zeroizing::new(String::new()),
            mode,
            accepted: false,
        }
    }
}

/// Modal credential prompt. Each call presents one prompt and releases it before returning.
pub trait SecretPrompt {
    type Error: Error + Send + Sync + 'static;

    fn prompt_for_secret(&self, mode: PromptMode) -> Result<PromptResponse, Self::Error>;
}

/// Notice and confirmation surface.
pub trait Presenter {
    /// Show an informational or error notice.
    fn present(&self, title: &str, message: &str, severity: Severity);

    /// Ask "reboot now / later". Returns `true` when the user picked "reboot now".
    fn confirm_reboot(&self, title: &str, message: &str) -> bool;

    /// Drop any busy indicator left over from submitting a request to the daemon.
    fn restore_busy_cursor(&self);
}

/// Session-manager access used after the user accepts a reboot.
pub trait SessionManager {
    type Error: Error + Send + Sync + 'static;

    /// Request a reboot without waiting for it to happen.
    fn request_reboot(&self) -> Result<(), Self::Error>;
}

/// Per-job progress indicator, keyed by device and job kind.
pub trait ProgressSurface {
    fn open(&self, device: &DeviceId, kind: JobKind, title: &str);

    fn update(&self, device: &DeviceId, kind: JobKind, progress: f64);

    fn close(&self, device: &DeviceId, kind: JobKind);
}

impl<T> SecretPrompt for Arc<T>
where
    T: SecretPrompt + ?Sized,
{
    type Error = T::Error;

    fn prompt_for_secret(&self, mode: PromptMode) -> Result<PromptResponse, Self::Error> {
        (**self).prompt_for_secret(mode)
    }
}

impl<T> Presenter for Arc<T>
where
    T: Presenter + ?Sized,
{
    fn present(&self, title: &str, message: &str, severity: Severity) {
        (**self).present(title, message, severity)
    }

    fn confirm_reboot(&self, title: &str, message: &str) -> bool {
        (**self).confirm_reboot(title, message)
    }

    fn restore_busy_cursor(&self) {
        (**self).restore_busy_cursor()
    }
}

impl<T> SessionManager for Arc<T>
where
    T: SessionManager + ?Sized,
{
    type Error = T::Error;

    fn request_reboot(&self) -> Result<(), Self::Error> {
        (**self).request_reboot()
    }
}

impl<T> ProgressSurface for Arc<T>
where
    T: ProgressSurface + ?Sized,
{
    fn open(&self, device: &DeviceId, kind: JobKind, title: &str) {
        (**self).open(device, kind, title)
    }

    fn update(&self, device: &DeviceId, kind: JobKind, progress: f64) {
        (**self).update(device, kind, progress)
    }

    fn close(&self, device: &DeviceId, kind: JobKind) {
        (**self).close(device, kind)
    }
}
