#![forbid(unsafe_code)]

//! Collaborator contracts shared across the disk-encryption orchestrator.
//!
//! The orchestration core only ever talks to the outside world through the
//! traits defined here, so hosts can plug in terminal, desktop, or test
//! implementations without touching job tracking or result handling.

pub mod device;
pub mod surface;

use std::fmt;

pub use device::{KeyTypeSource, TpmUnsealer};
pub use surface::{Presenter, ProgressSurface, PromptResponse, SecretPrompt, SessionManager};

/// Stable identity of a block device, as reported by the daemon (e.g. `/dev/sda1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Device path with the leading `/dev/` removed.
    pub fn short_name(&self) -> &str {
        self.0.strip_prefix("/dev/").unwrap_or(&self.0)
    }

    /// Human-facing label combining the daemon's display name and the short path,
    /// e.g. `Data(sda1)`.
    pub fn label(&self, display_name: &str) -> String {
        format!("{display_name}({})", self.short_name())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Long-running job families that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Encrypt,
    Decrypt,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Encrypt => f.write_str("encrypt"),
            JobKind::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Key-protection mode configured for a device.
///
/// The daemon reports this as an integer; codes outside the known set are
/// preserved in `Unsupported` so callers can report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecKeyType {
    PasswordOnly,
    TpmAndPin,
    TpmOnly,
    Unsupported(i32),
}

impl SecKeyType {
    pub const PASSWORD_ONLY_CODE: i32 = 0;
    pub const TPM_AND_PIN_CODE: i32 = 1;
    pub const TPM_ONLY_CODE: i32 = 2;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::PASSWORD_ONLY_CODE => SecKeyType::PasswordOnly,
            Self::TPM_AND_PIN_CODE => SecKeyType::TpmAndPin,
            Self::TPM_ONLY_CODE => SecKeyType::TpmOnly,
            other => SecKeyType::Unsupported(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            SecKeyType::PasswordOnly => Self::PASSWORD_ONLY_CODE,
            SecKeyType::TpmAndPin => Self::TPM_AND_PIN_CODE,
            SecKeyType::TpmOnly => Self::TPM_ONLY_CODE,
            SecKeyType::Unsupported(code) => code,
        }
    }
}

impl fmt::Display for SecKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecKeyType::PasswordOnly => f.write_str("password"),
            SecKeyType::TpmAndPin => f.write_str("tpm-pin"),
            SecKeyType::TpmOnly => f.write_str("tpm"),
            SecKeyType::Unsupported(code) => write!(f, "unsupported({code})"),
        }
    }
}

/// Which credential a modal prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Password,
    Pin,
}

/// Severity attached to user-facing notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}
