//! Passphrase acquisition for the daemon's device-password hook.
//!
//! The device's key type selects one of three flows. Whatever the flow, an
//! empty secret that the user did not cancel is never handed back: the user
//! is pointed at the recovery key and the request is turned into a cancel.

use crate::error::{DiskencError, DiskencResult};
use crate::presenter::recovery_key_notice;
use diskenc_provider::{
    DeviceId, KeyTypeSource, Presenter, PromptMode, PromptResponse, SecKeyType, SecretPrompt,
    TpmUnsealer,
};
use log::{debug, warn};
use zeroize::Zeroizing;

/// Kind of secret a prompt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockKeyKind {
    Pin,
    Password,
}

/// Result of one prompt interaction.
#[derive(Debug, Clone)]
pub enum UnlockKeyResult {
    Key {
        kind: UnlockKeyKind,
        secret: Zeroizing<String>,
    },
    Cancelled,
}

impl From<PromptResponse> for UnlockKeyResult {
    fn from(response: PromptResponse) -> Self {
        if !response.accepted {
            return UnlockKeyResult::Cancelled;
        }
        let kind = match response.mode {
            PromptMode::Pin => UnlockKeyKind::Pin,
            PromptMode::Password => UnlockKeyKind::Password,
        };
        UnlockKeyResult::Key {
            kind,
            secret: response.entered,
        }
    }
}

/// Secret handed back to the daemon, or a cancellation.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub secret: Zeroizing<String>,
    pub cancelled: bool,
    /// Set when an empty, non-cancelled secret was converted into a cancel.
    pub wrong_credential: bool,
}

impl Acquisition {
    fn secret(secret: Zeroizing<String>) -> Self {
        Self {
            secret,
            cancelled: false,
            wrong_credential: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            secret: Zeroizing::new(String::new()),
            cancelled: true,
            wrong_credential: false,
        }
    }
}

/// Acquisition flow selected from the device's key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStrategy {
    Password,
    TpmAndPin,
    TpmOnly,
}

impl AcquisitionStrategy {
    /// Pick the flow for `key_type`; unsupported types fail without prompting.
    pub fn for_key_type(device: &DeviceId, key_type: SecKeyType) -> DiskencResult<Self> {
        match key_type {
            SecKeyType::PasswordOnly => Ok(AcquisitionStrategy::Password),
            SecKeyType::TpmAndPin => Ok(AcquisitionStrategy::TpmAndPin),
            SecKeyType::TpmOnly => Ok(AcquisitionStrategy::TpmOnly),
            SecKeyType::Unsupported(raw) => Err(DiskencError::UnsupportedKeyType {
                device: device.to_string(),
                raw,
            }),
        }
    }

    pub fn run<T, P>(self, device: &DeviceId, tpm: &T, prompt: &P) -> DiskencResult<Acquisition>
    where
        T: TpmUnsealer<Error = DiskencError>,
        P: SecretPrompt<Error = DiskencError>,
    {
        match self {
            AcquisitionStrategy::Password => {
                match UnlockKeyResult::from(prompt.prompt_for_secret(PromptMode::Password)?) {
                    UnlockKeyResult::Key { secret, .. } => Ok(Acquisition::secret(secret)),
                    UnlockKeyResult::Cancelled => Ok(Acquisition::cancelled()),
                }
            }
            AcquisitionStrategy::TpmAndPin => {
                match UnlockKeyResult::from(prompt.prompt_for_secret(PromptMode::Pin)?) {
                    UnlockKeyResult::Key {
                        kind: UnlockKeyKind::Pin,
                        secret,
                    } => Ok(Acquisition::secret(unseal_or_empty(tpm, device, &secret))),
                    UnlockKeyResult::Key {
                        kind: UnlockKeyKind::Password,
                        secret,
                    } => Ok(Acquisition::secret(secret)),
                    UnlockKeyResult::Cancelled => Ok(Acquisition::cancelled()),
                }
            }
            AcquisitionStrategy::TpmOnly => {
                Ok(Acquisition::secret(unseal_or_empty(tpm, device, "")))
            }
        }
    }
}

/// A failed unseal is reported as an empty secret so the recovery-key path kicks in.
fn unseal_or_empty<T>(tpm: &T, device: &DeviceId, auxiliary: &str) -> Zeroizing<String>
where
    T: TpmUnsealer<Error = DiskencError>,
{
    match tpm.unseal_secret(device, auxiliary) {
        Ok(secret) => secret,
        Err(err) => {
            warn!("TPM unseal for {device} failed: {err}");
            Zeroizing::new(String::new())
        }
    }
}

/// Answer returned to the daemon's device-password request.
#[derive(Debug, Clone)]
pub struct HookAnswer {
    /// `false` when this handler could not serve the request at all
    /// (unsupported key type, lookup or prompt failure).
    pub handled: bool,
    pub secret: Zeroizing<String>,
    pub cancelled: bool,
}

impl HookAnswer {
    pub fn unhandled() -> Self {
        Self {
            handled: false,
            secret: Zeroizing::new(String::new()),
            cancelled: false,
        }
    }
}

impl From<Acquisition> for HookAnswer {
    fn from(acquisition: Acquisition) -> Self {
        Self {
            handled: true,
            secret: acquisition.secret,
            cancelled: acquisition.cancelled,
        }
    }
}

/// Runs the acquisition flow for a device and enforces the empty-secret policy.
pub struct PassphraseAcquirer<K, T, P, N> {
    key_types: K,
    tpm: T,
    prompt: P,
    presenter: N,
}

impl<K, T, P, N> PassphraseAcquirer<K, T, P, N>
where
    K: KeyTypeSource<Error = DiskencError>,
    T: TpmUnsealer<Error = DiskencError>,
    P: SecretPrompt<Error = DiskencError>,
    N: Presenter,
{
    pub fn new(key_types: K, tpm: T, prompt: P, presenter: N) -> Self {
        Self {
            key_types,
            tpm,
            prompt,
            presenter,
        }
    }

    /// Acquire the secret for `device`.
    ///
    /// # Errors
    /// `DiskencError::UnsupportedKeyType` when the device's key type has no
    /// flow; lookup and prompt failures propagate unchanged.
    pub fn acquire(&self, device: &DeviceId) -> DiskencResult<Acquisition> {
        let key_type = self.key_types.key_type(device)?;
        let strategy = AcquisitionStrategy::for_key_type(device, key_type)?;
        debug!("acquiring passphrase for {device} via {strategy:?}");

        let mut acquisition = strategy.run(device, &self.tpm, &self.prompt)?;
        if acquisition.secret.is_empty() && !acquisition.cancelled {
            let notice = recovery_key_notice(key_type);
            self.presenter
                .present(&notice.title, &notice.message, notice.severity);
            acquisition.cancelled = true;
            acquisition.wrong_credential = true;
        }
        Ok(acquisition)
    }

    /// Hook entry point: never fails, reports problems as an unhandled answer.
    pub fn answer(&self, device: &DeviceId) -> HookAnswer {
        match self.acquire(device) {
            Ok(acquisition) => acquisition.into(),
            Err(err) => {
                warn!("device password request for {device} not handled: {err}");
                HookAnswer::unhandled()
            }
        }
    }
}
