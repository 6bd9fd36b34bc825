//! Contracts for device metadata and TPM-backed secrets.
//!
//! Both collaborators sit on the device-password hook path: the key type
//! decides which acquisition flow runs, and the unsealer turns a PIN (or
//! nothing, for TPM-only devices) into the real passphrase.

use crate::{DeviceId, SecKeyType};
use std::error::Error;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Lookup of the key-protection mode configured for a device.
pub trait KeyTypeSource {
    type Error: Error + Send + Sync + 'static;

    /// Return the configured key type for `device`.
    ///
    /// Unknown devices should be reported as `SecKeyType::Unsupported` rather
    /// than as an error so the hook can fail the request cleanly.
    fn key_type(&self, device: &DeviceId) -> Result<SecKeyType, Self::Error>;
}

/// Exchange an auxiliary value (a PIN, or empty for TPM-only) for a sealed passphrase.
pub trait TpmUnsealer {
    type Error: Error + Send + Sync + 'static;

    fn unseal_secret(
        &self,
        device: &DeviceId,
        auxiliary: &str,
    ) -> Result<Zeroizing<String>, Self::Error>;
}

impl<T> KeyTypeSource for Arc<T>
where
    T: KeyTypeSource + ?Sized,
{
    type Error = T::Error;

    fn key_type(&self, device: &DeviceId) -> Result<SecKeyType, Self::Error> {
        (**self).key_type(device)
    }
}

impl<T> TpmUnsealer for Arc<T>
where
    T: TpmUnsealer + ?Sized,
{
    type Error = T::Error;

    fn unseal_secret(
        &self,
        device: &DeviceId,
        auxiliary: &str,
    ) -> Result<Zeroizing<String>, Self::Error> {
        (**self).unseal_secret(device, auxiliary)
    }
}
