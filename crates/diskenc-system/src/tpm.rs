//! TPM unsealing through an external helper.
//!
//! The helper is invoked as `<helper> <device>`. The PIN (empty for TPM-only
//! devices) is written to its stdin and the unsealed passphrase is read from
//! its stdout.

use crate::command::HelperCommand;
use diskenc_core::config::DiskencConfig;
use diskenc_core::error::{DiskencError, DiskencResult};
use diskenc_provider::{DeviceId, TpmUnsealer};
use log::debug;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct HelperTpmUnsealer {
    helper: HelperCommand,
}

impl HelperTpmUnsealer {
    pub fn new(helper_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            helper: HelperCommand::new(helper_path.as_ref(), timeout),
        }
    }

    pub fn from_config(config: &DiskencConfig) -> Self {
        Self::new(config.tpm_helper_path(), config.tpm_timeout())
    }

    pub fn helper_path(&self) -> &Path {
        self.helper.program()
    }
}

impl TpmUnsealer for HelperTpmUnsealer {
    type Error = DiskencError;

    fn unseal_secret(
        &self,
        device: &DeviceId,
        auxiliary: &str,
    ) -> DiskencResult<Zeroizing<String>> {
        debug!(
            "unsealing {device} via {}",
            self.helper.program().display()
        );
        let out = self
            .helper
            .run(&[device.as_str()], Some(auxiliary.as_bytes()))?;
        let stdout = Zeroizing::new(out.stdout.clone());

        if out.status != 0 {
            return Err(DiskencError::Tpm(classify_unseal_failure(
                device,
                &out.diagnostic(),
                out.status,
            )));
        }

        let secret = stdout.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            return Err(DiskencError::Tpm(format!(
                "helper returned no secret for {device}"
            )));
        }
        Ok(Zeroizing::new(secret.to_string()))
    }
}

fn classify_unseal_failure(device: &DeviceId, diagnostic: &str, status: i32) -> String {
    let lower = diagnostic.to_ascii_lowercase();
    let diagnostic = if diagnostic.is_empty() {
        "no additional output"
    } else {
        diagnostic
    };

    if lower.contains("lockout") || lower.contains("dictionary attack") {
        return format!(
            "TPM is in dictionary-attack lockout while unsealing {device}: {diagnostic} (exit code {status})"
        );
    }

    if lower.contains("authorization")
        || lower.contains("bad auth")
        || lower.contains("wrong pin")
        || lower.contains("auth fail")
    {
        return format!("TPM rejected the PIN for {device}: {diagnostic} (exit code {status})");
    }

    if lower.contains("pcr") || lower.contains("policy") {
        return format!(
            "TPM policy no longer matches for {device}: {diagnostic} (exit code {status})"
        );
    }

    if lower.contains("no such file") || lower.contains("not found") {
        return format!(
            "no sealed object is available for {device}: {diagnostic} (exit code {status})"
        );
    }

    format!("TPM unseal failed for {device}: {diagnostic} (exit code {status})")
}
