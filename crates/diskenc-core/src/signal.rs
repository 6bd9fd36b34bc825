//! Daemon notification contract and the line-oriented wire form used by the agent.
//!
//! Each notification keeps the daemon's positional argument shape, so a
//! progress tick travels as
//! `{"signal":"EncryptProgress","args":["/dev/sda1","sda1",50.0]}`.

use crate::error::DiskencResult;
use crate::strategy::HookAnswer;
use crate::taxonomy::Operation;
use diskenc_provider::{DeviceId, JobKind};
use serde::{Deserialize, Serialize};

/// Channel names the orchestrator subscribes to.
pub const SUBSCRIBED_SIGNALS: [&str; 6] = [
    "PrepareEncryptDiskResult",
    "EncryptDiskResult",
    "EncryptProgress",
    "DecryptDiskResult",
    "DecryptProgress",
    "ChangePassphraseResult",
];

/// One asynchronous notification from the daemon.
///
/// Arguments are `(device, device_name, ..)`; the third string on the
/// four-argument results is reserved by the daemon and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "args")]
pub enum Signal {
    PrepareEncryptDiskResult(String, String, String, i32),
    EncryptDiskResult(String, String, i32),
    EncryptProgress(String, String, f64),
    DecryptDiskResult(String, String, String, i32),
    DecryptProgress(String, String, f64),
    // Older daemons emit the misspelt name.
    #[serde(alias = "ChangePassphressResult")]
    ChangePassphraseResult(String, String, String, i32),
}

/// A notification reduced to what the dispatcher acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Progress {
        device: DeviceId,
        display_name: String,
        kind: JobKind,
        progress: f64,
    },
    Terminal {
        device: DeviceId,
        display_name: String,
        operation: Operation,
        code: i32,
    },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::PrepareEncryptDiskResult(..) => SUBSCRIBED_SIGNALS[0],
            Signal::EncryptDiskResult(..) => SUBSCRIBED_SIGNALS[1],
            Signal::EncryptProgress(..) => SUBSCRIBED_SIGNALS[2],
            Signal::DecryptDiskResult(..) => SUBSCRIBED_SIGNALS[3],
            Signal::DecryptProgress(..) => SUBSCRIBED_SIGNALS[4],
            Signal::ChangePassphraseResult(..) => SUBSCRIBED_SIGNALS[5],
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Signal::PrepareEncryptDiskResult(device, ..)
            | Signal::EncryptDiskResult(device, ..)
            | Signal::EncryptProgress(device, ..)
            | Signal::DecryptDiskResult(device, ..)
            | Signal::DecryptProgress(device, ..)
            | Signal::ChangePassphraseResult(device, ..) => device,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Signal::EncryptProgress(..) | Signal::DecryptProgress(..)
        )
    }

    pub fn into_notification(self) -> Notification {
        match self {
            Signal::EncryptProgress(device, display_name, progress) => Notification::Progress {
                device: device.into(),
                display_name,
                kind: JobKind::Encrypt,
                progress,
            },
            Signal::DecryptProgress(device, display_name, progress) => Notification::Progress {
                device: device.into(),
                display_name,
                kind: JobKind::Decrypt,
                progress,
            },
            Signal::PrepareEncryptDiskResult(device, display_name, _, code) => {
                terminal(device, display_name, Operation::PreEncrypt, code)
            }
            Signal::EncryptDiskResult(device, display_name, code) => {
                terminal(device, display_name, Operation::Encrypt, code)
            }
            Signal::DecryptDiskResult(device, display_name, _, code) => {
                terminal(device, display_name, Operation::Decrypt, code)
            }
            Signal::ChangePassphraseResult(device, display_name, _, code) => {
                terminal(device, display_name, Operation::ChangePassphrase, code)
            }
        }
    }
}

fn terminal(device: String, display_name: String, operation: Operation, code: i32) -> Notification {
    Notification::Terminal {
        device: device.into(),
        display_name,
        operation,
        code,
    }
}

/// Device-password request sent by the daemon bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request")]
pub enum HookRequest {
    AcquireDevicePassword { device: String },
}

/// Anything that can arrive on one agent input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Signal(Signal),
    Request(HookRequest),
}

/// Reply line for a `HookRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookReply {
    pub handled: bool,
    pub cancelled: bool,
    pub secret: String,
}

impl From<HookAnswer> for HookReply {
    fn from(answer: HookAnswer) -> Self {
        Self {
            handled: answer.handled,
            cancelled: answer.cancelled,
            secret: answer.secret.as_str().to_owned(),
        }
    }
}

pub fn decode_line(line: &str) -> DiskencResult<Inbound> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_progress_with_positional_args() {
        let inbound =
            decode_line(r#"{"signal":"EncryptProgress","args":["/dev/sda1","sda1",50.0]}"#)
                .unwrap();
        assert_eq!(
            inbound,
            Inbound::Signal(Signal::EncryptProgress(
                "/dev/sda1".into(),
                "sda1".into(),
                50.0
            ))
        );
    }

    #[test]
    fn accepts_misspelt_change_passphrase_signal() {
        let inbound = decode_line(
            r#"{"signal":"ChangePassphressResult","args":["/dev/sdb2","home","",-4]}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Signal(signal) => {
                assert_eq!(signal.name(), "ChangePassphraseResult");
                assert_eq!(signal.device(), "/dev/sdb2");
            }
            other => panic!("unexpected inbound: {other:?}"),
        }
    }

    #[test]
    fn decodes_hook_request() {
        let inbound =
            decode_line(r#"{"request":"AcquireDevicePassword","device":"/dev/sda1"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Request(HookRequest::AcquireDevicePassword {
                device: "/dev/sda1".into()
            })
        );
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(decode_line(r#"{"signal":"EncryptDiskResult","args":["/dev/sda1",0]}"#).is_err());
        assert!(decode_line("not json").is_err());
    }

    #[test]
    fn serialises_in_wire_shape() {
        let line = serde_json::to_string(&Signal::DecryptDiskResult(
            "/dev/sda1".into(),
            "sda1".into(),
            String::new(),
            -1,
        ))
        .unwrap();
        assert_eq!(
            line,
            r#"{"signal":"DecryptDiskResult","args":["/dev/sda1","sda1","",-1]}"#
        );
    }

    #[test]
    fn notifications_map_to_operations() {
        let terminal = Signal::PrepareEncryptDiskResult(
            "/dev/sda1".into(),
            "sda1".into(),
            String::new(),
            0,
        );
        assert!(terminal.is_terminal());
        assert_eq!(
            terminal.into_notification(),
            Notification::Terminal {
                device: DeviceId::new("/dev/sda1"),
                display_name: "sda1".into(),
                operation: Operation::PreEncrypt,
                code: 0,
            }
        );

        let progress = Signal::DecryptProgress("/dev/sda1".into(), "sda1".into(), 5.0);
        assert!(!progress.is_terminal());
        assert!(matches!(
            progress.into_notification(),
            Notification::Progress {
                kind: JobKind::Decrypt,
                ..
            }
        ));
    }
}
