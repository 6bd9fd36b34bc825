//! Outcome presentation policy.
//!
//! `decide` is the policy table: it turns a classified result into the notice
//! the user should see. `OutcomePresenter` hands that notice to the host's
//! `Presenter` and, for the two reboot-worthy results, forwards an accepted
//! "reboot now" to the session manager.

use crate::taxonomy::{Operation, Outcome, Verdict};
use diskenc_provider::{Presenter, SecKeyType, SessionManager, Severity};
use log::{info, warn};

const CANCELLED_MESSAGE: &str = "User cancelled operation";
const WRONG_CREDENTIAL_MESSAGE: &str = "Wrong passphrase or PIN";
const RECOVERY_KEY_MESSAGE: &str = "Please use recovery key to unlock device.";

/// What to tell the user about one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Offer "reboot now / later" instead of a plain notice.
    pub offer_reboot: bool,
}

impl Decision {
    fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Info,
            offer_reboot: false,
        }
    }

    fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::info(title, message)
        }
    }

    fn reboot(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            offer_reboot: true,
            ..Self::info(title, message)
        }
    }
}

/// Policy table mapping (operation, outcome) to a user-facing decision.
///
/// `device_label` is the `name(short-path)` form produced by `DeviceId::label`.
pub fn decide(verdict: &Verdict, device_label: &str) -> Decision {
    match (verdict.operation, verdict.outcome) {
        (Operation::PreEncrypt, Outcome::Success) => Decision::reboot(
            "Preencrypt done",
            format!(
                "Device {device_label} has been preencrypt, please reboot to finish encryption."
            ),
        ),
        (Operation::Encrypt, Outcome::Success) => Decision::info(
            "Encrypt done",
            format!("Device {device_label} has been encrypted"),
        ),
        (Operation::Decrypt, Outcome::Success) => Decision::info(
            "Decrypt done",
            format!("Device {device_label} has been decrypted"),
        ),
        (Operation::ChangePassphrase, Outcome::Success) => Decision::info(
            "Change passphrase done",
            format!("{device_label}'s passphrase has been changed"),
        ),
        (Operation::Decrypt, Outcome::RebootRequired) => Decision::reboot(
            "Decrypt device",
            format!("Please reboot to decrypt device {device_label}."),
        ),
        (operation, Outcome::UserCancelled) => {
            Decision::info(cancelled_title(operation), CANCELLED_MESSAGE)
        }
        (Operation::Decrypt, Outcome::WrongCredential) => {
            Decision::error("Decrypt disk", WRONG_CREDENTIAL_MESSAGE)
        }
        (Operation::ChangePassphrase, Outcome::WrongCredential) => {
            Decision::error("Change passphrase failed", WRONG_CREDENTIAL_MESSAGE)
        }
        (operation, _) => failure(operation, device_label, verdict.code.raw()),
    }
}

fn cancelled_title(operation: Operation) -> &'static str {
    match operation {
        Operation::PreEncrypt | Operation::Encrypt => "Encrypt disk",
        Operation::Decrypt => "Decrypt disk",
        Operation::ChangePassphrase => "Change passphrase",
    }
}

fn failure(operation: Operation, device_label: &str, code: i32) -> Decision {
    let (title, verb) = match operation {
        Operation::PreEncrypt => ("Preencrypt failed", "preencrypt"),
        Operation::Encrypt => ("Encrypt failed", "encrypt"),
        Operation::Decrypt => ("Decrypt failed", "decrypt"),
        Operation::ChangePassphrase => ("Change passphrase failed", "change passphrase"),
    };
    Decision::error(
        title,
        format!(
            "Device {device_label} {verb} failed, please see log for more information.({code})"
        ),
    )
}

/// Notice shown when the password hook ends up with an empty secret.
pub fn recovery_key_notice(key_type: SecKeyType) -> Decision {
    let title = match key_type {
        SecKeyType::TpmAndPin => "Wrong PIN",
        SecKeyType::PasswordOnly => "Wrong passphrase",
        SecKeyType::TpmOnly | SecKeyType::Unsupported(_) => "TPM error",
    };
    Decision::info(title, RECOVERY_KEY_MESSAGE)
}

/// How a decision was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Notice,
    RebootDeclined,
    RebootRequested,
    /// The user accepted but the session manager refused.
    RebootFailed,
    /// The reboot question was handed to a worker and is answered later.
    RebootPending,
}

/// Delivers decisions to the host surface and the session manager.
pub struct OutcomePresenter<N, R> {
    presenter: N,
    session: R,
}

impl<N, R> OutcomePresenter<N, R>
where
    N: Presenter,
    R: SessionManager,
{
    pub fn new(presenter: N, session: R) -> Self {
        Self { presenter, session }
    }

    pub fn presenter(&self) -> &N {
        &self.presenter
    }

    pub fn session(&self) -> &R {
        &self.session
    }

    pub fn present(&self, decision: &Decision) -> Presentation {
        if !decision.offer_reboot {
            self.presenter
                .present(&decision.title, &decision.message, decision.severity);
            return Presentation::Notice;
        }
        self.offer_reboot(decision)
    }

    /// Ask "reboot now?" and forward an acceptance to the session manager.
    ///
    /// Blocks for as long as the user leaves the question open.
    pub fn offer_reboot(&self, decision: &Decision) -> Presentation {
        if !self
            .presenter
            .confirm_reboot(&decision.title, &decision.message)
        {
            return Presentation::RebootDeclined;
        }

        info!("reboot is confirmed...");
        match self.session.request_reboot() {
            Ok(()) => Presentation::RebootRequested,
            Err(err) => {
                warn!("reboot request failed: {err}");
                Presentation::RebootFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{codes, judge};
    use std::fmt;
    use std::sync::Mutex;

    const LABEL: &str = "Data(sda1)";

    #[test]
    fn pre_encrypt_success_offers_reboot() {
        let decision = decide(&judge(Operation::PreEncrypt, 0), LABEL);
        assert!(decision.offer_reboot);
        assert_eq!(decision.title, "Preencrypt done");
        assert_eq!(decision.severity, Severity::Info);
        assert!(decision.message.contains(LABEL));
    }

    #[test]
    fn decrypt_reboot_required_offers_reboot() {
        let verdict = judge(Operation::Decrypt, -(codes::REBOOT_REQUIRED as i32));
        let decision = decide(&verdict, LABEL);
        assert!(decision.offer_reboot);
        assert_eq!(decision.message, "Please reboot to decrypt device Data(sda1).");
    }

    #[test]
    fn only_two_decisions_offer_reboot() {
        let codes = [0, -1, -2, -3, -4, -99, 7];
        for op in Operation::ALL {
            for code in codes {
                let verdict = judge(op, code);
                let expected = matches!(
                    (op, verdict.outcome),
                    (Operation::PreEncrypt, Outcome::Success)
                        | (Operation::Decrypt, Outcome::RebootRequired)
                );
                assert_eq!(decide(&verdict, LABEL).offer_reboot, expected, "{op} {code}");
            }
        }
    }

    #[test]
    fn failures_carry_raw_code() {
        let decision = decide(&judge(Operation::Encrypt, -42), LABEL);
        assert_eq!(decision.title, "Encrypt failed");
        assert_eq!(decision.severity, Severity::Error);
        assert_eq!(
            decision.message,
            "Device Data(sda1) encrypt failed, please see log for more information.(-42)"
        );
    }

    #[test]
    fn cancellation_is_informational() {
        let decision = decide(
            &judge(Operation::ChangePassphrase, -(codes::USER_CANCELLED as i32)),
            LABEL,
        );
        assert_eq!(decision.title, "Change passphrase");
        assert_eq!(decision.message, "User cancelled operation");
        assert_eq!(decision.severity, Severity::Info);
    }

    #[test]
    fn wrong_credentials_are_errors() {
        let decrypt = decide(
            &judge(Operation::Decrypt, -(codes::WRONG_PASSPHRASE as i32)),
            LABEL,
        );
        assert_eq!(decrypt.severity, Severity::Error);
        assert_eq!(decrypt.message, "Wrong passphrase or PIN");

        let change = decide(
            &judge(
                Operation::ChangePassphrase,
                -(codes::CHANGE_PASSPHRASE_FAILED as i32),
            ),
            LABEL,
        );
        assert_eq!(change.title, "Change passphrase failed");
        assert_eq!(change.severity, Severity::Error);
    }

    #[test]
    fn recovery_notice_titles_follow_key_type() {
        assert_eq!(recovery_key_notice(SecKeyType::TpmAndPin).title, "Wrong PIN");
        assert_eq!(
            recovery_key_notice(SecKeyType::PasswordOnly).title,
            "Wrong passphrase"
        );
        assert_eq!(recovery_key_notice(SecKeyType::TpmOnly).title, "TPM error");
        assert_eq!(
            recovery_key_notice(SecKeyType::TpmOnly).message,
            "Please use recovery key to unlock device."
        );
    }

    #[derive(Default)]
    struct ScriptedSurface {
        accept_reboot: bool,
        notices: Mutex<Vec<String>>,
    }

    impl Presenter for ScriptedSurface {
        fn present(&self, title: &str, _message: &str, _severity: Severity) {
            self.notices.lock().unwrap().push(title.to_string());
        }

        fn confirm_reboot(&self, _title: &str, _message: &str) -> bool {
            self.accept_reboot
        }

        fn restore_busy_cursor(&self) {}
    }

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("refused")
        }
    }

    impl std::error::Error for Refused {}

    struct FlakySession {
        succeed: bool,
        requests: Mutex<u32>,
    }

    impl SessionManager for FlakySession {
        type Error = Refused;

        fn request_reboot(&self) -> Result<(), Refused> {
            *self.requests.lock().unwrap() += 1;
            if self.succeed {
                Ok(())
            } else {
                Err(Refused)
            }
        }
    }

    fn presenter(accept: bool, succeed: bool) -> OutcomePresenter<ScriptedSurface, FlakySession> {
        OutcomePresenter::new(
            ScriptedSurface {
                accept_reboot: accept,
                ..ScriptedSurface::default()
            },
            FlakySession {
                succeed,
                requests: Mutex::new(0),
            },
        )
    }

    #[test]
    fn accepted_reboot_reaches_session_manager() {
        let outcomes = presenter(true, true);
        let decision = decide(&judge(Operation::PreEncrypt, 0), LABEL);
        assert_eq!(outcomes.present(&decision), Presentation::RebootRequested);
        assert_eq!(*outcomes.session().requests.lock().unwrap(), 1);
        assert!(outcomes.presenter().notices.lock().unwrap().is_empty());
    }

    #[test]
    fn declined_reboot_skips_session_manager() {
        let outcomes = presenter(false, true);
        let decision = decide(&judge(Operation::PreEncrypt, 0), LABEL);
        assert_eq!(outcomes.present(&decision), Presentation::RebootDeclined);
        assert_eq!(*outcomes.session().requests.lock().unwrap(), 0);
    }

    #[test]
    fn refused_reboot_is_reported_not_raised() {
        let outcomes = presenter(true, false);
        let decision = decide(&judge(Operation::PreEncrypt, 0), LABEL);
        assert_eq!(outcomes.present(&decision), Presentation::RebootFailed);
    }

    #[test]
    fn plain_notices_go_to_presenter() {
        let outcomes = presenter(true, true);
        let decision = decide(&judge(Operation::Encrypt, 0), LABEL);
        assert_eq!(outcomes.present(&decision), Presentation::Notice);
        assert_eq!(
            outcomes.presenter().notices.lock().unwrap().as_slice(),
            ["Encrypt done"]
        );
    }
}
