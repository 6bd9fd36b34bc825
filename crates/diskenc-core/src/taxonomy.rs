//! Result-code classification for daemon terminal notifications.
//!
//! The daemon reports results as signed integers and reuses the same
//! magnitudes across operations, so the mapping lives in one rule table.
//! Codes are normalised once into a magnitude and a sign; nothing else in the
//! crate flips signs.

use diskenc_provider::JobKind;
use std::fmt;

/// Daemon result magnitudes.
pub mod codes {
    pub const SUCCESS: u32 = 0;
    pub const REBOOT_REQUIRED: u32 = 1;
    pub const USER_CANCELLED: u32 = 2;
    pub const WRONG_PASSPHRASE: u32 = 3;
    pub const CHANGE_PASSPHRASE_FAILED: u32 = 4;
}

/// Operations the daemon reports terminal results for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PreEncrypt,
    Encrypt,
    Decrypt,
    ChangePassphrase,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::PreEncrypt,
        Operation::Encrypt,
        Operation::Decrypt,
        Operation::ChangePassphrase,
    ];

    /// Job family tracked by the registry, if this operation reports progress.
    pub fn job_kind(self) -> Option<JobKind> {
        match self {
            Operation::Encrypt => Some(JobKind::Encrypt),
            Operation::Decrypt => Some(JobKind::Decrypt),
            Operation::PreEncrypt | Operation::ChangePassphrase => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::PreEncrypt => "pre-encrypt",
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::ChangePassphrase => "change-passphrase",
        };
        f.write_str(name)
    }
}

/// Semantic outcome of a terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    RebootRequired,
    UserCancelled,
    WrongCredential,
    /// Unclassified failure; carries the raw code for diagnostics.
    OperationFailed(i32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::RebootRequired => f.write_str("reboot-required"),
            Outcome::UserCancelled => f.write_str("user-cancelled"),
            Outcome::WrongCredential => f.write_str("wrong-credential"),
            Outcome::OperationFailed(code) => write!(f, "failed({code})"),
        }
    }
}

/// A raw daemon code split into magnitude and sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode {
    raw: i32,
}

impl ResultCode {
    pub fn new(raw: i32) -> Self {
        Self { raw }
    }

    pub fn raw(self) -> i32 {
        self.raw
    }

    pub fn magnitude(self) -> u32 {
        self.raw.unsigned_abs()
    }

    /// `true` when the daemon used the negated (failure) form.
    pub fn is_negative(self) -> bool {
        self.raw < 0
    }
}

impl From<i32> for ResultCode {
    fn from(raw: i32) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, Copy)]
enum SignRule {
    Any,
    NegativeOnly,
}

impl SignRule {
    fn admits(self, code: ResultCode) -> bool {
        match self {
            SignRule::Any => true,
            SignRule::NegativeOnly => code.is_negative(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    operation: Operation,
    magnitude: u32,
    sign: SignRule,
    outcome: Outcome,
}

const fn rule(operation: Operation, magnitude: u32, sign: SignRule, outcome: Outcome) -> Rule {
    Rule {
        operation,
        magnitude,
        sign,
        outcome,
    }
}

const RULES: &[Rule] = &[
    rule(Operation::PreEncrypt, codes::SUCCESS, SignRule::Any, Outcome::Success),
    rule(Operation::PreEncrypt, codes::USER_CANCELLED, SignRule::Any, Outcome::UserCancelled),
    rule(Operation::Encrypt, codes::SUCCESS, SignRule::Any, Outcome::Success),
    rule(Operation::Decrypt, codes::SUCCESS, SignRule::Any, Outcome::Success),
    rule(Operation::Decrypt, codes::USER_CANCELLED, SignRule::Any, Outcome::UserCancelled),
    rule(
        Operation::Decrypt,
        codes::REBOOT_REQUIRED,
        SignRule::NegativeOnly,
        Outcome::RebootRequired,
    ),
    rule(Operation::Decrypt, codes::WRONG_PASSPHRASE, SignRule::Any, Outcome::WrongCredential),
    rule(Operation::ChangePassphrase, codes::SUCCESS, SignRule::Any, Outcome::Success),
    rule(
        Operation::ChangePassphrase,
        codes::USER_CANCELLED,
        SignRule::Any,
        Outcome::UserCancelled,
    ),
    rule(
        Operation::ChangePassphrase,
        codes::CHANGE_PASSPHRASE_FAILED,
        SignRule::Any,
        Outcome::WrongCredential,
    ),
];

/// Map a daemon result code to an outcome. Total: unmatched codes become `OperationFailed`.
pub fn classify(operation: Operation, code: i32) -> Outcome {
    let code = ResultCode::new(code);
    RULES
        .iter()
        .find(|rule| {
            rule.operation == operation
                && rule.magnitude == code.magnitude()
                && rule.sign.admits(code)
        })
        .map(|rule| rule.outcome)
        .unwrap_or(Outcome::OperationFailed(code.raw()))
}

/// Classified terminal result, carrying enough context for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub operation: Operation,
    pub code: ResultCode,
    pub outcome: Outcome,
}

pub fn judge(operation: Operation, code: i32) -> Verdict {
    Verdict {
        operation,
        code: ResultCode::new(code),
        outcome: classify(operation, code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn neg(magnitude: u32) -> i32 {
        -(magnitude as i32)
    }

    #[test]
    fn zero_is_success_everywhere() {
        for op in Operation::ALL {
            assert_eq!(classify(op, 0), Outcome::Success, "{op}");
        }
    }

    #[test]
    fn cancellation_is_recognised_except_for_encrypt() {
        let cancelled = neg(codes::USER_CANCELLED);
        assert_eq!(classify(Operation::PreEncrypt, cancelled), Outcome::UserCancelled);
        assert_eq!(classify(Operation::Decrypt, cancelled), Outcome::UserCancelled);
        assert_eq!(
            classify(Operation::ChangePassphrase, cancelled),
            Outcome::UserCancelled
        );
        assert_eq!(
            classify(Operation::Encrypt, cancelled),
            Outcome::OperationFailed(cancelled)
        );
    }

    #[test]
    fn magnitude_matching_ignores_sign() {
        let positive = codes::USER_CANCELLED as i32;
        assert_eq!(classify(Operation::Decrypt, positive), Outcome::UserCancelled);
        assert_eq!(
            classify(Operation::Decrypt, codes::WRONG_PASSPHRASE as i32),
            Outcome::WrongCredential
        );
    }

    #[test]
    fn reboot_required_only_for_negative_decrypt() {
        let reboot = neg(codes::REBOOT_REQUIRED);
        assert_eq!(classify(Operation::Decrypt, reboot), Outcome::RebootRequired);
        assert_eq!(
            classify(Operation::Decrypt, codes::REBOOT_REQUIRED as i32),
            Outcome::OperationFailed(codes::REBOOT_REQUIRED as i32)
        );
        assert_eq!(
            classify(Operation::PreEncrypt, reboot),
            Outcome::OperationFailed(reboot)
        );
        assert_eq!(
            classify(Operation::Encrypt, reboot),
            Outcome::OperationFailed(reboot)
        );
    }

    #[test]
    fn wrong_credential_codes_are_operation_specific() {
        assert_eq!(
            classify(Operation::Decrypt, neg(codes::WRONG_PASSPHRASE)),
            Outcome::WrongCredential
        );
        assert_eq!(
            classify(Operation::ChangePassphrase, neg(codes::WRONG_PASSPHRASE)),
            Outcome::OperationFailed(neg(codes::WRONG_PASSPHRASE))
        );
        assert_eq!(
            classify(Operation::ChangePassphrase, neg(codes::CHANGE_PASSPHRASE_FAILED)),
            Outcome::WrongCredential
        );
        assert_eq!(
            classify(Operation::Decrypt, neg(codes::CHANGE_PASSPHRASE_FAILED)),
            Outcome::OperationFailed(neg(codes::CHANGE_PASSPHRASE_FAILED))
        );
    }

    #[test]
    fn extreme_codes_fall_through() {
        assert_eq!(
            classify(Operation::Encrypt, i32::MIN),
            Outcome::OperationFailed(i32::MIN)
        );
        assert_eq!(
            classify(Operation::Decrypt, i32::MAX),
            Outcome::OperationFailed(i32::MAX)
        );
    }

    #[test]
    fn judge_keeps_raw_code() {
        let verdict = judge(Operation::Encrypt, -17);
        assert_eq!(verdict.code.raw(), -17);
        assert_eq!(verdict.code.magnitude(), 17);
        assert_eq!(verdict.outcome, Outcome::OperationFailed(-17));
    }

    fn any_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::PreEncrypt),
            Just(Operation::Encrypt),
            Just(Operation::Decrypt),
            Just(Operation::ChangePassphrase),
        ]
    }

    proptest! {
        #[test]
        fn classify_is_deterministic(op in any_operation(), code in any::<i32>()) {
            prop_assert_eq!(classify(op, code), classify(op, code));
        }

        #[test]
        fn unknown_magnitudes_always_fail(op in any_operation(), code in 5i32..=i32::MAX) {
            prop_assert_eq!(classify(op, code), Outcome::OperationFailed(code));
            prop_assert_eq!(classify(op, -code), Outcome::OperationFailed(-code));
        }
    }
}
