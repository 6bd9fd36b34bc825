use diskenc_core::config::{DiskencConfig, KeyTypeSetting};
use diskenc_core::error::{DiskencError, DiskencResult};
use diskenc_core::PassphraseAcquirer;
use diskenc_provider::{DeviceId, SecKeyType, SessionManager, TpmUnsealer};
use diskenc_system::{
    CommandSession, ConfiguredKeyTypes, HelperTpmUnsealer, TerminalPresenter, TerminalPrompt,
};
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn helper_unseals_with_pin_on_stdin() -> DiskencResult<()> {
    let dir = tempdir()?;
    let helper = dir.path().join("tpm-unseal");
    write_executable(
        &helper,
        "#!/bin/sh\nread pin\nprintf 'secret-for-%s-%s\\n' \"$1\" \"$pin\"\n",
    )?;

    let tpm = HelperTpmUnsealer::new(&helper, Duration::from_secs(5));
    let secret = tpm.unseal_secret(&DeviceId::new("/dev/sda1"), "2468")?;
    assert_eq!(secret.as_str(), "secret-for-/dev/sda1-2468");
    Ok(())
}

#[test]
fn helper_failure_is_classified() -> DiskencResult<()> {
    let dir = tempdir()?;
    let helper = dir.path().join("tpm-unseal");
    write_executable(
        &helper,
        "#!/bin/sh\necho 'ERROR: authorization failure' >&2\nexit 3\n",
    )?;

    let tpm = HelperTpmUnsealer::new(&helper, Duration::from_secs(5));
    match tpm.unseal_secret(&DeviceId::new("/dev/sda1"), "0000") {
        Err(DiskencError::Tpm(message)) => {
            assert!(message.contains("rejected the PIN"), "{message}");
            assert!(message.contains("exit code 3"), "{message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn helper_without_output_is_an_error() -> DiskencResult<()> {
    let dir = tempdir()?;
    let helper = dir.path().join("tpm-unseal");
    write_executable(&helper, "#!/bin/sh\nexit 0\n")?;

    let tpm = HelperTpmUnsealer::new(&helper, Duration::from_secs(5));
    assert!(matches!(
        tpm.unseal_secret(&DeviceId::new("/dev/sda1"), ""),
        Err(DiskencError::Tpm(_))
    ));
    Ok(())
}

#[test]
fn hanging_helper_times_out() -> DiskencResult<()> {
    let dir = tempdir()?;
    let helper = dir.path().join("tpm-unseal");
    write_executable(&helper, "#!/bin/sh\nexec sleep 5\n")?;

    let tpm = HelperTpmUnsealer::new(&helper, Duration::from_millis(200));
    match tpm.unseal_secret(&DeviceId::new("/dev/sda1"), "") {
        Err(DiskencError::Helper { reason, .. }) => assert!(reason.contains("timed out")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_helper_reports_path() {
    let tpm = HelperTpmUnsealer::new("/nonexistent/diskenc-tpm-unseal", Duration::from_secs(1));
    match tpm.unseal_secret(&DeviceId::new("/dev/sda1"), "") {
        Err(DiskencError::Helper { path, .. }) => {
            assert_eq!(path, Path::new("/nonexistent/diskenc-tpm-unseal"))
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn reboot_command_runs_with_arguments() -> DiskencResult<()> {
    let dir = tempdir()?;
    let marker = dir.path().join("rebooted");
    let script = dir.path().join("fake-systemctl");
    write_executable(
        &script,
        &format!("#!/bin/sh\necho \"$@\" > '{}'\n", marker.display()),
    )?;

    let session = CommandSession::new(&[
        script.to_string_lossy().into_owned(),
        "reboot".to_string(),
    ]);
    session.request_reboot()?;
    assert_eq!(fs::read_to_string(&marker)?.trim(), "reboot");
    Ok(())
}

#[test]
fn failing_reboot_command_is_a_session_error() -> DiskencResult<()> {
    let dir = tempdir()?;
    let script = dir.path().join("fake-systemctl");
    write_executable(&script, "#!/bin/sh\necho 'Access denied' >&2\nexit 1\n")?;

    let session = CommandSession::new(&[script.to_string_lossy().into_owned()]);
    match session.request_reboot() {
        Err(DiskencError::Session(message)) => assert!(message.contains("Access denied")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn terminal_hook_unlocks_tpm_pin_device_end_to_end() -> DiskencResult<()> {
    let dir = tempdir()?;
    let helper = dir.path().join("tpm-unseal");
    write_executable(
        &helper,
        "#!/bin/sh\nread pin\n[ \"$pin\" = 1357 ] || exit 1\necho unsealed\n",
    )?;

    let mut config = DiskencConfig::default();
    config.tpm.helper_path = helper.to_string_lossy().into_owned();
    config
        .devices
        .key_types
        .insert(
            "/dev/sda1".to_string(),
            KeyTypeSetting::Code(SecKeyType::TPM_AND_PIN_CODE),
        );
    let config = Arc::new(config);

    let acquirer = PassphraseAcquirer::new(
        ConfiguredKeyTypes::new(config.clone()),
        HelperTpmUnsealer::from_config(&config),
        TerminalPrompt::from_reader(Cursor::new(b"1357\n9999\n".to_vec())),
        TerminalPresenter::new(false),
    );

    let good = acquirer.acquire(&DeviceId::new("/dev/sda1"))?;
    assert!(!good.cancelled);
    assert_eq!(good.secret.as_str(), "unsealed");

    let wrong = acquirer.acquire(&DeviceId::new("/dev/sda1"))?;
    assert!(wrong.cancelled);
    assert!(wrong.wrong_credential);
    assert!(wrong.secret.is_empty());
    Ok(())
}

fn write_executable(path: &Path, contents: &str) -> DiskencResult<()> {
    fs::write(path, contents)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}
