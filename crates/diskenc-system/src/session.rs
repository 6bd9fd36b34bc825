//! Reboot requests through a configurable session command.

use crate::command::HelperCommand;
use diskenc_core::config::DiskencConfig;
use diskenc_core::error::{DiskencError, DiskencResult};
use diskenc_provider::SessionManager;
use log::info;
use std::time::Duration;

const REBOOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `session.reboot_command` (by default `systemctl reboot`).
#[derive(Debug, Clone)]
pub struct CommandSession {
    helper: Option<HelperCommand>,
    args: Vec<String>,
}

impl CommandSession {
    pub fn new(argv: &[String]) -> Self {
        match argv.split_first() {
            Some((program, args)) if !program.trim().is_empty() => Self {
                helper: Some(HelperCommand::new(program, REBOOT_TIMEOUT)),
                args: args.to_vec(),
            },
            _ => Self {
                helper: None,
                args: Vec::new(),
            },
        }
    }

    pub fn from_config(config: &DiskencConfig) -> Self {
        Self::new(&config.session.reboot_command)
    }
}

impl SessionManager for CommandSession {
    type Error = DiskencError;

    fn request_reboot(&self) -> DiskencResult<()> {
        let helper = self
            .helper
            .as_ref()
            .ok_or_else(|| DiskencError::Session("no reboot command configured".to_string()))?;

        info!("requesting reboot via {}", helper.program().display());
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let out = helper
            .run(&args, None)
            .map_err(|err| DiskencError::Session(err.to_string()))?;
        if out.status == 0 {
            return Ok(());
        }

        let diagnostic = out.diagnostic();
        Err(DiskencError::Session(if diagnostic.is_empty() {
            format!(
                "{} exited with code {}",
                helper.program().display(),
                out.status
            )
        } else {
            format!(
                "{} exited with code {}: {diagnostic}",
                helper.program().display(),
                out.status
            )
        }))
    }
}
