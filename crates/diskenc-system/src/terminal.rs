//! Terminal stand-ins for the desktop prompt, notice, and progress surfaces.

use diskenc_core::error::{DiskencError, DiskencResult};
use diskenc_provider::{
    DeviceId, JobKind, Presenter, ProgressSurface, PromptMode, PromptResponse, SecretPrompt,
    Severity,
};
use log::{debug, info, warn};
use rpassword::prompt_password;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One controlling terminal per process; whoever holds this owns it.
static TERMINAL: Mutex<()> = Mutex::new(());

fn terminal_lock() -> MutexGuard<'static, ()> {
    TERMINAL.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedReader = Mutex<Box<dyn BufRead + Send>>;

enum SecretSource {
    Tty,
    Reader(SharedReader),
}

/// Exclusive use of the secret source for the span of one prompt.
enum Input<'a> {
    Tty(MutexGuard<'static, ()>),
    Reader(MutexGuard<'a, Box<dyn BufRead + Send>>),
}

impl Input<'_> {
    /// `None` on end of input or interrupt.
    fn read_secret(&mut self, prompt: &str) -> DiskencResult<Option<String>> {
        let read = match self {
            Input::Tty(_) => prompt_password(prompt),
            Input::Reader(reader) => read_trimmed_line(&mut **reader),
        };

        match read {
            Ok(secret) => Ok(Some(secret)),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(DiskencError::Prompt(err.to_string())),
        }
    }
}

fn read_trimmed_line(reader: &mut dyn BufRead) -> io::Result<String> {
    let mut line = String::new();
    match reader.read_line(&mut line)? {
        0 => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        _ => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// Reads PINs and passphrases from the controlling terminal, or from a
/// line-oriented reader when no terminal is available.
///
/// End of input and Ctrl-C count as a cancel. With passphrase fallback
/// enabled, an empty PIN switches to a passphrase prompt. Concurrent callers
/// are served one whole prompt at a time, fallback included.
pub struct TerminalPrompt {
    source: SecretSource,
    passphrase_fallback: bool,
}

impl TerminalPrompt {
    pub fn tty() -> Self {
        Self {
            source: SecretSource::Tty,
            passphrase_fallback: false,
        }
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            source: SecretSource::Reader(Mutex::new(Box::new(reader))),
            passphrase_fallback: false,
        }
    }

    pub fn with_passphrase_fallback(mut self, enabled: bool) -> Self {
        self.passphrase_fallback = enabled;
        self
    }

    fn input(&self) -> DiskencResult<Input<'_>> {
        match &self.source {
            SecretSource::Tty => Ok(Input::Tty(terminal_lock())),
            SecretSource::Reader(reader) => reader
                .lock()
                .map(Input::Reader)
                .map_err(|_| DiskencError::Prompt("secret reader poisoned".to_string())),
        }
    }
}

fn read_passphrase(input: &mut Input<'_>) -> DiskencResult<PromptResponse> {
    Ok(match input.read_secret("Passphrase: ")? {
        Some(secret) => PromptResponse::accepted(PromptMode::Password, secret),
        None => PromptResponse::cancelled(PromptMode::Password),
    })
}

impl SecretPrompt for TerminalPrompt {
    type Error = DiskencError;

    fn prompt_for_secret(&self, mode: PromptMode) -> DiskencResult<PromptResponse> {
        let mut input = self.input()?;
        match mode {
            PromptMode::Password => read_passphrase(&mut input),
            PromptMode::Pin => {
                let prompt = if self.passphrase_fallback {
                    "PIN (leave empty to use the passphrase): "
                } else {
                    "PIN: "
                };
                match input.read_secret(prompt)? {
                    Some(pin) if pin.is_empty() && self.passphrase_fallback => {
                        read_passphrase(&mut input)
                    }
                    Some(pin) => Ok(PromptResponse::accepted(PromptMode::Pin, pin)),
                    None => Ok(PromptResponse::cancelled(PromptMode::Pin)),
                }
            }
        }
    }
}

#[derive(Clone)]
enum RebootAnswers {
    Never,
    Stdin,
    Reader(Arc<SharedReader>),
}

/// Prints notices on stderr and asks about reboots on stdin.
#[derive(Clone)]
pub struct TerminalPresenter {
    answers: RebootAnswers,
}

impl TerminalPresenter {
    /// With `interactive == false`, reboot offers are always answered "later".
    pub fn new(interactive: bool) -> Self {
        Self {
            answers: if interactive {
                RebootAnswers::Stdin
            } else {
                RebootAnswers::Never
            },
        }
    }

    /// Take reboot answers from `reader`, one line per question.
    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            answers: RebootAnswers::Reader(Arc::new(Mutex::new(Box::new(reader)))),
        }
    }

    pub fn is_interactive(&self) -> bool {
        !matches!(self.answers, RebootAnswers::Never)
    }
}

impl Presenter for TerminalPresenter {
    fn present(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{title}: {message}"),
            Severity::Error => warn!("{title}: {message}"),
        }
        eprintln!("[{title}] {message}");
    }

    fn confirm_reboot(&self, title: &str, message: &str) -> bool {
        let answer = match &self.answers {
            RebootAnswers::Never => {
                eprintln!("[{title}] {message}");
                info!("not interactive; reboot postponed");
                return false;
            }
            RebootAnswers::Stdin => {
                let _tty = terminal_lock();
                eprint!("[{title}] {message}\nReboot now? [y/N] ");
                io::stderr().flush().ok();
                let mut line = String::new();
                io::stdin().read_line(&mut line).map(|_| line)
            }
            RebootAnswers::Reader(reader) => {
                eprintln!("[{title}] {message}");
                let mut reader = reader.lock().unwrap_or_else(PoisonError::into_inner);
                read_trimmed_line(&mut **reader)
            }
        };

        match answer {
            Ok(line) => matches!(line.trim(), "y" | "Y" | "yes" | "YES"),
            Err(err) => {
                warn!("failed to read reboot confirmation: {err}");
                false
            }
        }
    }

    fn restore_busy_cursor(&self) {
        debug!("busy state cleared");
    }
}

/// Progress surface that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSurface for LogProgress {
    fn open(&self, _device: &DeviceId, _kind: JobKind, title: &str) {
        info!("{title}");
    }

    fn update(&self, device: &DeviceId, kind: JobKind, progress: f64) {
        debug!("{kind} {device}: {progress:.0}%");
    }

    fn close(&self, device: &DeviceId, kind: JobKind) {
        info!("{kind} of {device} finished");
    }
}
