use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diskenc_core::config::DiskencConfig;
use diskenc_core::registry::JobRegistry;
use diskenc_core::{
    decide, judge, logging, DeviceId, NotificationDispatcher, Operation, OutcomePresenter,
    PassphraseAcquirer, Severity, SUBSCRIBED_SIGNALS,
};
use diskenc_system::{
    CommandSession, ConfiguredKeyTypes, HelperTpmUnsealer, LogProgress, TerminalPresenter,
    TerminalPrompt,
};
use schemars::schema_for;
use serde_json::{json, to_string_pretty};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod replay;

/// Exit status used when the user dismisses the credential prompt.
const EXIT_CANCELLED: i32 = 2;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "diskenc",
    version,
    about = "Inspect disk-encryption results and run the device-password hook from a terminal."
)]
struct Cli {
    /// Path to the diskenc configuration file (defaults to $DISKENC_CONFIG or /etc/diskenc.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a daemon result code and show what the user would be told.
    Classify {
        #[arg(long, value_enum)]
        operation: OperationArg,

        /// Raw result code as emitted by the daemon.
        #[arg(long, allow_negative_numbers = true)]
        code: i32,

        #[arg(long, default_value = "/dev/sda1")]
        device: String,

        /// Human-readable device name used in messages.
        #[arg(long, default_value = "disk")]
        name: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,
    },

    /// Run the device-password hook once and print the secret it produced.
    Unlock {
        /// Block device path, e.g. /dev/sda1.
        device: String,

        /// Print the SHA-256 fingerprint instead of the secret itself.
        #[arg(long)]
        print_fingerprint: bool,

        /// Read PIN/passphrase lines from stdin instead of the terminal.
        #[arg(long)]
        stdin: bool,

        /// Disable the "empty PIN switches to passphrase" shortcut.
        #[arg(long)]
        no_passphrase_fallback: bool,
    },

    /// Feed captured JSON-line notifications through a dispatcher and summarise them.
    Replay {
        /// Capture file, or `-` for stdin.
        input: PathBuf,

        /// Ask before honouring reboot offers found in the capture.
        #[arg(long)]
        interactive: bool,
    },

    /// Validate a configuration file.
    Validate {
        /// Path to the configuration file (defaults to the resolved config path).
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },

    /// Output the JSON schema of the configuration file.
    Schema,

    /// List the daemon notification channels the agent subscribes to.
    Signals,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OperationArg {
    PreEncrypt,
    Encrypt,
    Decrypt,
    ChangePassphrase,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::PreEncrypt => Operation::PreEncrypt,
            OperationArg::Encrypt => Operation::Encrypt,
            OperationArg::Decrypt => Operation::Decrypt,
            OperationArg::ChangePassphrase => Operation::ChangePassphrase,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();
    let config_path = DiskencConfig::resolve_path(cli.config.as_deref());

    match cli.command {
        Commands::Classify {
            operation,
            code,
            device,
            name,
            format,
        } => {
            print!("{}", render_classification(operation.into(), code, &device, &name, format)?);
        }
        Commands::Unlock {
            device,
            print_fingerprint,
            stdin,
            no_passphrase_fallback,
        } => {
            let config = Arc::new(load_config(&config_path)?);
            let prompt = if stdin {
                TerminalPrompt::from_reader(BufReader::new(io::stdin()))
            } else {
                TerminalPrompt::tty()
            }
            .with_passphrase_fallback(!no_passphrase_fallback);

            let acquirer = PassphraseAcquirer::new(
                ConfiguredKeyTypes::new(config.clone()),
                HelperTpmUnsealer::from_config(&config),
                prompt,
                TerminalPresenter::new(!stdin),
            );
            let acquisition = acquirer
                .acquire(&DeviceId::new(device.as_str()))
                .with_context(|| format!("failed to acquire a secret for {device}"))?;

            if acquisition.cancelled {
                eprintln!("Unlock of {device} cancelled.");
                std::process::exit(EXIT_CANCELLED);
            }
            if print_fingerprint {
                println!("{}", hex::encode(Sha256::digest(acquisition.secret.as_bytes())));
            } else {
                println!("{}", acquisition.secret.as_str());
            }
        }
        Commands::Replay { input, interactive } => {
            let config = load_config(&config_path)?;
            let mut dispatcher = NotificationDispatcher::new(
                JobRegistry::new(config.stale_window()),
                LogProgress,
                OutcomePresenter::new(
                    TerminalPresenter::new(interactive),
                    CommandSession::from_config(&config),
                ),
            );

            let summary = if input == Path::new("-") {
                replay::replay(io::stdin().lock(), &mut dispatcher)?
            } else {
                let file = File::open(&input)
                    .with_context(|| format!("failed to open {}", input.display()))?;
                replay::replay(BufReader::new(file), &mut dispatcher)?
            };
            replay::print_summary(&summary);
        }
        Commands::Validate { file } => {
            let file = file.unwrap_or(config_path);
            let cfg = DiskencConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;

            let issues = cfg.validate();
            if !issues.is_empty() {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("  - {issue}");
                }
                std::process::exit(1);
            }
            println!(
                "Configuration valid ({} device key type(s), default {}).",
                cfg.devices.key_types.len(),
                cfg.devices
                    .default_key_type
                    .map(|setting| setting.resolve().to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
        Commands::Schema => {
            let schema = schema_for!(DiskencConfig);
            println!("{}", to_string_pretty(&schema)?);
        }
        Commands::Signals => {
            for name in SUBSCRIBED_SIGNALS {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<DiskencConfig> {
    let config = DiskencConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        eprintln!(
            "Using bootstrap configuration at {} (set DISKENC_CONFIG to replace).",
            config.path.display()
        );
    }
    Ok(config)
}

fn render_classification(
    operation: Operation,
    code: i32,
    device: &str,
    name: &str,
    format: OutputFormat,
) -> Result<String> {
    if name.trim().is_empty() {
        bail!("--name must not be empty");
    }
    let verdict = judge(operation, code);
    let decision = decide(&verdict, &DeviceId::new(device).label(name));
    let severity = match decision.severity {
        Severity::Info => "info",
        Severity::Error => "error",
    };

    Ok(match format {
        OutputFormat::Plain => format!(
            "operation: {operation}\ncode: {code}\noutcome: {}\nseverity: {severity}\ntitle: {}\nmessage: {}\noffer_reboot: {}\n",
            verdict.outcome, decision.title, decision.message, decision.offer_reboot
        ),
        OutputFormat::Json => {
            let value = json!({
                "operation": operation.to_string(),
                "code": code,
                "magnitude": verdict.code.magnitude(),
                "outcome": verdict.outcome.to_string(),
                "severity": severity,
                "title": decision.title,
                "message": decision.message,
                "offer_reboot": decision.offer_reboot,
            });
            format!("{}\n", to_string_pretty(&value)?)
        }
    })
}
