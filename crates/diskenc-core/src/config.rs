//! Configuration model and helpers used by the agent and CLI.

use crate::error::{DiskencError, DiskencResult};
use diskenc_provider::{DeviceId, SecKeyType};
use directories_next::ProjectDirs;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/diskenc.toml";
pub const CONFIG_PATH_ENV: &str = "DISKENC_CONFIG";
const BOOTSTRAP_FILE_NAME: &str = "diskenc.toml";
const SOCKET_FILE_NAME: &str = "agent.sock";
/// The agent runs inside the user's session, so the system file must stay world-readable.
const SYSTEM_CONFIG_MODE: u32 = 0o644;
const USER_CONFIG_MODE: u32 = 0o600;
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "Diskenc";
const APP_NAME: &str = "diskenc";

const BOOTSTRAP_TEMPLATE: &str = "\
# Auto-generated diskenc configuration bootstrap.

[agent]
# Unix socket the daemon bridge writes notifications and password requests to.
socket_path = \"{socket_path}\"
# Ask on the terminal before honouring reboot offers; false always answers \"later\".
interactive = true

[tpm]
# Helper invoked as `<helper> <device>`; the PIN (or nothing) arrives on stdin,
# the unsealed passphrase is expected on stdout.
helper_path = \"/usr/libexec/diskenc/tpm-unseal\"
timeout_secs = 10

[session]
reboot_command = [\"systemctl\", \"reboot\"]

[registry]
# Progress arriving this soon after a job finished is treated as a late duplicate.
stale_window_ms = 3000

[devices]
# Accepts `password`, `tpm-pin`, `tpm`, or the daemon's integer code.
# default_key_type = \"password\"

[devices.key_types]
# \"/dev/sda1\" = \"tpm-pin\"
";

/// Where the agent listens for daemon traffic and how it talks to the user.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentCfg {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Ask before honouring reboot offers instead of always postponing them.
    #[serde(default = "default_interactive")]
    pub interactive: bool,
}

fn default_socket_path() -> String {
    "/run/diskenc/agent.sock".to_string()
}

fn default_interactive() -> bool {
    true
}

impl Default for AgentCfg {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            interactive: default_interactive(),
        }
    }
}

/// TPM unseal helper invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TpmCfg {
    #[serde(default = "default_tpm_helper_path")]
    pub helper_path: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tpm_helper_path() -> String {
    "/usr/libexec/diskenc/tpm-unseal".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for TpmCfg {
    fn default() -> Self {
        Self {
            helper_path: default_tpm_helper_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Session management knobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCfg {
    #[serde(default = "default_reboot_command")]
    pub reboot_command: Vec<String>,
}

fn default_reboot_command() -> Vec<String> {
    vec!["systemctl".to_string(), "reboot".to_string()]
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            reboot_command: default_reboot_command(),
        }
    }
}

/// Job registry tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegistryCfg {
    #[serde(default = "default_stale_window_ms")]
    pub stale_window_ms: u64,
}

fn default_stale_window_ms() -> u64 {
    3_000
}

impl Default for RegistryCfg {
    fn default() -> Self {
        Self {
            stale_window_ms: default_stale_window_ms(),
        }
    }
}

/// Key type as written in configuration: a daemon integer code or a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum KeyTypeSetting {
    Code(i32),
    Name(KeyTypeName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum KeyTypeName {
    Password,
    TpmPin,
    Tpm,
}

impl KeyTypeSetting {
    pub fn resolve(self) -> SecKeyType {
        match self {
            KeyTypeSetting::Code(code) => SecKeyType::from_code(code),
            KeyTypeSetting::Name(KeyTypeName::Password) => SecKeyType::PasswordOnly,
            KeyTypeSetting::Name(KeyTypeName::TpmPin) => SecKeyType::TpmAndPin,
            KeyTypeSetting::Name(KeyTypeName::Tpm) => SecKeyType::TpmOnly,
        }
    }
}

/// Per-device key-protection modes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DevicesCfg {
    #[serde(default)]
    pub default_key_type: Option<KeyTypeSetting>,

    #[serde(default)]
    pub key_types: BTreeMap<String, KeyTypeSetting>,
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DiskencConfig {
    #[serde(default)]
    pub agent: AgentCfg,

    #[serde(default)]
    pub tpm: TpmCfg,

    #[serde(default)]
    pub session: SessionCfg,

    #[serde(default)]
    pub registry: RegistryCfg,

    #[serde(default)]
    pub devices: DevicesCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// `.toml`, `.yaml` and `.yml` are recognised; anything else is refused.
    pub fn from_path(path: &Path) -> DiskencResult<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml" | "yml") => Ok(ConfigFormat::Yaml),
            _ => Err(DiskencError::InvalidConfig(format!(
                "{} is neither .toml nor .yaml",
                path.display()
            ))),
        }
    }
}

impl DiskencConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Pick the config path: explicit flag, then `DISKENC_CONFIG`, then the system default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match env::var(CONFIG_PATH_ENV) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Load configuration, writing a starter file first when none exists.
    ///
    /// An unprivileged session agent cannot create `/etc/diskenc.toml`; in that
    /// case it falls back to a per-user copy whose socket lives in the user's
    /// runtime directory. `config.path` tells the caller which file was used.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> DiskencResult<Self> {
        let requested = path.as_ref();
        if requested.exists() {
            return Self::load(requested);
        }

        let starter = Starter {
            socket_path: default_socket_path(),
            mode: SYSTEM_CONFIG_MODE,
        };
        match starter.write(requested) {
            Ok(()) => Self::load(requested),
            Err(err) if requested == Self::default_path() => {
                debug!("cannot write {}: {err}", requested.display());
                Self::load_user_copy()
            }
            Err(err) => Err(DiskencError::InvalidConfig(format!(
                "no configuration at {} and writing a starter file failed: {err}",
                requested.display()
            ))),
        }
    }

    fn load_user_copy() -> DiskencResult<Self> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).ok_or_else(|| {
            DiskencError::InvalidConfig(format!(
                "{DEFAULT_CONFIG_PATH} is missing and no per-user config directory is known"
            ))
        })?;
        let path = dirs.config_dir().join(BOOTSTRAP_FILE_NAME);

        if !path.exists() {
            let runtime = dirs
                .runtime_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| env::temp_dir().join(APP_NAME));
            let starter = Starter {
                socket_path: runtime.join(SOCKET_FILE_NAME).display().to_string(),
                mode: USER_CONFIG_MODE,
            };
            starter.write(&path).map_err(|err| {
                DiskencError::InvalidConfig(format!(
                    "writing per-user configuration {} failed: {err}",
                    path.display()
                ))
            })?;
        }

        warn!(
            "{DEFAULT_CONFIG_PATH} is missing; using per-user configuration {}",
            path.display()
        );
        Self::load(&path)
    }

    /// Read a config file, choosing the parser from its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> DiskencResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let contents = fs::read_to_string(path)?;
        let mut cfg: Self = match format {
            ConfigFormat::Toml => toml::from_str(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str(&contents)?,
        };
        cfg.path = path.to_path_buf();
        cfg.format = format;
        Ok(cfg)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> DiskencResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.agent.socket_path.trim().is_empty() {
            issues.push("agent.socket_path must not be empty".to_string());
        }

        if self.tpm.helper_path.trim().is_empty() {
            issues.push("tpm.helper_path must not be empty".to_string());
        }
        if self.tpm.timeout_secs == 0 {
            issues.push("tpm.timeout_secs must be greater than 0".to_string());
        }

        match self.session.reboot_command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => issues.push("session.reboot_command must name a program".to_string()),
        }

        if let Some(setting) = self.devices.default_key_type {
            if let SecKeyType::Unsupported(code) = setting.resolve() {
                issues.push(format!(
                    "devices.default_key_type uses unsupported code {code}"
                ));
            }
        }

        for (device, setting) in &self.devices.key_types {
            if !device.starts_with('/') {
                issues.push(format!(
                    "devices.key_types entry `{device}` must be an absolute device path"
                ));
            }
            if let SecKeyType::Unsupported(code) = setting.resolve() {
                issues.push(format!(
                    "devices.key_types entry `{device}` uses unsupported code {code}"
                ));
            }
        }

        issues
    }

    /// Configured key type for `device`, falling back to `devices.default_key_type`.
    pub fn key_type_for(&self, device: &DeviceId) -> Option<SecKeyType> {
        self.devices
            .key_types
            .get(device.as_str())
            .or(self.devices.default_key_type.as_ref())
            .map(|setting| setting.resolve())
    }

    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(&self.agent.socket_path)
    }

    pub fn tpm_helper_path(&self) -> PathBuf {
        PathBuf::from(&self.tpm.helper_path)
    }

    /// Translate the stored TPM timeout into a `Duration`.
    pub fn tpm_timeout(&self) -> Duration {
        Duration::from_secs(self.tpm.timeout_secs)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.registry.stale_window_ms)
    }
}

/// Commented starter configuration pointing the agent at `socket_path`.
pub fn bootstrap_template(socket_path: &str) -> String {
    BOOTSTRAP_TEMPLATE.replace("{socket_path}", socket_path)
}

/// A starter file about to be written.
struct Starter {
    socket_path: String,
    mode: u32,
}

impl Starter {
    /// Create the file and its directory. Losing a creation race to another
    /// process is fine: the winner wrote the same template.
    fn write(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(err) => return Err(err),
        };
        file.write_all(bootstrap_template(&self.socket_path).as_bytes())?;
        file.sync_all()?;
        #[cfg(unix)]
        fs::set_permissions(path, PermissionsExt::from_mode(self.mode))?;

        info!(
            "wrote starter configuration {} (agent socket {})",
            path.display(),
            self.socket_path
        );
        Ok(())
    }
}
