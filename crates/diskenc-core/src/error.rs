//! Error type shared by the orchestration core and its host-backed collaborators.

use std::path::PathBuf;
use thiserror::Error;

pub type DiskencResult<T> = Result<T, DiskencError>;

#[derive(Debug, Error)]
pub enum DiskencError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to render TOML configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("failed to process YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device {device} uses unsupported key type {raw}")]
    UnsupportedKeyType { device: String, raw: i32 },

    #[error("TPM unseal failed: {0}")]
    Tpm(String),

    #[error("credential prompt failed: {0}")]
    Prompt(String),

    #[error("session manager request failed: {0}")]
    Session(String),

    #[error("helper {path} failed: {reason}")]
    Helper { path: PathBuf, reason: String },

    #[error("event loop unavailable: {0}")]
    Bus(String),
}
