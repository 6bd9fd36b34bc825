//! Key-type lookup backed by the `[devices]` configuration section.

use diskenc_core::config::DiskencConfig;
use diskenc_core::error::{DiskencError, DiskencResult};
use diskenc_provider::{DeviceId, KeyTypeSource, SecKeyType};
use log::debug;
use std::sync::Arc;

/// Code reported for devices with no configured key type.
pub const UNCONFIGURED_CODE: i32 = -1;

#[derive(Debug, Clone)]
pub struct ConfiguredKeyTypes {
    config: Arc<DiskencConfig>,
}

impl ConfiguredKeyTypes {
    pub fn new(config: Arc<DiskencConfig>) -> Self {
        Self { config }
    }
}

impl KeyTypeSource for ConfiguredKeyTypes {
    type Error = DiskencError;

    fn key_type(&self, device: &DeviceId) -> DiskencResult<SecKeyType> {
        match self.config.key_type_for(device) {
            Some(key_type) => Ok(key_type),
            None => {
                debug!("no key type configured for {device}");
                Ok(SecKeyType::Unsupported(UNCONFIGURED_CODE))
            }
        }
    }
}
