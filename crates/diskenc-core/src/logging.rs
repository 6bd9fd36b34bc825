//! Logger bootstrap shared by every binary.

use env_logger::{Builder, Env};

/// Environment variable consulted for the log filter (`env_logger` syntax).
pub const LOG_ENV: &str = "DISKENC_LOG";

/// Install the global logger, falling back to `default_level` when `DISKENC_LOG` is unset.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::default().filter_or(LOG_ENV, default_level);
    let _ = Builder::from_env(env)
        .format_timestamp_secs()
        .format_target(false)
        .try_init();
}
