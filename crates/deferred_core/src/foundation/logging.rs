//! Logging setup on top of the `log` facade

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger` with a default filter.
///
/// `RUST_LOG` still wins when it is set. Calling this more than once is harmless;
/// only the first call installs the logger.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialized");
    }
}
