use once_cell::sync::OnceCell;
use parsec_client::ClientConfig;
use tracing_subscriber::EnvFilter;

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the process-wide log subscriber
///
/// The config's log level is the default filter, `RUST_LOG` overrides it.
/// Only the first call has an effect.
pub fn libparsec_init_native_only_init(config: &ClientConfig) {
    LOGGING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_directive()));
        // Someone else may own the global subscriber already, theirs is kept
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok();
        tracing::info!(installed, log_level = ?config.log_level, "libparsec initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_noop() {
        let dir = std::env::temp_dir();
        let config = ClientConfig::with_dirs(dir.join("config"), dir.join("data"), dir.join("mountpoints"));
        libparsec_init_native_only_init(&config);
        libparsec_init_native_only_init(&config);
        assert!(LOGGING_INITIALIZED.get().is_some());
    }
}
