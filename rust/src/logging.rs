//! Tracing setup for the three places the core runs.

// Sync internals are chatty at debug; the websocket stack stays at info.
#[cfg(any(target_os = "ios", target_os = "android"))]
const MOBILE_FILTER: &str = "pawpal_core=debug,tokio_tungstenite=info,info";

/// Install the global subscriber. Later calls are no-ops.
///
/// Mobile builds log to the system log (os_log, logcat). iOS also appends to
/// `pawpal.log` in `data_dir`, which survives os_log's level filtering and can
/// be read straight off a simulator. Elsewhere output goes to stderr and
/// `RUST_LOG` wins over the default filter.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let _ = std::fs::create_dir_all(data_dir);
        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(data_dir).join("pawpal.log"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            });

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(MOBILE_FILTER))
            .with(tracing_oslog::OsLogger::new("com.pawpal.app", "chat"))
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let logcat = paranoid_android::layer("pawpal")
            .with_filter(tracing_subscriber::EnvFilter::new(MOBILE_FILTER));
        let _ = tracing_subscriber::registry().with(logcat).try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pawpal_core=debug,info".into());
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
