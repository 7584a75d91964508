use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";
/// Filter used with `run --trace`: station events at info, everything else at warn.
pub const TRACE_FILTER: &str = "warn,routing_ring::events=info";

pub fn dev_log(message: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    tracing::debug!(target: "routing_ring::dev", "{message}");
}

#[macro_export]
macro_rules! log_dev {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::logging::dev_log(&format!($($arg)*));
        }
    };
}

/// Install a stderr subscriber with thread names (one thread per station).
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
