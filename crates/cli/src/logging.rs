use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Initialize tracing with the specified verbosity level and output format.
///
/// Logs go to stderr so that command output on stdout stays machine-readable. By default only
/// warnings from the `corvid_db` and `corvid_cli` crates are shown; each `-v` raises the level.
///
/// # Arguments
/// * `json` - If true, output logs in JSON format; otherwise, use human-readable format.
/// * `verbose` - Verbosity level: 0 for WARN, 1 for INFO, 2 for DEBUG, 3+ for TRACE.
///
/// # Examples
/// ```rust,no_run
/// init_tracing(false, 0); // WARN level, human-readable
/// init_tracing(true, 2); // DEBUG level, JSON
/// ```
pub fn init_tracing(json: bool, verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("corvid_db={},corvid_cli={}", level, level)));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
