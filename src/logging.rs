use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Install a stderr `tracing` subscriber for the process.
///
/// `RUST_LOG` takes precedence; otherwise progress is shown at `info` when
/// `verbose` and only warnings are shown when not. Safe to call repeatedly:
/// only the first call (or an embedding application's own subscriber) wins.
pub fn init_logging(verbose: bool) {
    if INITIALISED.set(()).is_err() {
        return;
    }

    let default_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);

    // Another subscriber may already be installed by the host application
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
