// ABOUTME: Shared logging setup for trishul
// ABOUTME: init() logs to stderr, init_file() appends to a file under the data log dir

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Build the filter used by both entry points. `RUST_LOG` directives win over
/// `default_level`; an unparseable level falls back to INFO.
pub fn filter(default_level: &str) -> EnvFilter {
    let level = default_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Standard logging to stderr. A second call is a no-op.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .try_init();
}

/// Append-only file logging to `{dir}/{name}.log`.
/// If the file cannot be opened, prints a warning to stderr and falls back to
/// stderr logging so the control process never starts blind.
pub fn init_file(dir: &Path, name: &str, default_level: &str) {
    if let Err(e) = init_file_inner(dir, name, default_level) {
        eprintln!("Warning: failed to set up file logging: {e}");
        init(default_level);
    }
}

fn init_file_inner(
    dir: &Path,
    name: &str,
    default_level: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter(default_level))
        .with_ansi(false)
        .try_init()?;

    Ok(())
}
