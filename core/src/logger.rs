//! Logger init function.

use std::io::Write;

/// Initializes the logger.
///
/// Console logging for all the kindred crates via [`log`] + `env_logger`.
/// `RUST_LOG` wins when set; otherwise only `kindred*` logs at `filter`.
///
/// # Panics
/// This must only be called _once_.
pub fn init_logger(filter: log::LevelFilter) {
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    if env.is_empty() {
        std::env::set_var("RUST_LOG", format!("off,kindred={filter}"));
    }

    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "| {} | {: >25} @ {: <4} | {}",
                record.level().as_str().chars().next().unwrap_or('?'),
                record.file_static().unwrap_or("???"),
                record.line().unwrap_or(0),
                record.args(),
            )
        })
        .parse_default_env()
        .init();

    if env.is_empty() {
        log::info!("Log Level (Flag) ... {filter}");
    } else {
        log::info!("Log Level (RUST_LOG) ... {env}");
    }
}
