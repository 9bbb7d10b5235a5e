use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map a `--log-level` value onto a tracing level. Unknown values fall back
/// to INFO; the bool reports whether that happened.
pub fn parse_level(level: &str) -> (LevelFilter, bool) {
    match level.to_lowercase().as_str() {
        "trace" => (LevelFilter::TRACE, true),
        "debug" => (LevelFilter::DEBUG, true),
        "info" => (LevelFilter::INFO, true),
        "warn" | "warning" => (LevelFilter::WARN, true),
        "error" => (LevelFilter::ERROR, true),
        _ => (LevelFilter::INFO, false),
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `level`.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(level: &str) {
    let (filter, recognized) = parse_level(level);
    let env_filter = EnvFilter::builder()
        .with_default_directive(filter.into())
        .from_env_lossy();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed && !recognized {
        tracing::warn!("Invalid log level value '{}'. Using the default log level INFO.", level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("DEBUG"), (LevelFilter::DEBUG, true));
        assert_eq!(parse_level("Warn"), (LevelFilter::WARN, true));
        assert_eq!(parse_level("loud"), (LevelFilter::INFO, false));
    }
}
