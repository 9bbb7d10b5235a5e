use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const PROBE_TIMEOUT_VAR: &str = "NETPRECHECK_PROBE_TIMEOUT_SECS";
pub const READ_TIMEOUT_VAR: &str = "NETPRECHECK_READ_TIMEOUT_SECS";
pub const ACCEPT_BACKOFF_VAR: &str = "NETPRECHECK_ACCEPT_BACKOFF_SECS";
pub const TLS_CERT_VAR: &str = "NETPRECHECK_TLS_CERT";
pub const TLS_KEY_VAR: &str = "NETPRECHECK_TLS_KEY";

/// Runtime knobs shared by probes and listeners.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Deadline for one probe, every stage included.
    pub probe_timeout: Duration,
    /// Server-side read deadline per accepted connection.
    pub read_timeout: Duration,
    /// Pause after a transient accept error.
    pub accept_backoff: Duration,
    /// PEM certificate chain and key for TLS listeners. When unset a
    /// self-signed pair is generated at listener startup.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            accept_backoff: Duration::from_secs(5),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            probe_timeout: Duration::from_secs(get_or(PROBE_TIMEOUT_VAR, defaults.probe_timeout.as_secs())),
            read_timeout: Duration::from_secs(get_or(READ_TIMEOUT_VAR, defaults.read_timeout.as_secs())),
            accept_backoff: Duration::from_secs(get_or(ACCEPT_BACKOFF_VAR, defaults.accept_backoff.as_secs())),
            tls_cert: env::var_os(TLS_CERT_VAR).map(PathBuf::from),
            tls_key: env::var_os(TLS_KEY_VAR).map(PathBuf::from),
        }
    }
}

fn get_or<T>(key: &str, fallback: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => parse_or_warn(key, &value, fallback),
        Err(_) => fallback,
    }
}

fn parse_or_warn<T>(key: &str, value: &str, fallback: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match value.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!("Invalid value '{}' for variable '{}'. Using the default value {}.", value, key, fallback);
            fallback
        }
    }
}
