use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{ConfigError, ProbeError};
use crate::netutils::join_host_port;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One endpoint to probe. `resource` holds a full URL for link probes, or a
/// request path for probes that talk to a fixed URI.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub resource: Option<String>,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            resource: None,
        }
    }

    /// Build a target from an absolute URL; host and port come from the URL.
    pub fn link(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: "url".to_string(),
            value: url.to_string(),
            reason,
        };
        let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("unknown scheme".to_string()))?;
        Ok(Self {
            host,
            port,
            credentials: None,
            resource: Some(url.to_string()),
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) if r.contains("://") => f.write_str(r),
            Some(path) => write!(f, "{}{}", self.address(), path),
            None => f.write_str(&self.address()),
        }
    }
}

/// Diagnostic payload of a successful probe.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub protocol: &'static str,
    pub target: String,
    pub detail: String,
    pub observed_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(protocol: &'static str, target: &Target) -> Self {
        Self {
            protocol,
            target: target.to_string(),
            detail: String::new(),
            observed_at: Utc::now(),
        }
    }

    /// Append a `label: value` line to the detail.
    pub fn push_line(&mut self, label: &str, value: &str) {
        if !self.detail.is_empty() {
            self.detail.push('\n');
        }
        self.detail.push_str(label);
        self.detail.push_str(": ");
        self.detail.push_str(value);
    }

    pub fn with_line(mut self, label: &str, value: &str) -> Self {
        self.push_line(label, value);
        self
    }
}

pub type ProbeResult = Result<Evidence, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_is_stamped_and_lines_accumulate() {
        let before = Utc::now();
        let evidence = Evidence::new("tcp", &Target::new("10.0.0.1", 22))
            .with_line("connect", "ok")
            .with_line("received", "none");
        assert!(evidence.observed_at >= before && evidence.observed_at <= Utc::now());
        assert_eq!(evidence.target, "10.0.0.1:22");
        assert_eq!(evidence.detail, "connect: ok\nreceived: none");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = format!("{:?}", Credentials::new("root", "calvin"));
        assert!(creds.contains("root"));
        assert!(!creds.contains("calvin"));
    }

    #[test]
    fn link_target_takes_host_and_port_from_url() {
        let target = Target::link("https://[::1]:8443/repo").unwrap();
        assert_eq!((target.host.as_str(), target.port), ("::1", 8443));
        let target = Target::link("http://mirror.local/ubuntu.iso").unwrap();
        assert_eq!(target.port, 80);
        assert!(Target::link("not a url").is_err());
    }
}
