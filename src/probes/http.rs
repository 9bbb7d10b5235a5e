use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::Probe;
use crate::error::ProbeError;
use crate::types::{Evidence, ProbeResult, Target};

/// GET `scheme://host:port`. Any response counts as reachable, whatever the status.
pub struct HttpProbe {
    secure: bool,
}

impl HttpProbe {
    pub fn plain() -> Self {
        Self { secure: false }
    }

    pub fn secure() -> Self {
        Self { secure: true }
    }

    fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let url = format!("{}://{}", self.scheme(), target.address());
        get(insecure_client(timeout)?, self.name(), target, &url, timeout).await
    }

    fn name(&self) -> &'static str {
        self.scheme()
    }
}

/// GET of a full URL taken from the target's resource. Certificates are
/// validated: an intercepting proxy with an untrusted CA fails the check.
pub struct LinkProbe;

#[async_trait]
impl Probe for LinkProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let url = match &target.resource {
            Some(url) => url.clone(),
            None => format!("http://{}", target.address()),
        };
        get(validating_client(timeout)?, self.name(), target, &url, timeout).await
    }

    fn name(&self) -> &'static str {
        "link"
    }
}

/// Client that skips certificate validation; probe targets are often self-signed.
pub(crate) fn insecure_client(timeout: Duration) -> Result<Client, ProbeError> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Protocol(format!("http client: {}", e)))
}

pub(crate) fn validating_client(timeout: Duration) -> Result<Client, ProbeError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Protocol(format!("http client: {}", e)))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::timeout("http request", timeout)
    } else if err.is_connect() {
        ProbeError::Unreachable(err.to_string())
    } else if err.is_decode() {
        ProbeError::MalformedResponse(err.to_string())
    } else {
        ProbeError::Protocol(err.to_string())
    }
}

async fn get(client: Client, protocol: &'static str, target: &Target, url: &str, timeout: Duration) -> ProbeResult {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    let mut evidence = Evidence::new(protocol, target).with_line("status", resp.status().as_str());
    if let Some(server) = resp.headers().get("server").and_then(|v| v.to_str().ok()) {
        evidence.push_line("server", server);
    }
    Ok(evidence)
}
