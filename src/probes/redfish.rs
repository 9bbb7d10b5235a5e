use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::http::{insecure_client, map_reqwest_error};
use super::Probe;
use crate::error::ProbeError;
use crate::types::{Evidence, ProbeResult, Target};

pub const SERVICE_ROOT: &str = "/redfish/v1";

/// The few service-root fields worth reporting. All optional: BMCs differ.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ServiceRoot {
    #[serde(rename = "RedfishVersion")]
    pub redfish_version: Option<String>,
    #[serde(rename = "Vendor")]
    pub vendor: Option<String>,
    #[serde(rename = "Product")]
    pub product: Option<String>,
    #[serde(rename = "UUID")]
    pub uuid: Option<String>,
}

/// Authenticated HTTPS GET of the Redfish service root. Requires 200 and a JSON body.
pub struct RedfishProbe;

#[async_trait]
impl Probe for RedfishProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let credentials = target
            .credentials
            .as_ref()
            .ok_or_else(|| ProbeError::Protocol("no credentials supplied".to_string()))?;
        let path = target.resource.as_deref().unwrap_or(SERVICE_ROOT);
        let link = format!("https://{}{}", target.address(), path);

        let resp = insecure_client(timeout)?
            .get(&link)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ProbeError::Protocol(format!("response status {}", status)));
        }
        let body = resp.bytes().await.map_err(|e| map_reqwest_error(e, timeout))?;
        debug!(target = %target, "Redfish response body:\n{}", String::from_utf8_lossy(&body));

        let mut evidence = Evidence::new(self.name(), target).with_line("status", status.as_str());
        match decode_service_root(&body)? {
            Ok(root) => {
                evidence.push_line("RedfishVersion", root.redfish_version.as_deref().unwrap_or(""));
                evidence.push_line("Vendor", root.vendor.as_deref().unwrap_or(""));
                if let Some(product) = &root.product {
                    evidence.push_line("Product", product);
                }
                if let Some(uuid) = &root.uuid {
                    evidence.push_line("UUID", uuid);
                }
            }
            Err(field_problem) => evidence.push_line("decode", &field_problem),
        }
        Ok(evidence)
    }

    fn name(&self) -> &'static str {
        "redfish"
    }
}

/// Outer error: the body is not JSON at all, which fails the probe. Inner
/// error: the JSON is fine but a field has an unexpected shape, which is only
/// worth reporting.
pub fn decode_service_root(body: &[u8]) -> Result<Result<ServiceRoot, String>, ProbeError> {
    let doc: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProbeError::MalformedResponse(format!("could not parse response: {}", e)))?;
    Ok(serde_json::from_value::<ServiceRoot>(doc).map_err(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_fields() {
        let body = br#"{"RedfishVersion":"1.11.0","Vendor":"Dell","Id":"RootService"}"#;
        let root = decode_service_root(body).unwrap().unwrap();
        assert_eq!(root.redfish_version.as_deref(), Some("1.11.0"));
        assert_eq!(root.vendor.as_deref(), Some("Dell"));
        assert_eq!(root.product, None);
    }

    #[test]
    fn wrong_field_type_is_reported_not_fatal() {
        let body = br#"{"RedfishVersion": 1}"#;
        let inner = decode_service_root(body).unwrap();
        assert!(inner.is_err());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = decode_service_root(b"<html>login</html>").unwrap_err();
        assert_eq!(err.kind(), "malformed-response");
    }
}
