use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::time::timeout_at;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::helper::{connect_with_deadline, upgrade_to_tls, Deadline};
use super::Probe;
use crate::error::ProbeError;
use crate::netutils::join_host_port;
use crate::types::{Evidence, ProbeResult, Target};

pub const TUNNEL_CTRL_PATH: &str = "/tunnel-ctrl";

/// Registration document a site agent sends first on the tunnel control path.
#[derive(Debug, Serialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_type: String,
    pub agent_version: String,
    pub datacenter_id: String,
    pub shared_secret: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Default, Serialize)]
pub struct Capabilities {
    pub http_proxy_enabled: bool,
    #[serde(rename = "inband_http_proxy_enabled")]
    pub in_band_http_proxy_enabled: bool,
    pub file_transfer_enabled: bool,
    #[serde(rename = "inband_file_transfer_enabled")]
    pub in_band_file_transfer_enabled: bool,
    pub switch_subscription_enabled: bool,
    pub command_execution_enabled: bool,
    pub vnc_enabled: bool,
    pub spice_enabled: bool,
}

impl AgentRegistration {
    fn for_probe(target: &Target) -> Self {
        Self {
            agent_id: format!("netprecheck-{}", std::process::id()),
            agent_type: "prerequisite-check".to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            datacenter_id: String::new(),
            shared_secret: target
                .credentials
                .as_ref()
                .map(|c| c.password.clone())
                .unwrap_or_default(),
            capabilities: Capabilities::default(),
        }
    }
}

/// WebSocket over TLS (certificate validation off): upgrade on the target's
/// path, send one registration message, wait for one reply, close normally.
pub struct WebSocketProbe;

#[async_trait]
impl Probe for WebSocketProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let deadline = Deadline::after(timeout);
        let tcp = connect_with_deadline(&target.host, target.port, deadline).await?;
        let tls = upgrade_to_tls(tcp, &target.host, deadline).await?;

        let path = target.resource.as_deref().unwrap_or(TUNNEL_CTRL_PATH);
        let url = format!("wss://{}{}", join_host_port(&target.host, target.port), path);
        let (mut ws, response) = match timeout_at(deadline.instant(), tokio_tungstenite::client_async(url.as_str(), tls)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(ProbeError::Protocol(format!("websocket upgrade: {}", e))),
            Err(_) => return Err(ProbeError::timeout("websocket upgrade", timeout)),
        };
        debug!(target = %target, status = %response.status(), "WebSocket upgraded");

        let registration = serde_json::to_string(&AgentRegistration::for_probe(target))
            .map_err(|e| ProbeError::Protocol(format!("encode registration: {}", e)))?;
        match timeout_at(deadline.instant(), ws.send(Message::Text(registration))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProbeError::Protocol(format!("websocket send: {}", e))),
            Err(_) => return Err(ProbeError::timeout("websocket send", timeout)),
        }

        let reply = match timeout_at(deadline.instant(), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Binary(data)))) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Some(Ok(other))) => {
                return Err(ProbeError::Protocol(format!("unexpected websocket frame: {:?}", other)))
            }
            Ok(Some(Err(e))) => return Err(ProbeError::MalformedResponse(format!("websocket read: {}", e))),
            Ok(None) => return Err(ProbeError::Protocol("websocket closed before reply".to_string())),
            Err(_) => return Err(ProbeError::timeout("websocket read", timeout)),
        };

        let close = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = timeout_at(deadline.instant(), ws.close(Some(close))).await;

        Ok(Evidence::new(self.name(), target)
            .with_line("upgrade", response.status().as_str())
            .with_line("reply", &reply))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
