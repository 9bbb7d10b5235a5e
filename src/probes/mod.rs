pub mod helper;
pub mod http;
pub mod icmp;
pub mod ipmi;
pub mod redfish;
pub mod ssh;
pub mod tcp;
pub mod udp;
pub mod vnc;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{ProbeResult, Target};

pub use http::{HttpProbe, LinkProbe};
pub use icmp::IcmpProbe;
pub use ipmi::IpmiProbe;
pub use redfish::RedfishProbe;
pub use ssh::SshProbe;
pub use tcp::TcpProbe;
pub use udp::UdpProbe;
pub use vnc::VncProbe;
pub use websocket::WebSocketProbe;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe the target within `timeout`. Every socket or session the probe
    /// opens is released before it returns.
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult;
    /// Human name for logging
    fn name(&self) -> &'static str;
}

pub type ProbeHandle = Arc<dyn Probe>;

/// One handle per protocol, shared by every check scenario.
#[derive(Clone)]
pub struct ProbeSet {
    pub http: ProbeHandle,
    pub https: ProbeHandle,
    pub link: ProbeHandle,
    pub tcp: ProbeHandle,
    pub udp: ProbeHandle,
    pub ssh: ProbeHandle,
    pub icmp: ProbeHandle,
    pub redfish: ProbeHandle,
    pub ipmi: ProbeHandle,
    pub vnc: ProbeHandle,
    pub websocket: ProbeHandle,
}

impl ProbeSet {
    pub fn network() -> Self {
        Self {
            http: Arc::new(HttpProbe::plain()),
            https: Arc::new(HttpProbe::secure()),
            link: Arc::new(LinkProbe),
            tcp: Arc::new(TcpProbe),
            udp: Arc::new(UdpProbe),
            ssh: Arc::new(SshProbe),
            icmp: Arc::new(IcmpProbe),
            redfish: Arc::new(RedfishProbe),
            ipmi: Arc::new(IpmiProbe),
            vnc: Arc::new(VncProbe),
            websocket: Arc::new(WebSocketProbe),
        }
    }
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self::network()
    }
}
