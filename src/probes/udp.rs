use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout_at;
use tracing::warn;

use super::helper::{printable, Deadline, PING};
use super::Probe;
use crate::error::ProbeError;
use crate::netutils::resolve;
use crate::types::{Evidence, ProbeResult, Target};

/// Same contract as the TCP probe over a connected UDP socket: a failed send is
/// fatal, a missing datagram in reply is not.
pub struct UdpProbe;

#[async_trait]
impl Probe for UdpProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let deadline = Deadline::after(timeout);
        let sock = connect_udp(target, deadline).await?;
        send_with_deadline(&sock, PING, deadline).await?;
        let mut evidence = Evidence::new(self.name(), target).with_line("sent", "PING");

        let mut buf = [0u8; 1024];
        match recv_with_deadline(&sock, &mut buf, deadline).await {
            Ok(n) => evidence.push_line("received", &printable(&buf[..n])),
            Err(reason) => {
                warn!(protocol = "udp", target = %target, "Could not read from UDP connection - {}", reason);
                evidence.push_line("received", "none");
            }
        }
        Ok(evidence)
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

pub(crate) async fn connect_udp(target: &Target, deadline: Deadline) -> Result<UdpSocket, ProbeError> {
    let addr = match timeout_at(deadline.instant(), resolve(&target.host, target.port)).await {
        Ok(res) => res?,
        Err(_) => return Err(ProbeError::timeout("resolve", deadline.budget())),
    };
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let sock = UdpSocket::bind(local)
        .await
        .map_err(|e| ProbeError::Unreachable(format!("bind {}: {}", local, e)))?;
    sock.connect(addr)
        .await
        .map_err(|e| ProbeError::Unreachable(format!("connect {}: {}", addr, e)))?;
    Ok(sock)
}

pub(crate) async fn send_with_deadline(
    sock: &UdpSocket,
    payload: &[u8],
    deadline: Deadline,
) -> Result<(), ProbeError> {
    match timeout_at(deadline.instant(), sock.send(payload)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Unreachable(format!("write: {}", e))),
        Err(_) => Err(ProbeError::timeout("write", deadline.budget())),
    }
}

pub(crate) async fn recv_with_deadline(
    sock: &UdpSocket,
    buf: &mut [u8],
    deadline: Deadline,
) -> Result<usize, String> {
    match timeout_at(deadline.instant(), sock.recv(buf)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no reply within {:?}", deadline.budget())),
    }
}
