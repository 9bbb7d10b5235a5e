use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{icmp_packet_iter, transport_channel, TransportChannelType, TransportProtocol};
use tracing::debug;

use super::Probe;
use crate::error::ProbeError;
use crate::netutils::resolve_v4;
use crate::types::{Evidence, ProbeResult, Target};

const ECHO_SEQUENCE: u16 = 1;
const ECHO_REQUEST_LEN: usize = 8;

/// ICMP echo over a raw socket. Needs root or CAP_NET_RAW.
pub struct IcmpProbe;

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let started = Instant::now();
        let dest = resolve_v4(&target.host).await?;
        let remaining = timeout.saturating_sub(started.elapsed());
        let identifier = echo_identifier();

        let exchange = tokio::task::spawn_blocking(move || echo(dest, identifier, remaining));
        let reply = match tokio::time::timeout(remaining, exchange).await {
            Ok(Ok(res)) => res?,
            Ok(Err(join)) => return Err(ProbeError::Protocol(format!("icmp worker: {}", join))),
            Err(_) => return Err(ProbeError::timeout("icmp echo", timeout)),
        };

        debug!(target = %target, peer = %reply.peer, "Got ICMP echo reply");
        Ok(Evidence::new(self.name(), target)
            .with_line("peer", &reply.peer.to_string())
            .with_line("identifier", &reply.identifier.to_string())
            .with_line("rtt_ms", &reply.rtt.as_millis().to_string()))
    }

    fn name(&self) -> &'static str {
        "icmp"
    }
}

/// Echo identifier: the process id masked to 16 bits.
pub fn echo_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

struct EchoReply {
    peer: IpAddr,
    identifier: u16,
    rtt: Duration,
}

/// Build an Echo Request with a valid checksum.
pub fn build_echo_request(buf: &mut [u8; ECHO_REQUEST_LEN], identifier: u16) -> Result<(), ProbeError> {
    let mut packet = MutableEchoRequestPacket::new(&mut buf[..])
        .ok_or_else(|| ProbeError::Protocol("echo request buffer too small".to_string()))?;
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_identifier(identifier);
    packet.set_sequence_number(ECHO_SEQUENCE);
    packet.set_checksum(0);
    let checksum = pnet::util::checksum(packet.packet(), 1);
    packet.set_checksum(checksum);
    Ok(())
}

fn echo(dest: IpAddr, identifier: u16, timeout: Duration) -> Result<EchoReply, ProbeError> {
    let protocol = TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
    let (mut tx, mut rx) = transport_channel(1500, protocol)
        .map_err(|e| ProbeError::Unreachable(format!("raw icmp socket: {}", e)))?;

    let mut buf = [0u8; ECHO_REQUEST_LEN];
    build_echo_request(&mut buf, identifier)?;
    let request = IcmpPacket::new(&buf)
        .ok_or_else(|| ProbeError::Protocol("echo request buffer too small".to_string()))?;

    let sent_at = Instant::now();
    tx.send_to(request, dest)
        .map_err(|e| ProbeError::Unreachable(format!("send to {}: {}", dest, e)))?;

    let mut replies = icmp_packet_iter(&mut rx);
    loop {
        let remaining = timeout.saturating_sub(sent_at.elapsed());
        if remaining.is_zero() {
            return Err(ProbeError::timeout("icmp echo", timeout));
        }
        let (packet, peer) = match replies.next_with_timeout(remaining) {
            Ok(Some(pair)) => pair,
            Ok(None) => return Err(ProbeError::timeout("icmp echo", timeout)),
            Err(e) => return Err(ProbeError::MalformedResponse(e.to_string())),
        };
        // The raw socket sees every ICMP packet on the host; only the target's answer counts.
        if peer != dest {
            continue;
        }
        match packet.get_icmp_type() {
            IcmpTypes::EchoReply => {
                let reply = EchoReplyPacket::new(packet.packet())
                    .ok_or_else(|| ProbeError::MalformedResponse("truncated echo reply".to_string()))?;
                return Ok(EchoReply {
                    peer,
                    identifier: reply.get_identifier(),
                    rtt: sent_at.elapsed(),
                });
            }
            // Our own request looped back when probing a local address.
            IcmpTypes::EchoRequest => continue,
            other => {
                return Err(ProbeError::Protocol(format!(
                    "got ICMP type {} from {}, expected echo reply",
                    other.0, peer
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_checksum_verifies() {
        let mut buf = [0u8; ECHO_REQUEST_LEN];
        build_echo_request(&mut buf, 0x1234).unwrap();
        assert_eq!(buf[0], 8, "type is echo request");
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), ECHO_SEQUENCE);
        let stored = u16::from_be_bytes([buf[2], buf[3]]);
        assert_ne!(stored, 0);
        assert_eq!(pnet::util::checksum(&buf, 1), stored);
    }

    #[test]
    fn identifier_fits_sixteen_bits() {
        assert_eq!(echo_identifier() as u32, std::process::id() & 0xffff);
    }
}
