use std::io::{Cursor, Read};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use super::helper::Deadline;
use super::udp::{connect_udp, recv_with_deadline, send_with_deadline};
use super::Probe;
use crate::types::{Evidence, ProbeResult, Target};

const RMCP_VERSION: u8 = 0x06;
const RMCP_NO_ACK: u8 = 0xff;
const RMCP_CLASS_ASF: u8 = 0x06;
const ASF_IANA: u32 = 4542;
const ASF_PRESENCE_PING: u8 = 0x80;
const ASF_PRESENCE_PONG: u8 = 0x40;
const ENTITY_IPMI_SUPPORTED: u8 = 0x80;

/// UDP reachability of the BMC's RMCP port using an ASF Presence Ping.
///
/// This approximates IPMI reachability; no IPMI session is negotiated. As with
/// the UDP probe, only a failed send fails the check.
pub struct IpmiProbe;

#[async_trait]
impl Probe for IpmiProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let deadline = Deadline::after(timeout);
        let sock = connect_udp(target, deadline).await?;
        let tag: u8 = rand::random();
        send_with_deadline(&sock, &presence_ping(tag), deadline).await?;

        let mut evidence = Evidence::new(self.name(), target).with_line("sent", "asf presence ping");
        let mut buf = [0u8; 512];
        match recv_with_deadline(&sock, &mut buf, deadline).await {
            Ok(n) => match parse_presence_pong(&buf[..n]) {
                Some(pong) => {
                    evidence.push_line("received", "asf presence pong");
                    evidence.push_line("ipmi_supported", &pong.ipmi_supported.to_string());
                    evidence.push_line("iana", &pong.iana.to_string());
                }
                None => evidence.push_line("received", &format!("{} bytes, not a presence pong", n)),
            },
            Err(reason) => {
                warn!(protocol = "ipmi", target = %target, "No RMCP reply - {}", reason);
                evidence.push_line("received", "none");
            }
        }
        Ok(evidence)
    }

    fn name(&self) -> &'static str {
        "ipmi"
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct PresencePong {
    pub tag: u8,
    pub iana: u32,
    pub ipmi_supported: bool,
}

pub fn presence_ping(tag: u8) -> Vec<u8> {
    let mut msg = Vec::with_capacity(12);
    msg.extend_from_slice(&[RMCP_VERSION, 0x00, RMCP_NO_ACK, RMCP_CLASS_ASF]);
    // writes into a Vec cannot fail
    let _ = msg.write_u32::<BigEndian>(ASF_IANA);
    msg.extend_from_slice(&[ASF_PRESENCE_PING, tag, 0x00, 0x00]);
    msg
}

pub fn parse_presence_pong(buf: &[u8]) -> Option<PresencePong> {
    let mut rdr = Cursor::new(buf);
    let mut header = [0u8; 4];
    rdr.read_exact(&mut header).ok()?;
    if header[0] != RMCP_VERSION || header[3] != RMCP_CLASS_ASF {
        return None;
    }
    let _asf_iana = rdr.read_u32::<BigEndian>().ok()?;
    let msg_type = rdr.read_u8().ok()?;
    if msg_type != ASF_PRESENCE_PONG {
        return None;
    }
    let tag = rdr.read_u8().ok()?;
    let _reserved = rdr.read_u8().ok()?;
    let len = rdr.read_u8().ok()?;
    if len < 9 {
        return None;
    }
    let iana = rdr.read_u32::<BigEndian>().ok()?;
    let _oem = rdr.read_u32::<BigEndian>().ok()?;
    let entities = rdr.read_u8().ok()?;
    Some(PresencePong {
        tag,
        iana,
        ipmi_supported: entities & ENTITY_IPMI_SUPPORTED != 0,
    })
}
