use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::helper::{connect_with_deadline, read_with_deadline, write_all_with_deadline, Deadline};
use super::Probe;
use crate::types::{Evidence, ProbeResult, Target};

pub const DEFAULT_VNC_PORT: u16 = 5901;

/// TCP reachability of a VNC console, plus the RFB greeting when the server
/// sends one. Stops after the security-type list, so no authentication
/// happens. A silent server after a successful connect is still reachable.
pub struct VncProbe;

#[async_trait]
impl Probe for VncProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let deadline = Deadline::after(timeout);
        let mut stream = connect_with_deadline(&target.host, target.port, deadline).await?;
        let mut evidence = Evidence::new(self.name(), target).with_line("connect", "ok");

        let mut banner = [0u8; 12];
        let n = match read_with_deadline(&mut stream, &mut banner, deadline).await {
            Ok(n) => n,
            Err(reason) => {
                warn!(protocol = "vnc", target = %target, "No RFB banner - {}", reason);
                evidence.push_line("vnc_banner", "none");
                return Ok(evidence);
            }
        };
        let Some(version) = parse_rfb_banner(&banner[..n]) else {
            evidence.push_line("vnc_banner", &String::from_utf8_lossy(&banner[..n]));
            return Ok(evidence);
        };
        evidence.push_line("vnc_version", &version);

        // Answer with the server's own version to get the security types.
        write_all_with_deadline(&mut stream, &banner[..n], deadline).await?;
        let mut sec_buf = [0u8; 64];
        match read_with_deadline(&mut stream, &mut sec_buf, deadline).await {
            Ok(sec_n) => {
                for code in security_types(&version, &sec_buf[..sec_n]) {
                    evidence.push_line("vnc_security_type", &code.to_string());
                }
            }
            Err(reason) => {
                warn!(protocol = "vnc", target = %target, "No RFB security types - {}", reason);
            }
        }
        Ok(evidence)
    }

    fn name(&self) -> &'static str {
        "vnc"
    }
}

/// `RFB 003.008\n` -> `003.008`
pub fn parse_rfb_banner(buf: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(buf).ok()?;
    let version = s.strip_prefix("RFB ")?.trim_end();
    if version.len() == 7 && version.as_bytes()[3] == b'.' {
        Some(version.to_string())
    } else {
        None
    }
}

/// RFB 3.3 servers pick one type (u32); later versions send a counted list.
pub fn security_types(version: &str, buf: &[u8]) -> Vec<u8> {
    if version == "003.003" {
        if buf.len() >= 4 {
            return vec![buf[3]];
        }
        return Vec::new();
    }
    match buf.split_first() {
        Some((&count, rest)) if count > 0 && rest.len() >= count as usize => rest[..count as usize].to_vec(),
        _ => Vec::new(),
    }
}
