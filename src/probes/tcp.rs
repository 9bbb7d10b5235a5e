use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::helper::{connect_with_deadline, printable, read_with_deadline, write_all_with_deadline, Deadline, PING};
use super::Probe;
use crate::types::{Evidence, ProbeResult, Target};

/// Connect, write `PING`, try to read a reply.
///
/// A failed connect or write fails the probe. A missing reply after a
/// successful write only logs a warning: plenty of reachable services accept
/// bytes without echoing anything back.
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let deadline = Deadline::after(timeout);
        let mut stream = connect_with_deadline(&target.host, target.port, deadline).await?;

        write_all_with_deadline(&mut stream, PING, deadline).await?;
        let mut evidence = Evidence::new(self.name(), target).with_line("sent", "PING");

        let mut buf = [0u8; 1024];
        match read_with_deadline(&mut stream, &mut buf, deadline).await {
            Ok(n) => evidence.push_line("received", &printable(&buf[..n])),
            Err(reason) => {
                warn!(protocol = "tcp", target = %target, "Could not read from TCP connection - {}", reason);
                evidence.push_line("received", "none");
            }
        }
        Ok(evidence)
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
