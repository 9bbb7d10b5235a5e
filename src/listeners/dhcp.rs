//! DHCP observer. Requests are decoded and logged, never answered.

use dhcproto::v4::{DhcpOption, Message, OptionCode};
use dhcproto::{Decodable, Decoder};
use tracing::{error, info, warn};

use super::{bind_udp, recv_next, HarnessContext, ListenerSpec, StateReporter};
use crate::error::{AcceptError, ListenerError};

/// Largest DHCP datagram accepted; BOOTP minimum is 300, options push it past 576.
const DHCP_BUFFER: usize = 1500;

pub(super) async fn serve(spec: ListenerSpec, ctx: &HarnessContext, state: &StateReporter) -> Result<(), ListenerError> {
    let socket = bind_udp(spec.addr).await?;
    socket.set_broadcast(true)?;
    state.listening(socket.local_addr()?);

    let mut buf = vec![0u8; DHCP_BUFFER];
    loop {
        match recv_next(&socket, &mut buf, &ctx.shutdown).await {
            Ok((n, peer)) => match summarize(&buf[..n]) {
                Ok(summary) => info!(peer = %peer, "DHCP {}", summary),
                Err(reason) => warn!(peer = %peer, "Ignoring {} byte datagram - {}", n, reason),
            },
            Err(AcceptError::Closed) => {
                state.shutting_down();
                return Ok(());
            }
            Err(AcceptError::Transient(e)) => {
                error!("Could not read datagram on {} - {}", spec, e);
                ctx.backoff().await;
            }
        }
    }
}

/// One log line describing a DHCP message: type, client hardware address, xid.
pub fn summarize(datagram: &[u8]) -> Result<String, String> {
    let msg = Message::decode(&mut Decoder::new(datagram)).map_err(|e| e.to_string())?;
    let kind = match msg.opts().get(OptionCode::MessageType) {
        Some(DhcpOption::MessageType(t)) => format!("{:?}", t),
        _ => "BOOTP".to_string(),
    };
    let mac = msg
        .chaddr()
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");
    Ok(format!("{} from {} xid={:#010x}", kind, mac, msg.xid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::MessageType;
    use dhcproto::{Encodable, Encoder};

    #[test]
    fn summarizes_discover() {
        let mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let mut msg = Message::default();
        msg.set_xid(0xdead_beef).set_chaddr(&mac);
        msg.opts_mut().insert(DhcpOption::MessageType(MessageType::Discover));

        let mut buf = Vec::new();
        msg.encode(&mut Encoder::new(&mut buf)).unwrap();

        let line = summarize(&buf).unwrap();
        assert_eq!(line, "Discover from 52:54:00:12:34:56 xid=0xdeadbeef");
    }

    #[test]
    fn rejects_short_datagram() {
        assert!(summarize(b"PING").is_err());
    }
}
