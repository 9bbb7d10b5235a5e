use tracing::{debug, error, warn};

use super::{bind_udp, recv_next, HarnessContext, ListenerSpec, StateReporter, PONG, READ_BUFFER};
use crate::error::{AcceptError, ListenerError};

/// UDP echo listener: every datagram is answered with `PONG` to its sender.
pub(super) async fn serve(spec: ListenerSpec, ctx: &HarnessContext, state: &StateReporter) -> Result<(), ListenerError> {
    let socket = bind_udp(spec.addr).await?;
    state.listening(socket.local_addr()?);

    let mut buf = [0u8; READ_BUFFER];
    loop {
        match recv_next(&socket, &mut buf, &ctx.shutdown).await {
            Ok((n, peer)) => {
                debug!(peer = %peer, "Received {} bytes on UDP: {}", n, String::from_utf8_lossy(&buf[..n]));
                if let Err(e) = socket.send_to(PONG, peer).await {
                    warn!(peer = %peer, "Could not send UDP reply - {}", e);
                }
            }
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
