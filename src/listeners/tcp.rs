use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{accept_loop, bind_tcp, tls, HarnessContext, ListenerKind, ListenerSpec, StateReporter, PONG, READ_BUFFER};
use crate::error::ListenerError;

/// TCP echo listener: read one request, answer `PONG`, close. The TLS kind
/// runs the same exchange after a server handshake.
pub(super) async fn serve(spec: ListenerSpec, ctx: &HarnessContext, state: &StateReporter) -> Result<(), ListenerError> {
    let acceptor = match spec.kind {
        ListenerKind::TlsTcpEcho => Some(ctx.tls_acceptor()?),
        _ => None,
    };
    let listener = bind_tcp(spec.addr).await?;
    state.listening(listener.local_addr()?);

    let read_timeout = ctx.settings.read_timeout;
    accept_loop(listener, spec, ctx, state, move |stream, peer| {
        let acceptor = acceptor.clone();
        async move {
            match acceptor {
                None => handle_connection(stream, peer, read_timeout).await,
                Some(acceptor) => match tls::accept(&acceptor, stream, read_timeout).await {
                    Ok(tls) => handle_connection(tls, peer, read_timeout).await,
                    Err(e) => warn!(peer = %peer, "{}", e),
                },
            }
        }
    })
    .await;
    Ok(())
}

pub(super) async fn handle_connection<S>(mut stream: S, peer: SocketAddr, read_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; READ_BUFFER];
    match tokio::time::timeout(read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => {
            debug!(peer = %peer, "Received {} bytes on TCP: {}", n, String::from_utf8_lossy(&buf[..n]));
            if let Err(e) = stream.write_all(PONG).await {
                warn!(peer = %peer, "Could not send TCP reply - {}", e);
            }
            let _ = stream.shutdown().await;
        }
        Ok(Err(e)) => warn!(peer = %peer, "TCP read failed - {}", e),
        Err(_) => warn!(peer = %peer, "TCP read timed out after {:?}", read_timeout),
    }
}
