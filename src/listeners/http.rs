//! HTTP, HTTPS and WebSocket-over-TLS listeners. All share one router: the
//! tunnel control path upgrades to WebSocket where enabled, everything else
//! gets `OK`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{accept_loop, bind_tcp, tls, HarnessContext, ListenerKind, ListenerSpec, ShutdownBarrier, StateReporter};
use crate::error::ListenerError;
use crate::probes::websocket::TUNNEL_CTRL_PATH;

pub const OK_BODY: &str = "OK";

/// Per-connection view of the listener, cloned into every request handler.
#[derive(Clone)]
struct Router {
    websocket: bool,
    read_timeout: Duration,
    shutdown: CancellationToken,
    barrier: ShutdownBarrier,
}

pub(super) async fn serve(spec: ListenerSpec, ctx: &HarnessContext, state: &StateReporter) -> Result<(), ListenerError> {
    let acceptor = match spec.kind {
        ListenerKind::Https | ListenerKind::WebSocket => Some(ctx.tls_acceptor()?),
        _ => None,
    };
    let listener = bind_tcp(spec.addr).await?;
    state.listening(listener.local_addr()?);

    let router = Router {
        websocket: spec.kind == ListenerKind::WebSocket,
        read_timeout: ctx.settings.read_timeout,
        shutdown: ctx.shutdown.clone(),
        barrier: ctx.barrier.clone(),
    };
    accept_loop(listener, spec, ctx, state, move |stream, peer| {
        let router = router.clone();
        let acceptor = acceptor.clone();
        async move {
            match acceptor {
                None => router.serve_connection(stream, peer).await,
                Some(acceptor) => match tls::accept(&acceptor, stream, router.read_timeout).await {
                    Ok(tls) => router.serve_connection(tls, peer).await,
                    Err(e) => warn!(peer = %peer, "{}", e),
                },
            }
        }
    })
    .await;
    Ok(())
}

impl Router {
    async fn serve_connection<S>(self, io: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let read_timeout = self.read_timeout;
        let service = service_fn(move |req| {
            let router = self.clone();
            async move { Ok::<_, Infallible>(router.route(req, peer)) }
        });
        let conn = http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades();
        tokio::pin!(conn);

        let result = tokio::select! {
            res = conn.as_mut() => res,
            _ = shutdown.cancelled() => {
                conn.as_mut().graceful_shutdown();
                match tokio::time::timeout(read_timeout, conn.as_mut()).await {
                    Ok(res) => res,
                    Err(_) => return,
                }
            }
        };
        if let Err(e) = result {
            debug!(peer = %peer, "HTTP connection ended with error - {}", e);
        }
    }

    fn route(&self, req: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>> {
        debug!(peer = %peer, method = %req.method(), path = req.uri().path(), "HTTP request");
        if req.uri().path() == TUNNEL_CTRL_PATH && self.websocket {
            return self.upgrade(req, peer);
        }
        text(StatusCode::OK, OK_BODY)
    }

    /// Answer the handshake and hand the upgraded stream to a tracked task.
    fn upgrade(&self, mut req: Request<Incoming>, peer: SocketAddr) -> Response<Full<Bytes>> {
        let Some(key) = websocket_key(&req) else {
            return text(StatusCode::BAD_REQUEST, "expected WebSocket upgrade");
        };
        let accept = derive_accept_key(key.as_bytes());

        let on_upgrade = hyper::upgrade::on(&mut req);
        let router = self.clone();
        self.barrier.spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                    router.control_session(ws, peer).await;
                }
                Err(e) => warn!(peer = %peer, "WebSocket upgrade failed - {}", e),
            }
        });

        let mut res = Response::new(Full::new(Bytes::new()));
        *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = res.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        if let Ok(value) = HeaderValue::from_str(&accept) {
            headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
        }
        res
    }

    /// One message in, `OK` out, normal closure.
    async fn control_session<S>(&self, mut ws: WebSocketStream<S>, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let first = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            msg = tokio::time::timeout(self.read_timeout, ws.next()) => match msg {
                Ok(Some(Ok(msg))) => Some(msg),
                Ok(Some(Err(e))) => {
                    warn!(peer = %peer, "WebSocket read failed - {}", e);
                    None
                }
                Ok(None) => None,
                Err(_) => {
                    warn!(peer = %peer, "WebSocket read timed out after {:?}", self.read_timeout);
                    None
                }
            },
        };
        if let Some(msg) = first {
            info!(peer = %peer, "Received tunnel control message: {}", msg.to_text().unwrap_or("<binary>"));
            if let Err(e) = ws.send(Message::Text(OK_BODY.to_string())).await {
                warn!(peer = %peer, "WebSocket write failed - {}", e);
            }
        }
        let close = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = tokio::time::timeout(self.read_timeout, ws.close(Some(close))).await;
    }
}

fn websocket_key(req: &Request<Incoming>) -> Option<String> {
    let headers = req.headers();
    let connection_upgrade = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !(connection_upgrade && upgrade_websocket) {
        return None;
    }
    headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *res.status_mut() = status;
    res
}
