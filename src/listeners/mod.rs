//! Listener harness: one task per listening socket, all stopped by one
//! cancellation token and tracked by one shutdown barrier.
//!
//! Lifecycle of every listener:
//!
//! ```text
//! Starting -> Listening(addr) -> ShutdownRequested -> Closed
//!     \-> Failed   (bind or TLS setup error; siblings keep running)
//! ```

pub mod dhcp;
pub mod http;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use openssl::ssl::SslAcceptor;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::Settings;
use crate::error::{AcceptError, ListenerError};

/// Fixed reply of the echo listeners.
pub const PONG: &[u8] = b"PONG";
/// Largest request read from one TCP connection or UDP datagram.
pub const READ_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Http,
    Https,
    /// HTTPS carrying the WebSocket control path.
    WebSocket,
    TcpEcho,
    /// TCP echo behind a TLS handshake.
    TlsTcpEcho,
    UdpEcho,
    Dhcp,
}

impl ListenerKind {
    pub fn label(&self) -> &'static str {
        match self {
            ListenerKind::Http => "HTTP",
            ListenerKind::Https => "HTTPS",
            ListenerKind::WebSocket => "WebSocket/TLS",
            ListenerKind::TcpEcho => "TCP",
            ListenerKind::TlsTcpEcho => "TCP/TLS",
            ListenerKind::UdpEcho => "UDP",
            ListenerKind::Dhcp => "DHCP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    pub kind: ListenerKind,
    pub addr: SocketAddr,
}

impl ListenerSpec {
    pub fn new(kind: ListenerKind, addr: SocketAddr) -> Self {
        Self { kind, addr }
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} server on {}", self.kind.label(), self.addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Listening(SocketAddr),
    ShutdownRequested,
    Closed,
    Failed,
}

impl ListenerState {
    fn is_terminal(&self) -> bool {
        matches!(self, ListenerState::Closed | ListenerState::Failed)
    }
}

/// Observer side of a running listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    pub spec: ListenerSpec,
    state: watch::Receiver<ListenerState>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Wait until startup is over. Returns the bound address, or `None` when
    /// the listener failed or was cancelled before it bound.
    pub async fn ready(&mut self) -> Option<SocketAddr> {
        let state = self
            .state
            .wait_for(|s| *s != ListenerState::Starting)
            .await
            .map(|s| *s)
            .unwrap_or(ListenerState::Closed);
        match state {
            ListenerState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// Wait until the listener has released its socket.
    pub async fn closed(&mut self) -> ListenerState {
        self.state
            .wait_for(ListenerState::is_terminal)
            .await
            .map(|s| *s)
            .unwrap_or(ListenerState::Closed)
    }
}

/// Counts in-flight listener and connection tasks. A task is registered when
/// it is spawned and released when it finishes, panics included.
#[derive(Debug, Clone, Default)]
pub struct ShutdownBarrier {
    tracker: TaskTracker,
}

impl ShutdownBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Stop expecting new listeners and wait for every tracked task to end.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// What every listener shares with its siblings.
#[derive(Debug, Clone)]
pub struct HarnessContext {
    pub shutdown: CancellationToken,
    pub barrier: ShutdownBarrier,
    pub settings: Arc<Settings>,
    pub(crate) tls: Arc<tls::SharedAcceptor>,
}

impl HarnessContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            barrier: ShutdownBarrier::new(),
            settings: Arc::new(settings),
            tls: Arc::new(tls::SharedAcceptor::default()),
        }
    }

    /// TLS server context shared by every TLS listener of this harness.
    pub(crate) fn tls_acceptor(&self) -> Result<Arc<SslAcceptor>, ListenerError> {
        self.tls.get(&self.settings)
    }

    /// Sleep out the accept backoff, cut short by cancellation.
    pub(crate) async fn backoff(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.settings.accept_backoff) => {}
        }
    }
}

/// Start one listener on the barrier. Registration happens before the task
/// first runs, so a cancellation racing the start is never missed.
pub fn start(spec: ListenerSpec, ctx: &HarnessContext) -> ListenerHandle {
    let (state_tx, state_rx) = watch::channel(ListenerState::Starting);
    let task_ctx = ctx.clone();
    ctx.barrier.spawn(async move {
        let state = StateReporter { spec, tx: state_tx };
        let result = match spec.kind {
            ListenerKind::TcpEcho | ListenerKind::TlsTcpEcho => tcp::serve(spec, &task_ctx, &state).await,
            ListenerKind::UdpEcho => udp::serve(spec, &task_ctx, &state).await,
            ListenerKind::Dhcp => dhcp::serve(spec, &task_ctx, &state).await,
            ListenerKind::Http | ListenerKind::Https | ListenerKind::WebSocket => {
                http::serve(spec, &task_ctx, &state).await
            }
        };
        match result {
            Ok(()) => {
                state.set(ListenerState::Closed);
                info!("{} shut down", spec);
            }
            Err(err) => {
                state.set(ListenerState::Failed);
                error!("Error starting {} - {}", spec, err);
            }
        }
    });
    ListenerHandle { spec, state: state_rx }
}

pub(crate) struct StateReporter {
    spec: ListenerSpec,
    tx: watch::Sender<ListenerState>,
}

impl StateReporter {
    pub(crate) fn set(&self, state: ListenerState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn listening(&self, addr: SocketAddr) {
        info!("Started {} (bound {})", self.spec, addr);
        self.set(ListenerState::Listening(addr));
    }

    pub(crate) fn shutting_down(&self) {
        info!("Shutting down {}", self.spec);
        self.set(ListenerState::ShutdownRequested);
    }
}

pub(crate) async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })
}

pub(crate) async fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, ListenerError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })
}

/// Wait for the next connection. Cancellation wins over a pending accept and
/// comes back as [`AcceptError::Closed`].
pub(crate) async fn accept_next(
    listener: &TcpListener,
    shutdown: &CancellationToken,
) -> Result<(TcpStream, SocketAddr), AcceptError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(AcceptError::Closed),
        res = listener.accept() => res.map_err(AcceptError::Transient),
    }
}

/// Datagram flavour of [`accept_next`].
pub(crate) async fn recv_next(
    socket: &UdpSocket,
    buf: &mut [u8],
    shutdown: &CancellationToken,
) -> Result<(usize, SocketAddr), AcceptError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(AcceptError::Closed),
        res = socket.recv_from(buf) => res.map_err(AcceptError::Transient),
    }
}

/// Accept loop shared by every stream listener. Each connection is handled on
/// its own barrier-tracked task. Returns once cancellation closed the socket.
pub(crate) async fn accept_loop<F, Fut>(
    listener: TcpListener,
    spec: ListenerSpec,
    ctx: &HarnessContext,
    state: &StateReporter,
    mut handle: F,
) where
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match accept_next(&listener, &ctx.shutdown).await {
            Ok((stream, peer)) => {
                ctx.barrier.spawn(handle(stream, peer));
            }
            Err(AcceptError::Closed) => {
                state.shutting_down();
                drop(listener);
                return;
            }
            Err(AcceptError::Transient(err)) => {
                error!("Could not accept connection on {} - {}", spec, err);
                ctx.backoff().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn accept_backoff_ends_on_cancel() {
        let ctx = HarnessContext::new(Settings {
            accept_backoff: Duration::from_secs(3600),
            ..Settings::default()
        });
        let shutdown = ctx.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancel();
        });
        tokio::time::timeout(Duration::from_secs(2), ctx.backoff())
            .await
            .expect("backoff cut short");
    }

    #[tokio::test]
    async fn accept_next_loses_to_cancellation() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(matches!(accept_next(&listener, &shutdown).await, Err(AcceptError::Closed)));
    }

    #[test]
    fn tls_echo_label() {
        let spec = ListenerSpec::new(ListenerKind::TlsTcpEcho, "127.0.0.1:9010".parse().unwrap());
        assert_eq!(spec.to_string(), "TCP/TLS server on 127.0.0.1:9010");
    }
}
