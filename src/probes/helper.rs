use std::pin::Pin;
use std::time::Duration;

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_openssl::SslStream;

use crate::error::ProbeError;
use crate::netutils::resolve;

/// Fixed payload written by the raw TCP/UDP probes.
pub const PING: &[u8] = b"PING";

/// A probe's total time budget, shared by all of its stages.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

pub async fn connect_with_deadline(
    host: &str,
    port: u16,
    deadline: Deadline,
) -> Result<TcpStream, ProbeError> {
    let addr = match timeout_at(deadline.instant(), resolve(host, port)).await {
        Ok(res) => res?,
        Err(_) => return Err(ProbeError::timeout("resolve", deadline.budget())),
    };
    match timeout_at(deadline.instant(), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeError::Unreachable(format!("connect {}: {}", addr, e))),
        Err(_) => Err(ProbeError::timeout("connect", deadline.budget())),
    }
}

/// Client TLS handshake with certificate validation disabled; the targets are
/// usually self-signed infrastructure endpoints.
pub async fn upgrade_to_tls<S>(
    stream: S,
    sni: &str,
    deadline: Deadline,
) -> Result<SslStream<S>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let tls_err = |e: openssl::error::ErrorStack| ProbeError::Protocol(format!("tls setup: {}", e));
    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls_err)?;
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    let mut config = connector.configure().map_err(tls_err)?;
    config.set_verify_hostname(false);
    let ssl = config.into_ssl(sni).map_err(tls_err)?;
    let mut tls = SslStream::new(ssl, stream).map_err(tls_err)?;

    match timeout_at(deadline.instant(), Pin::new(&mut tls).connect()).await {
        Ok(Ok(())) => Ok(tls),
        Ok(Err(e)) => Err(ProbeError::Protocol(format!("tls handshake: {}", e))),
        Err(_) => Err(ProbeError::timeout("tls handshake", deadline.budget())),
    }
}

/// Write the request under the deadline. A failed or timed-out write is fatal.
pub async fn write_all_with_deadline<S>(
    stream: &mut S,
    payload: &[u8],
    deadline: Deadline,
) -> Result<(), ProbeError>
where
    S: AsyncWrite + Unpin,
{
    match timeout_at(deadline.instant(), stream.write_all(payload)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Unreachable(format!("write: {}", e))),
        Err(_) => Err(ProbeError::timeout("write", deadline.budget())),
    }
}

/// Read one chunk under the deadline. `Err` carries a printable reason; the
/// caller decides whether a missing reply matters.
pub async fn read_with_deadline<S>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Deadline,
) -> Result<usize, String>
where
    S: AsyncRead + Unpin,
{
    match timeout_at(deadline.instant(), stream.read(buf)).await {
        Ok(Ok(0)) => Err("connection closed by peer".to_string()),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no reply within {:?}", deadline.budget())),
    }
}

pub fn printable(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).trim().replace('\n', "\\n")
}
