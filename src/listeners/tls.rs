use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod, SslVersion};
use openssl::x509::{X509Ref, X509};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::{debug, info};

use crate::config::{Settings, TLS_CERT_VAR, TLS_KEY_VAR};
use crate::error::ListenerError;

/// Key exchange groups offered by TLS listeners, in preference order.
pub const GROUPS: &str = "X25519:P-256";
const SELF_SIGNED_NAMES: &[&str] = &["localhost", "netprecheck.local"];

/// Server context built on first use and then handed to every TLS listener of
/// the harness, so all of them present the same certificate. A setup error is
/// kept too and fails each listener that asks for it.
#[derive(Default)]
pub struct SharedAcceptor {
    cell: OnceLock<Result<Arc<SslAcceptor>, String>>,
}

impl SharedAcceptor {
    pub fn get(&self, settings: &Settings) -> Result<Arc<SslAcceptor>, ListenerError> {
        let built = self.cell.get_or_init(|| match acceptor(settings) {
            Ok(acceptor) => Ok(Arc::new(acceptor)),
            Err(ListenerError::Tls(reason)) => Err(reason),
            Err(e) => Err(e.to_string()),
        });
        match built {
            Ok(acceptor) => Ok(acceptor.clone()),
            Err(reason) => Err(ListenerError::Tls(reason.clone())),
        }
    }
}

impl fmt::Debug for SharedAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAcceptor")
            .field("built", &self.cell.get().map(|r| r.is_ok()))
            .finish()
    }
}

/// Build a server context: TLS 1.3 only, certificate from the configured PEM
/// files or a freshly generated self-signed pair.
pub fn acceptor(settings: &Settings) -> Result<SslAcceptor, ListenerError> {
    let mut builder = SslAcceptor::mozilla_modern_v5(SslMethod::tls_server())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_3))?;
    builder.set_groups_list(GROUPS)?;

    match (&settings.tls_cert, &settings.tls_key) {
        (Some(cert), Some(key)) => {
            builder.set_certificate_chain_file(cert)?;
            builder.set_private_key_file(key, SslFiletype::PEM)?;
            info!("Loaded TLS certificate from {}", cert.display());
        }
        (None, None) => {
            let (cert, key) = self_signed()?;
            builder.set_certificate(&cert)?;
            builder.set_private_key(&key)?;
            info!("Using self-signed TLS certificate for {}", common_name(&cert).unwrap_or_default());
        }
        _ => {
            return Err(ListenerError::Tls(format!(
                "{} and {} must be set together",
                TLS_CERT_VAR, TLS_KEY_VAR
            )))
        }
    }
    builder.check_private_key()?;
    Ok(builder.build())
}

fn self_signed() -> Result<(X509, PKey<openssl::pkey::Private>), ListenerError> {
    let names = SELF_SIGNED_NAMES.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let generated = rcgen::generate_simple_self_signed(names).map_err(|e| ListenerError::Tls(e.to_string()))?;
    let cert_pem = generated.serialize_pem().map_err(|e| ListenerError::Tls(e.to_string()))?;
    let key_pem = generated.serialize_private_key_pem();
    Ok((X509::from_pem(cert_pem.as_bytes())?, PKey::private_key_from_pem(key_pem.as_bytes())?))
}

fn common_name(cert: &X509Ref) -> Option<String> {
    let entry = cert.subject_name().entries_by_nid(Nid::COMMONNAME).next()?;
    entry.data().as_utf8().ok().map(|s| s.to_string())
}

/// Server-side handshake, bounded by the listener read timeout.
pub async fn accept(acceptor: &SslAcceptor, stream: TcpStream, limit: Duration) -> Result<SslStream<TcpStream>, String> {
    let ssl = Ssl::new(acceptor.context()).map_err(|e| e.to_string())?;
    let mut tls = SslStream::new(ssl, stream).map_err(|e| e.to_string())?;
    match tokio::time::timeout(limit, Pin::new(&mut tls).accept()).await {
        Ok(Ok(())) => {
            debug!(version = tls.ssl().version_str(), "TLS handshake completed");
            Ok(tls)
        }
        Ok(Err(e)) => Err(format!("TLS handshake failed: {}", e)),
        Err(_) => Err(format!("TLS handshake timed out after {:?}", limit)),
    }
}
