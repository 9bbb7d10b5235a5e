use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use netprecheck::config::Settings;
use netprecheck::listeners::{self, HarnessContext, ListenerKind, ListenerSpec};
use netprecheck::probes::{HttpProbe, LinkProbe, Probe, RedfishProbe, WebSocketProbe};
use netprecheck::types::{Credentials, Target};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_tls_listener(ctx: &HarnessContext) -> SocketAddr {
    let spec = ListenerSpec::new(ListenerKind::WebSocket, "127.0.0.1:0".parse().unwrap());
    let mut handle = listeners::start(spec, ctx);
    handle.ready().await.expect("TLS listener started")
}

async fn tls_connect(addr: SocketAddr) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let mut config = builder.build().configure().unwrap();
    config.set_verify_hostname(false);
    let ssl = config.into_ssl("localhost").unwrap();
    let tcp = TcpStream::connect(addr).await.unwrap();
    let mut tls = SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut tls).connect().await.unwrap();
    tls
}

#[tokio::test]
async fn control_path_replies_ok_then_closes_normally() {
    let ctx = HarnessContext::new(Settings::default());
    let addr = start_tls_listener(&ctx).await;

    let tls = tls_connect(addr).await;
    let url = format!("wss://127.0.0.1:{}/tunnel-ctrl", addr.port());
    let (mut ws, response) = tokio_tungstenite::client_async(url.as_str(), tls).await.unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("OK".to_string()));

    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {:?}", other),
    }

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn websocket_probe_passes_against_listener() {
    let ctx = HarnessContext::new(Settings::default());
    let addr = start_tls_listener(&ctx).await;

    let target = Target::new("127.0.0.1", addr.port()).with_resource("/tunnel-ctrl");
    let evidence = WebSocketProbe.probe(&target, TIMEOUT).await.unwrap();
    assert!(evidence.detail.contains("reply: OK"), "{}", evidence.detail);

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn other_paths_answer_plain_ok() {
    let ctx = HarnessContext::new(Settings::default());
    let addr = start_tls_listener(&ctx).await;
    let mut http = listeners::start(ListenerSpec::new(ListenerKind::Http, "127.0.0.1:0".parse().unwrap()), &ctx);
    let http_addr = http.ready().await.unwrap();

    let evidence = HttpProbe::secure()
        .probe(&Target::new("127.0.0.1", addr.port()), TIMEOUT)
        .await
        .unwrap();
    assert!(evidence.detail.contains("200"), "{}", evidence.detail);

    let evidence = HttpProbe::plain()
        .probe(&Target::new("127.0.0.1", http_addr.port()), TIMEOUT)
        .await
        .unwrap();
    assert!(evidence.detail.contains("200"), "{}", evidence.detail);

    let body = reqwest::get(format!("http://{}/tunnel-ctrl", http_addr)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "OK");

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn plain_https_listener_does_not_upgrade() {
    let ctx = HarnessContext::new(Settings::default());
    let mut https = listeners::start(ListenerSpec::new(ListenerKind::Https, "127.0.0.1:0".parse().unwrap()), &ctx);
    let addr = https.ready().await.unwrap();

    let target = Target::new("127.0.0.1", addr.port()).with_resource("/tunnel-ctrl");
    let err = WebSocketProbe.probe(&target, TIMEOUT).await.unwrap_err();
    assert_eq!(err.kind(), "protocol-error");

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn redfish_probe_rejects_non_json_service_root() {
    let ctx = HarnessContext::new(Settings::default());
    let addr = start_tls_listener(&ctx).await;

    let target = Target::new("127.0.0.1", addr.port())
        .with_credentials(Credentials::new("root", "calvin"))
        .with_resource("/redfish/v1");
    let err = RedfishProbe.probe(&target, TIMEOUT).await.unwrap_err();
    assert_eq!(err.kind(), "malformed-response");

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn shutdown_drains_open_http_connection() {
    let ctx = HarnessContext::new(Settings::default());
    let mut http = listeners::start(ListenerSpec::new(ListenerKind::Http, "127.0.0.1:0".parse().unwrap()), &ctx);
    let addr = http.ready().await.unwrap();

    // keep-alive connection left open by the client
    let _idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    ctx.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(3), ctx.barrier.drain())
        .await
        .expect("drained");
}

#[tokio::test]
async fn link_probe_rejects_untrusted_certificate() {
    let ctx = HarnessContext::new(Settings::default());
    let mut https = listeners::start(ListenerSpec::new(ListenerKind::Https, "127.0.0.1:0".parse().unwrap()), &ctx);
    let addr = https.ready().await.unwrap();

    let evidence = HttpProbe::secure()
        .probe(&Target::new("127.0.0.1", addr.port()), TIMEOUT)
        .await
        .expect("endpoint probe skips validation");
    assert!(evidence.detail.contains("200"), "{}", evidence.detail);

    let link = Target::link(&format!("https://127.0.0.1:{}/", addr.port())).unwrap();
    assert!(LinkProbe.probe(&link, TIMEOUT).await.is_err());

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn tls_listeners_share_one_certificate() {
    let ctx = HarnessContext::new(Settings::default());
    let first = start_tls_listener(&ctx).await;
    let second = start_tls_listener(&ctx).await;

    let der = |tls: &SslStream<TcpStream>| tls.ssl().peer_certificate().unwrap().to_der().unwrap();
    let a = tls_connect(first).await;
    let b = tls_connect(second).await;
    assert_eq!(der(&a), der(&b));
    drop((a, b));

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}

#[tokio::test]
async fn tls_tcp_echo_answers_pong() {
    let ctx = HarnessContext::new(Settings::default());
    let mut handle = listeners::start(ListenerSpec::new(ListenerKind::TlsTcpEcho, "127.0.0.1:0".parse().unwrap()), &ctx);
    let addr = handle.ready().await.unwrap();

    let mut tls = tls_connect(addr).await;
    tls.write_all(b"PING").await.unwrap();
    let mut reply = [0u8; 4];
    tls.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"PONG");
    drop(tls);

    ctx.shutdown.cancel();
    ctx.barrier.drain().await;
}
