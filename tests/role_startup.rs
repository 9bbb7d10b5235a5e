use std::net::SocketAddr;
use std::time::Duration;

use dhcproto::v4::{DhcpOption, Message, MessageType};
use dhcproto::{Encodable, Encoder};
use netprecheck::commands::Arguments;
use netprecheck::config::Settings;
use netprecheck::listeners::{self, HarnessContext, ListenerKind, ListenerSpec, ListenerState};
use netprecheck::orchestrator::{Outcome, Role, Supervisor};
use tokio::net::{TcpListener, UdpSocket};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn one_busy_port_does_not_stop_the_others() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let busy = occupied.local_addr().unwrap();

    let ctx = HarnessContext::new(Settings::default());
    let specs = [
        ListenerSpec::new(ListenerKind::Http, loopback()),
        ListenerSpec::new(ListenerKind::TcpEcho, busy),
        ListenerSpec::new(ListenerKind::TcpEcho, loopback()),
        ListenerSpec::new(ListenerKind::UdpEcho, loopback()),
        ListenerSpec::new(ListenerKind::WebSocket, loopback()),
    ];
    let mut handles: Vec<_> = specs.iter().map(|s| listeners::start(*s, &ctx)).collect();

    let mut listening = 0;
    for handle in handles.iter_mut() {
        match handle.ready().await {
            Some(_) => listening += 1,
            None => assert_eq!(handle.spec.addr, busy),
        }
    }
    assert_eq!(listening, specs.len() - 1);
    assert_eq!(handles[1].state(), ListenerState::Failed);

    ctx.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), ctx.barrier.drain())
        .await
        .expect("all listeners drained");
    for (i, handle) in handles.iter().enumerate() {
        let expected = if i == 1 { ListenerState::Failed } else { ListenerState::Closed };
        assert_eq!(handle.state(), expected);
    }
}

#[tokio::test]
async fn cancel_before_bind_still_drains() {
    let ctx = HarnessContext::new(Settings::default());
    ctx.shutdown.cancel();
    let mut handle = listeners::start(ListenerSpec::new(ListenerKind::TcpEcho, loopback()), &ctx);
    ctx.barrier.drain().await;
    assert_eq!(handle.closed().await, ListenerState::Closed);
}

#[tokio::test]
async fn site_service_observes_dhcp_without_answering() {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dhcp_port = {
        let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        s.local_addr().unwrap().port()
    };
    let args: Arguments = [("listen-ip", "127.0.0.1".to_string()), ("dhcp-port", dhcp_port.to_string())]
        .into_iter()
        .collect();

    let supervisor = Supervisor::new(Settings::default());
    let mut handles = supervisor.start_role(Role::SiteController, &args).unwrap();
    assert_eq!(handles.len(), 1);
    let addr = handles[0].ready().await.expect("DHCP listener bound");

    let mut discover = Message::default();
    discover.set_chaddr(&[0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc]);
    discover.opts_mut().insert(DhcpOption::MessageType(MessageType::Discover));
    let mut buf = Vec::new();
    discover.encode(&mut Encoder::new(&mut buf)).unwrap();
    probe.send_to(&buf, addr).await.unwrap();

    let mut reply = [0u8; 1500];
    let answered = tokio::time::timeout(Duration::from_millis(300), probe.recv_from(&mut reply)).await;
    assert!(answered.is_err(), "DHCP listener must stay silent");

    supervisor.shutdown().await;
    supervisor.shutdown().await;
    assert_eq!(handles[0].state(), ListenerState::Closed);
}

#[tokio::test]
async fn serve_until_stops_on_signal() {
    let port = {
        let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        s.local_addr().unwrap().port()
    };
    let args: Arguments = [("listen-ip", "127.0.0.1".to_string()), ("dhcp-port", port.to_string())]
        .into_iter()
        .collect();
    let supervisor = Supervisor::new(Settings::default());
    let outcome = supervisor
        .serve_until(Role::SiteController, &args, tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(supervisor.context().barrier.outstanding(), 0);
}

#[tokio::test]
async fn bad_listen_ip_is_rejected_before_binding() {
    let args: Arguments = [("listen-ip", "300.1.1.1")].into_iter().collect();
    let supervisor = Supervisor::new(Settings::default());
    assert!(supervisor.start_role(Role::GlobalController, &args).is_err());
}

#[tokio::test]
async fn role_with_no_listener_up_fails_startup() {
    let occupied = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    let args: Arguments = [("listen-ip", "127.0.0.1".to_string()), ("dhcp-port", port.to_string())]
        .into_iter()
        .collect();

    let supervisor = Supervisor::new(Settings::default());
    let outcome = supervisor
        .serve_until(Role::SiteController, &args, std::future::pending())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::StartupFailed);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn signal_during_startup_interrupts_and_drains() {
    // the only listener cannot bind, so without the signal this would be a startup failure
    let occupied = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    let args: Arguments = [("listen-ip", "127.0.0.1".to_string()), ("dhcp-port", port.to_string())]
        .into_iter()
        .collect();

    let supervisor = Supervisor::new(Settings::default());
    let outcome = supervisor
        .serve_until(Role::SiteController, &args, std::future::ready(()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(supervisor.context().barrier.outstanding(), 0);
    assert!(supervisor.context().shutdown.is_cancelled());
}
