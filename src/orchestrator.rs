//! Service orchestrator: starts a role's listeners or a one-shot scenario,
//! waits for completion or a termination signal, then cancels and drains.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::checks::{AggregateReport, Scenario};
use crate::commands::Arguments;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::listeners::{self, HarnessContext, ListenerHandle, ListenerKind, ListenerSpec};
use crate::probes::ProbeSet;

/// Ports reserved for future global controller services; served by inert echo listeners.
const RESERVED_GLOBAL_PORTS: &[u16] = &[9003, 9009, 9011];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    GlobalController,
    SiteController,
}

impl Role {
    pub fn title(&self) -> &'static str {
        match self {
            Role::GlobalController => "Global Controller service",
            Role::SiteController => "Site Controller service",
        }
    }

    /// Listener set of the role. Argument problems surface before anything binds.
    pub fn listeners(&self, args: &Arguments) -> Result<Vec<ListenerSpec>, ConfigError> {
        let ip: IpAddr = args.parse_or("listen-ip", IpAddr::from([0, 0, 0, 0]))?;
        let at = |port: u16| SocketAddr::new(ip, port);

        match self {
            Role::GlobalController => {
                let tunnel_ctrl = match args.get("tunnel-ctrl").map(str::to_lowercase).as_deref() {
                    None | Some("websocket") => ListenerKind::WebSocket,
                    Some("tcp") => ListenerKind::TcpEcho,
                    Some("tls") => ListenerKind::TlsTcpEcho,
                    Some(other) => {
                        return Err(ConfigError::InvalidValue {
                            key: "tunnel-ctrl".to_string(),
                            value: other.to_string(),
                            reason: "expected websocket, tcp or tls".to_string(),
                        })
                    }
                };
                let mut specs = vec![
                    ListenerSpec::new(ListenerKind::Http, at(80)),
                    ListenerSpec::new(ListenerKind::WebSocket, at(443)),
                    ListenerSpec::new(tunnel_ctrl, at(9010)),
                    // tunnel HTTP proxy
                    ListenerSpec::new(ListenerKind::Http, at(9090)),
                    // tunnel TCP proxy
                    ListenerSpec::new(ListenerKind::TcpEcho, at(9091)),
                    ListenerSpec::new(ListenerKind::UdpEcho, at(53)),
                ];
                specs.extend(
                    RESERVED_GLOBAL_PORTS
                        .iter()
                        .map(|port| ListenerSpec::new(ListenerKind::TcpEcho, at(*port))),
                );
                Ok(specs)
            }
            Role::SiteController => {
                let dhcp_port: u16 = args.parse_or("dhcp-port", 67)?;
                Ok(vec![ListenerSpec::new(ListenerKind::Dhcp, at(dhcp_port))])
            }
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed(AggregateReport),
    Interrupted,
    /// No listener of the role could start.
    StartupFailed,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed(report) if !report.is_clean() => 1,
            Outcome::StartupFailed => 1,
            _ => 0,
        }
    }
}

/// Owns the shared cancellation token and shutdown barrier of one process run.
pub struct Supervisor {
    ctx: HarnessContext,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self {
            ctx: HarnessContext::new(settings),
        }
    }

    pub fn context(&self) -> &HarnessContext {
        &self.ctx
    }

    /// Start every listener of the role. A listener that fails to start does
    /// not stop its siblings.
    pub fn start_role(&self, role: Role, args: &Arguments) -> Result<Vec<ListenerHandle>, ConfigError> {
        let specs = role.listeners(args)?;
        info!(role = role.title(), listeners = specs.len(), "Starting {}", role.title());
        Ok(specs.into_iter().map(|spec| listeners::start(spec, &self.ctx)).collect())
    }

    /// Cancel everything and wait until every tracked task has finished.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        self.ctx.barrier.drain().await;
    }

    /// Run a role until `stop` resolves.
    pub async fn serve_until<F>(&self, role: Role, args: &Arguments, stop: F) -> Result<Outcome, ConfigError>
    where
        F: Future<Output = ()>,
    {
        let mut handles = self.start_role(role, args)?;
        let total = handles.len();
        tokio::pin!(stop);

        // A signal during startup still goes through the drain.
        let startup = async {
            let mut listening = 0;
            for handle in handles.iter_mut() {
                if handle.ready().await.is_some() {
                    listening += 1;
                }
            }
            listening
        };
        let listening = tokio::select! {
            biased;
            _ = &mut stop => {
                info!("Stopping {} during startup", role.title());
                self.shutdown().await;
                return Ok(Outcome::Interrupted);
            }
            n = startup => n,
        };
        if listening == 0 {
            error!("{} could not start any listener", role.title());
            self.shutdown().await;
            return Ok(Outcome::StartupFailed);
        }
        if listening == total {
            info!("{} running with {} listeners", role.title(), listening);
        } else {
            error!("{} running with {} of {} listeners", role.title(), listening, total);
        }

        stop.await;
        info!("Stopping {}", role.title());
        self.shutdown().await;
        Ok(Outcome::Interrupted)
    }

    /// Run a one-shot scenario on the barrier. Ends when it reports completion
    /// or when `stop` resolves first.
    pub async fn check_until<F>(
        &self,
        scenario: Scenario,
        args: &Arguments,
        probes: &ProbeSet,
        stop: F,
    ) -> Result<Outcome, ConfigError>
    where
        F: Future<Output = ()>,
    {
        let steps = scenario.plan(args, probes)?;
        let timeout = self.ctx.settings.probe_timeout;
        let cancel = self.ctx.shutdown.clone();
        let (done_tx, mut done_rx) = mpsc::channel::<AggregateReport>(1);

        self.ctx.barrier.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                report = scenario.execute(&steps, timeout) => {
                    let _ = done_tx.send(report).await;
                }
            }
        });

        let outcome = tokio::select! {
            report = done_rx.recv() => match report {
                Some(report) => Outcome::Completed(report),
                None => Outcome::Interrupted,
            },
            _ = stop => {
                warn!("Interrupted, stopping {}", scenario.title());
                Outcome::Interrupted
            }
        };
        self.shutdown().await;
        Ok(outcome)
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C - {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM - {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt, shutting down gracefully..."),
        _ = terminate => info!("Received terminate, shutting down gracefully..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_role_ports() {
        let args = Arguments::default();
        let specs = Role::GlobalController.listeners(&args).unwrap();
        let ports: Vec<u16> = specs.iter().map(|s| s.addr.port()).collect();
        assert_eq!(ports, vec![80, 443, 9010, 9090, 9091, 53, 9003, 9009, 9011]);
        assert_eq!(specs[2].kind, ListenerKind::WebSocket);
        assert_eq!(specs[5].kind, ListenerKind::UdpEcho);
    }

    #[test]
    fn tunnel_ctrl_may_be_plain_tcp() {
        let args: Arguments = [("tunnel-ctrl", "TCP"), ("listen-ip", "127.0.0.1")].into_iter().collect();
        let specs = Role::GlobalController.listeners(&args).unwrap();
        assert_eq!(specs[2].kind, ListenerKind::TcpEcho);
        assert_eq!(specs[2].addr, "127.0.0.1:9010".parse::<SocketAddr>().unwrap());

        let args: Arguments = [("tunnel-ctrl", "tls")].into_iter().collect();
        let specs = Role::GlobalController.listeners(&args).unwrap();
        assert_eq!(specs[2].kind, ListenerKind::TlsTcpEcho);
    }

    #[test]
    fn bad_role_arguments_are_config_errors() {
        let args: Arguments = [("tunnel-ctrl", "quic")].into_iter().collect();
        assert!(matches!(
            Role::GlobalController.listeners(&args),
            Err(ConfigError::InvalidValue { .. })
        ));
        let args: Arguments = [("listen-ip", "not-an-ip")].into_iter().collect();
        assert!(Role::SiteController.listeners(&args).is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Outcome::Interrupted.exit_code(), 0);
        assert_eq!(Outcome::Completed(AggregateReport::default()).exit_code(), 0);
        assert_eq!(Outcome::StartupFailed.exit_code(), 1);
    }
}
