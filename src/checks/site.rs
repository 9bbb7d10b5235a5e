use super::Step;
use crate::commands::Arguments;
use crate::error::ConfigError;
use crate::probes::redfish::SERVICE_ROOT;
use crate::probes::vnc::DEFAULT_VNC_PORT;
use crate::probes::websocket::TUNNEL_CTRL_PATH;
use crate::probes::ProbeSet;
use crate::types::{Credentials, Target};

const INSTALL_LINKS: &[&str] = &[
    "https://registry.metalsoft.dev",
    "http://repo.metalsoft.io/",
    "https://repo.metalsoft.io/",
];

pub(super) fn install(probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
    INSTALL_LINKS
        .iter()
        .map(|link| Ok(Step::new(&probes.link, Target::link(link)?)))
        .collect()
}

/// Control-plane surface of the global controller as seen from a site.
pub(super) fn operate(args: &Arguments, probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
    let gc = args.require("global-controller-hostname")?;
    let mut steps = vec![
        Step::new(&probes.http, Target::new(gc, 80)),
        Step::new(&probes.https, Target::new(gc, 443)),
        // tunnel control messages
        Step::new(&probes.websocket, Target::new(gc, 9010).with_resource(TUNNEL_CTRL_PATH)),
        // tunnel HTTP proxy
        Step::new(&probes.http, Target::new(gc, 9090)),
        // tunnel TCP proxy
        Step::new(&probes.tcp, Target::new(gc, 9091)),
        Step::new(&probes.udp, Target::new(gc, 53)),
    ];

    if let Some(nfs) = args.get("nfs-server").filter(|s| !s.is_empty()) {
        // portmapper and nfsd, both transports
        for port in [111, 2049] {
            steps.push(Step::new(&probes.tcp, Target::new(nfs, port)));
            steps.push(Step::new(&probes.udp, Target::new(nfs, port)));
        }
    }
    Ok(steps)
}

pub(super) fn manage_switch(args: &Arguments, probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
    let nos = args.require("nos")?.to_lowercase();
    let switch_ip = args.require("management-ip")?;
    let credentials = credentials(args)?;

    let mut steps = vec![
        Step::new(&probes.http, Target::new(switch_ip, 80)),
        Step::new(&probes.https, Target::new(switch_ip, 443)),
        Step::new(&probes.ssh, Target::new(switch_ip, 22).with_credentials(credentials.clone())),
    ];
    if nos == "junos" {
        // NETCONF over SSH
        steps.push(Step::new(&probes.ssh, Target::new(switch_ip, 830).with_credentials(credentials)));
    }
    Ok(steps)
}

pub(super) fn manage_server(args: &Arguments, probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
    let vendor = args.require("vendor")?.to_lowercase();
    let bmc_ip = args.require("bmc-ip")?;
    let credentials = credentials(args)?;
    let vnc_port = args.parse_or("vnc-port", DEFAULT_VNC_PORT)?;

    let mut steps = vec![
        Step::new(&probes.https, Target::new(bmc_ip, 443)),
        Step::new(
            &probes.redfish,
            Target::new(bmc_ip, 443)
                .with_credentials(credentials.clone())
                .with_resource(SERVICE_ROOT),
        ),
        Step::new(&probes.ssh, Target::new(bmc_ip, 22).with_credentials(credentials.clone())),
        Step::new(&probes.ipmi, Target::new(bmc_ip, 623).with_credentials(credentials.clone())),
    ];
    if vendor == "dell" {
        // iDRAC virtual console
        steps.push(Step::new(&probes.vnc, Target::new(bmc_ip, vnc_port).with_credentials(credentials)));
    }
    if let Some(iso) = args.get("iso-link").filter(|s| !s.is_empty()) {
        // the virtual media source has to be reachable from the site
        steps.push(Step::new(&probes.link, Target::link(iso)?));
    }
    Ok(steps)
}

fn credentials(args: &Arguments) -> Result<Credentials, ConfigError> {
    Ok(Credentials::new(args.require("username")?, args.require("password")?))
}
