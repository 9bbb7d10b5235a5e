use super::Step;
use crate::commands::Arguments;
use crate::error::ConfigError;
use crate::probes::ProbeSet;
use crate::types::Target;

const REGISTRY_HOST: &str = "registry.metalsoft.dev";
const REPO_HOST: &str = "repo.metalsoft.io";

/// Outbound egress a global controller install pulls packages and images through.
const INSTALL_LINKS: &[&str] = &[
    "http://1.1.1.1/",
    "https://1.1.1.1/",
    "https://downloads.dell.com/",
    "http://downloads.linux.hpe.com/",
    "https://quay.io/",
    "https://gcr.io/",
    "https://cloud.google.com/",
    "https://helm.traefik.io/",
    "https://k8s.io/",
];

pub(super) fn install(args: &Arguments, probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
    let mut steps = Vec::new();
    for key in ["ms-repo", "ms-repo-secure", "ms-registry"] {
        steps.push(Step::new(&probes.link, Target::link(args.require(key)?)?));
    }
    steps.push(Step::new(&probes.icmp, Target::new("1.1.1.1", 0)));
    for link in INSTALL_LINKS {
        steps.push(Step::new(&probes.link, Target::link(link)?));
    }
    // SMTP relay for notifications
    steps.push(Step::new(&probes.tcp, Target::new("smtp.office365.com", 587)));
    Ok(steps)
}

pub(super) fn operate(probes: &ProbeSet) -> Vec<Step> {
    vec![
        Step::new(&probes.https, Target::new(REGISTRY_HOST, 443)),
        Step::new(&probes.http, Target::new(REPO_HOST, 80)),
        Step::new(&probes.https, Target::new(REPO_HOST, 443)),
    ]
}
