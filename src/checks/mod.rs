//! Check scenarios: fixed batteries of probes run once, in order.
//!
//! A scenario is planned into an ordered list of [`Step`]s from its command
//! arguments, then [`run_steps`] executes every step regardless of earlier
//! failures and folds the outcomes into an [`AggregateReport`].

mod global;
mod site;

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::commands::Arguments;
use crate::error::{ConfigError, ProbeError};
use crate::probes::{ProbeHandle, ProbeSet};
use crate::types::Target;

/// Slack on top of a probe's own deadline before the runner gives up on it.
const PROBE_GRACE: Duration = Duration::from_secs(1);

pub struct Step {
    pub probe: ProbeHandle,
    pub target: Target,
}

impl Step {
    pub fn new(probe: &ProbeHandle, target: Target) -> Self {
        Self {
            probe: probe.clone(),
            target,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.probe.name(), self.target)
    }
}

/// Failure count of one scenario run. Only ever grows, by at most one per probe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateReport {
    failures: usize,
    invoked: usize,
}

impl AggregateReport {
    fn record(&mut self, ok: bool) {
        self.invoked += 1;
        if !ok {
            self.failures += 1;
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn invoked(&self) -> usize {
        self.invoked
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Run every step in declared order. Each step's sockets are closed before the
/// next one starts; a failing step never stops the ones after it.
pub async fn run_steps(steps: &[Step], timeout: Duration) -> AggregateReport {
    let mut report = AggregateReport::default();
    for step in steps {
        let protocol = step.probe.name();
        let target = &step.target;
        debug!(protocol, target = %target, "Testing {} connection to {}", protocol, target);

        let outcome = match tokio::time::timeout(timeout + PROBE_GRACE, step.probe.probe(target, timeout)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::timeout("probe", timeout)),
        };
        match outcome {
            Ok(evidence) => {
                debug!(
                    protocol,
                    target = %target,
                    detail = %evidence.detail,
                    at = %evidence.observed_at.to_rfc3339(),
                    "Passed {} check for {}",
                    protocol,
                    target
                );
                report.record(true);
            }
            Err(err) => {
                error!(protocol, target = %target, kind = err.kind(), "Failed test for {} connection to {} - {}", protocol, target, err);
                report.record(false);
            }
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    GlobalInstall,
    GlobalOperate,
    SiteInstall,
    SiteOperate,
    SiteManageSwitch,
    SiteManageServer,
}

impl Scenario {
    pub fn title(&self) -> &'static str {
        match self {
            Scenario::GlobalInstall => "Global Controller installation check",
            Scenario::GlobalOperate => "Global Controller operation check",
            Scenario::SiteInstall => "Site Controller installation check",
            Scenario::SiteOperate => "Site Controller operation check",
            Scenario::SiteManageSwitch => "Site Controller switch management check",
            Scenario::SiteManageServer => "Site Controller server management check",
        }
    }

    /// Build the step list. Argument problems surface here, before any probe runs.
    pub fn plan(&self, args: &Arguments, probes: &ProbeSet) -> Result<Vec<Step>, ConfigError> {
        match self {
            Scenario::GlobalInstall => global::install(args, probes),
            Scenario::GlobalOperate => Ok(global::operate(probes)),
            Scenario::SiteInstall => site::install(probes),
            Scenario::SiteOperate => site::operate(args, probes),
            Scenario::SiteManageSwitch => site::manage_switch(args, probes),
            Scenario::SiteManageServer => site::manage_server(args, probes),
        }
    }

    /// Run planned steps, logging the summary line the way operators expect it.
    pub async fn execute(&self, steps: &[Step], timeout: Duration) -> AggregateReport {
        info!(scenario = self.title(), steps = steps.len(), "Starting {}", self.title());
        let report = run_steps(steps, timeout).await;
        if report.is_clean() {
            info!("{} detected no problems", self.title());
        } else {
            error!("{} detected {} problems", self.title(), report.failures());
        }
        report
    }
}
