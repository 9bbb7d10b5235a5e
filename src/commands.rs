//! Declarative command table and `key=value` argument resolution.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::checks::Scenario;
use crate::error::ConfigError;
use crate::orchestrator::Role;

#[derive(Debug)]
pub struct ArgSpec {
    pub key: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
}

const fn required(key: &'static str, description: &'static str) -> ArgSpec {
    ArgSpec { key, description, required: true, default: None }
}

const fn optional(key: &'static str, description: &'static str, default: Option<&'static str>) -> ArgSpec {
    ArgSpec { key, description, required: false, default }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Check(Scenario),
    Serve(Role),
}

#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [ArgSpec],
    pub handler: Handler,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "global-install",
        description: "Checks prerequisites for installing global controller.",
        arguments: &[
            optional("ms-repo", "URL of the repository with MetalSoft packages.", Some("http://repo.metalsoft.io")),
            optional("ms-repo-secure", "Secure URL of the repository with MetalSoft packages.", Some("https://repo.metalsoft.io")),
            optional("ms-registry", "URL of the MetalSoft registry.", Some("https://registry.metalsoft.dev")),
        ],
        handler: Handler::Check(Scenario::GlobalInstall),
    },
    CommandSpec {
        name: "global-operate",
        description: "Checks prerequisites for operating global controller.",
        arguments: &[],
        handler: Handler::Check(Scenario::GlobalOperate),
    },
    CommandSpec {
        name: "global-service",
        description: "Runs global controller service.",
        arguments: &[
            optional("listen-ip", "IP address to listen on.", Some("0.0.0.0")),
            optional("tunnel-ctrl", "Tunnel control listener on 9010 - one of (websocket, tcp, tls).", Some("websocket")),
        ],
        handler: Handler::Serve(Role::GlobalController),
    },
    CommandSpec {
        name: "site-install",
        description: "Checks prerequisites for installing site controller.",
        arguments: &[],
        handler: Handler::Check(Scenario::SiteInstall),
    },
    CommandSpec {
        name: "site-operate",
        description: "Checks prerequisites for operating site controller.",
        arguments: &[
            required("global-controller-hostname", "IP address or hostname of the global controller."),
            optional("nfs-server", "NFS server for use by the site controller.", None),
        ],
        handler: Handler::Check(Scenario::SiteOperate),
    },
    CommandSpec {
        name: "site-service",
        description: "Runs site controller service.",
        arguments: &[
            optional("listen-ip", "IP address to listen on.", Some("0.0.0.0")),
            optional("dhcp-port", "UDP port of the DHCP listener.", Some("67")),
        ],
        handler: Handler::Serve(Role::SiteController),
    },
    CommandSpec {
        name: "site-manage-switch",
        description: "Checks site controller access to manage switch.",
        arguments: &[
            required("nos", "The switch NOS - one of (OS10, SONiC, JunOS, Cisco)."),
            required("management-ip", "IP address of the switch management port."),
            required("username", "Username of the switch management admin user."),
            required("password", "Password of the switch management admin user."),
        ],
        handler: Handler::Check(Scenario::SiteManageSwitch),
    },
    CommandSpec {
        name: "site-manage-server",
        description: "Checks site controller access to manage server.",
        arguments: &[
            required("vendor", "The server vendor - one of (Dell, HP, Lenovo)."),
            required("bmc-ip", "IP address of the server BMC interface."),
            required("username", "Username of the server BMC admin user."),
            required("password", "Password of the server BMC admin user."),
            optional("vnc-port", "TCP port of the BMC virtual console (Dell only).", Some("5901")),
            optional("iso-link", "Link to an ISO to test mounting virtual media.", None),
        ],
        handler: Handler::Check(Scenario::SiteManageServer),
    },
];

/// Resolved `key=value` arguments of one command, defaults applied.
#[derive(Debug, Default, Clone)]
pub struct Arguments {
    values: BTreeMap<String, String>,
}

impl Arguments {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingArgument(key))
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Arguments safe to log: secrets masked.
    pub fn redacted(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if k.contains("password") || k.contains("secret") { "***" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Arguments::default();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

#[derive(Debug)]
pub struct Invocation {
    pub command: &'static CommandSpec,
    pub args: Arguments,
}

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    let name = name.to_lowercase();
    COMMANDS.iter().find(|c| c.name == name)
}

/// Validate raw `key=value` words against the command's declared arguments.
pub fn resolve(name: &str, raw: &[String]) -> Result<Invocation, ConfigError> {
    let command = find(name).ok_or_else(|| ConfigError::UnknownCommand(name.to_string()))?;

    let mut args = Arguments::default();
    for word in raw {
        let (key, value) = word
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedArgument(word.clone()))?;
        let key = key.to_lowercase();
        if !command.arguments.iter().any(|a| a.key == key) {
            return Err(ConfigError::UnknownArgument(key));
        }
        args.insert(key, value);
    }

    for spec in command.arguments {
        if args.get(spec.key).is_some() {
            continue;
        }
        if spec.required {
            return Err(ConfigError::MissingArgument(spec.key));
        }
        if let Some(default) = spec.default {
            args.insert(spec.key, default);
        }
    }

    Ok(Invocation { command, args })
}

/// Command listing appended to the CLI help.
pub fn usage() -> String {
    let mut out = String::from("Commands:");
    for cmd in COMMANDS {
        let mut synopsis = String::new();
        let mut help = String::new();
        for arg in cmd.arguments {
            let _ = write!(synopsis, " {}=<{}>", arg.key, arg.key);
            let _ = write!(help, "        {}: ", arg.key);
            if arg.required {
                help.push_str("(required) ");
            }
            help.push_str(arg.description);
            if let Some(default) = arg.default {
                let _ = write!(help, " [default: {}]", default);
            }
            help.push('\n');
        }
        let _ = write!(out, "\n  {}{}\n      {}\n{}", cmd.name, synopsis, cmd.description, help);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn applies_defaults_and_lowercases_keys() {
        let inv = resolve("GLOBAL-INSTALL", &words(&["MS-REPO=http://mirror.local"])).unwrap();
        assert_eq!(inv.command.name, "global-install");
        assert_eq!(inv.args.get("ms-repo"), Some("http://mirror.local"));
        assert_eq!(inv.args.get("ms-registry"), Some("https://registry.metalsoft.dev"));
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let inv = resolve(
            "site-manage-switch",
            &words(&["nos=junos", "management-ip=10.0.0.2", "username=admin", "password=a=b"]),
        )
        .unwrap();
        assert_eq!(inv.args.get("password"), Some("a=b"));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(resolve("nope", &[]).unwrap_err(), ConfigError::UnknownCommand("nope".into()));
        assert_eq!(
            resolve("global-operate", &words(&["x=1"])).unwrap_err(),
            ConfigError::UnknownArgument("x".into())
        );
        assert_eq!(
            resolve("site-operate", &words(&["nfs-server"])).unwrap_err(),
            ConfigError::MalformedArgument("nfs-server".into())
        );
        assert_eq!(
            resolve("site-operate", &[]).unwrap_err(),
            ConfigError::MissingArgument("global-controller-hostname")
        );
    }

    #[test]
    fn optional_without_default_stays_absent() {
        let inv = resolve("site-operate", &words(&["global-controller-hostname=gc.local"])).unwrap();
        assert_eq!(inv.args.get("nfs-server"), None);
    }

    #[test]
    fn redacts_passwords() {
        let args: Arguments = [("username", "root"), ("password", "calvin")].into_iter().collect();
        let shown = args.redacted();
        assert_eq!(shown["password"], "***");
        assert_eq!(shown["username"], "root");
    }
}
