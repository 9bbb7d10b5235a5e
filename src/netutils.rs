use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use crate::error::ProbeError;

/// Format `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolve a host to its first socket address. IP literals skip the resolver.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::Unreachable(format!("cannot resolve {}: {}", host, e)))?;
    addrs
        .next()
        .ok_or_else(|| ProbeError::Unreachable(format!("no addresses for {}", host)))
}

/// Resolve to an IPv4 address; ICMP echo is only sent over IPv4.
pub async fn resolve_v4(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs = lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Unreachable(format!("cannot resolve {}: {}", host, e)))?;
    addrs
        .map(|sa| sa.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| ProbeError::Unreachable(format!("no IPv4 address for {}", host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_ipv6_literals() {
        assert_eq!(join_host_port("10.0.0.1", 22), "10.0.0.1:22");
        assert_eq!(join_host_port("fe80::1", 443), "[fe80::1]:443");
        assert_eq!(join_host_port("example.com", 80), "example.com:80");
    }

    #[tokio::test]
    async fn resolves_ip_literal_without_lookup() {
        let sa = resolve("127.0.0.1", 9091).await.unwrap();
        assert_eq!(sa, "127.0.0.1:9091".parse().unwrap());
    }
}
