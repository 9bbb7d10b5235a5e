use std::env;
use std::time::Duration;

use netprecheck::probes::{IcmpProbe, LinkProbe, Probe};
use netprecheck::types::Target;

fn enabled(name: &str) -> bool {
    if env::var("REAL_NET_TEST").is_err() {
        eprintln!("Skipping {}. Set REAL_NET_TEST=1 to enable.", name);
        return false;
    }
    true
}

#[tokio::test]
async fn real_icmp_echo_opt_in() {
    // needs CAP_NET_RAW as well as network access
    if !enabled("real ICMP echo test") {
        return;
    }
    let res = IcmpProbe.probe(&Target::new("1.1.1.1", 0), Duration::from_secs(3)).await;
    eprintln!("icmp result: {:?}", res);
    assert!(res.is_ok());
}

#[tokio::test]
async fn real_link_opt_in() {
    if !enabled("real link test") {
        return;
    }
    let target = Target::link("https://repo.metalsoft.io/").unwrap();
    let evidence = LinkProbe.probe(&target, Duration::from_secs(10)).await.unwrap();
    eprintln!("link evidence: {}", evidence.detail);
    assert!(evidence.detail.contains("status"));
}
