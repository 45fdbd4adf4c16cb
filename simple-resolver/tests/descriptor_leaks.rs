#![cfg(target_os = "linux")]

use std::{net::Ipv4Addr, time::Duration};

use simple_resolver::{resolve_via_servers, Resolver, ResolverOptions, SimpleNameserver};

fn open_descriptors() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("Failed to list descriptors")
        .count()
}

// Single test in this binary, so no other test opens descriptors while counting
#[test]
fn repeated_resolution_releases_every_descriptor() {
    let mut nameserver = SimpleNameserver::start("127.0.0.1:0".parse().unwrap())
        .expect("Failed to start nameserver");
    nameserver
        .add_address("azk.dev.azk.io", Ipv4Addr::new(172, 17, 0, 1).into())
        .unwrap();
    let servers = nameserver.local_addr().to_string();

    let mut silent = SimpleNameserver::start("127.0.0.1:0".parse().unwrap())
        .expect("Failed to start nameserver");
    silent.set_silent(true);
    let timeout_resolver = Resolver::with_options(
        silent.local_addr().to_string().parse().unwrap(),
        ResolverOptions::default()
            .with_query_timeout(Duration::from_millis(10))
            .with_tries(1),
    );

    let mut tcp_resolver = Resolver::new(servers.parse().unwrap());
    tcp_resolver.set_use_tcp(true);

    // warm up, so lazily opened descriptors don't count as leaks
    resolve_via_servers("azk.dev.azk.io", &servers).unwrap();
    let before = open_descriptors();

    for _ in 0..20 {
        resolve_via_servers("azk.dev.azk.io", &servers).unwrap();
        assert!(resolve_via_servers("missing.azk.io", &servers)
            .unwrap_err()
            .is_not_found());
        assert!(resolve_via_servers("azk.dev.azk.io", "127.0.0.1")
            .unwrap_err()
            .is_config());
        assert!(timeout_resolver
            .resolve("azk.dev.azk.io")
            .unwrap_err()
            .is_timeout());
        tcp_resolver.resolve("azk.dev.azk.io").unwrap();
    }

    // nameserver side of the last tcp connection closes on its own thread
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(before, open_descriptors());
}
