use std::time::Duration;

use simple_dns::{Name, Packet};

use crate::{
    channel::Channel, completion::completion, ConfigError, HostRecord, QueryStatus,
    ResolveError, ServerSpec,
};

/// Retry and transport settings applied to every resolution of a [`Resolver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Timeout of the first round of attempts, doubled on every following round (defaults to 2 seconds)
    pub query_timeout: Duration,
    /// How many times each server is tried (defaults to 3)
    pub tries: usize,
    /// Query over TCP from the first attempt (defaults to `false`)
    pub use_tcp: bool,
    /// Ask the nameserver to recurse (defaults to `true`)
    pub recursion_desired: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(2),
            tries: 3,
            use_tcp: false,
            recursion_desired: true,
        }
    }
}

impl ResolverOptions {
    /// Set the per attempt timeout
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Set how many times each server is tried
    pub fn with_tries(mut self, tries: usize) -> Self {
        self.tries = tries;
        self
    }

    /// Set whether queries go over TCP from the start
    pub fn with_use_tcp(mut self, use_tcp: bool) -> Self {
        self.use_tcp = use_tcp;
        self
    }

    /// Set the recursion desired flag of outgoing queries
    pub fn with_recursion_desired(mut self, recursion_desired: bool) -> Self {
        self.recursion_desired = recursion_desired;
        self
    }
}

/// Blocking resolver for address (A) records against an explicit list of nameservers
///
/// Every call to [`resolve`](Self::resolve) builds its own query engine and sockets, nothing is
/// shared between calls, nor with the system resolver
/// ```no_run
///     use simple_resolver::{Resolver, ServerSpec};
///     use std::time::Duration;
///
///     let servers: ServerSpec = "10.0.0.1:53".parse().expect("Invalid server list");
///     let mut resolver = Resolver::new(servers);
///     resolver.set_query_timeout(Duration::from_secs(1));
///
///     match resolver.resolve("azk.dev.azk.io") {
///         Ok(host) => println!("{} -> {:?}", host.name(), host.addresses()),
///         Err(err) => println!("failed to resolve: {}", err),
///     }
/// ```
#[derive(Debug, Clone)]
pub struct Resolver {
    servers: ServerSpec,
    options: ResolverOptions,
}

impl Resolver {
    /// Creates a resolver for the given nameservers with default options
    pub fn new(servers: ServerSpec) -> Self {
        Self::with_options(servers, ResolverOptions::default())
    }

    /// Creates a resolver for the given nameservers and options
    pub fn with_options(servers: ServerSpec, options: ResolverOptions) -> Self {
        Self { servers, options }
    }

    /// Nameservers queried by this resolver
    pub fn servers(&self) -> &ServerSpec {
        &self.servers
    }

    /// Options applied to every resolution
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Set the resolver's per attempt timeout.
    pub fn set_query_timeout(&mut self, query_timeout: Duration) {
        self.options.query_timeout = query_timeout;
    }

    /// Set how many times each server is tried.
    pub fn set_tries(&mut self, tries: usize) {
        self.options.tries = tries;
    }

    /// Set whether queries go over TCP from the start.
    pub fn set_use_tcp(&mut self, use_tcp: bool) {
        self.options.use_tcp = use_tcp;
    }

    /// Set the recursion desired flag of outgoing queries.
    pub fn set_recursion_desired(&mut self, recursion_desired: bool) {
        self.options.recursion_desired = recursion_desired;
    }

    /// Resolves the address records of `domain`, blocking until a nameserver answers or every
    /// attempt fails
    pub fn resolve(&self, domain: &str) -> Result<HostRecord, ResolveError> {
        let domain = validate_domain(domain)?;

        let (signal, completion) = completion();
        let mut channel = Channel::new(&self.servers, self.options.clone());

        let query_name = domain.to_string();
        channel.query_a(domain, move |result| {
            signal.signal(host_record_outcome(&query_name, result))
        });

        while !completion.is_signalled() {
            let Some(readiness) = channel.readiness() else {
                break;
            };

            let readable = readiness.transport.wait_readable(readiness.timeout);
            channel.process(readable);
        }
        drop(channel);

        let outcome = completion.into_outcome().unwrap_or_else(|| {
            log::warn!("query for {} finished without an outcome", domain);
            Err(ResolveError::Timeout)
        });

        match &outcome {
            Ok(host) => log::debug!("{} resolved to {:?}", domain, host.addresses()),
            Err(err) => log::debug!("{} failed to resolve: {}", domain, err),
        }

        outcome
    }
}

/// Resolves the address records of `domain` using only the nameservers in `servers`
///
/// `servers` is a comma separated list of `ip:port` entries, see [`ServerSpec`].
/// A malformed list or domain fails before any socket is created
/// ```no_run
///     let host = simple_resolver::resolve_via_servers("azk.dev.azk.io", "172.17.0.1:53")
///         .expect("Failed to resolve");
///
///     assert_eq!("azk.dev.azk.io", host.name());
/// ```
pub fn resolve_via_servers(domain: &str, servers: &str) -> Result<HostRecord, ResolveError> {
    let servers: ServerSpec = servers.parse()?;
    Resolver::new(servers).resolve(domain)
}

fn validate_domain(domain: &str) -> Result<&str, ConfigError> {
    let trimmed = domain.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyDomain);
    }

    // simple-dns skips empty labels, the encoded name must be the one asked for
    match Name::new(trimmed) {
        Ok(name) if name.to_string().eq_ignore_ascii_case(trimmed) => Ok(trimmed),
        _ => Err(ConfigError::InvalidDomain(domain.to_string())),
    }
}

fn host_record_outcome(
    query_name: &str,
    result: Result<&Packet<'_>, QueryStatus>,
) -> Result<HostRecord, ResolveError> {
    let packet = result?;
    HostRecord::from_answer(query_name, packet).ok_or(ResolveError::NoData)
}
