use std::{fmt::Display, net::SocketAddr, str::FromStr};

use crate::ConfigError;

/// Ordered list of nameservers a resolution is sent to
///
/// Parsed from comma separated `ip:port` entries, IPv6 addresses must be enclosed in brackets
/// ```
///     use simple_resolver::ServerSpec;
///
///     let servers: ServerSpec = "10.0.0.1:53,[::1]:5353".parse().expect("Invalid server list");
///     assert_eq!(2, servers.len());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    servers: Vec<SocketAddr>,
}

impl ServerSpec {
    /// Creates a server list from the given addresses, at least one address is required
    pub fn new<I: IntoIterator<Item = SocketAddr>>(servers: I) -> Result<Self, ConfigError> {
        let servers: Vec<SocketAddr> = servers.into_iter().collect();
        if servers.is_empty() {
            return Err(ConfigError::EmptyServerList);
        }

        if let Some(server) = servers.iter().find(|server| server.port() == 0) {
            return Err(ConfigError::InvalidServer(server.to_string()));
        }

        Ok(Self { servers })
    }

    /// Nameservers in query order
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Number of nameservers, never zero
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Always `false`, present for symmetry with [`len`](Self::len)
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl FromStr for ServerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConfigError::EmptyServerList);
        }

        let servers = s
            .split(',')
            .map(parse_server)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(servers)
    }
}

impl TryFrom<&str> for ServerSpec {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for ServerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, server) in self.servers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", server)?;
        }

        Ok(())
    }
}

fn parse_server(entry: &str) -> Result<SocketAddr, ConfigError> {
    let trimmed = entry.trim();
    match trimmed.parse::<SocketAddr>() {
        Ok(server) if server.port() != 0 => Ok(server),
        _ => Err(ConfigError::InvalidServer(trimmed.to_string())),
    }
}
