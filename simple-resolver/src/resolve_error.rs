use std::{error::Error, fmt::Display, io};

use simple_dns::{SimpleDnsError, RCODE};

/// Error types for simple-resolver
///
/// Every resolution produces either a [`HostRecord`](crate::HostRecord) or exactly one of these
#[derive(Debug)]
pub enum ResolveError {
    /// The domain or the server list could not be used, no query was sent
    Config(ConfigError),
    /// The nameserver answered that the name does not exist (NXDOMAIN)
    NotFound,
    /// The name exists, but the answer carried no address for it
    NoData,
    /// No nameserver answered before every attempt timed out
    Timeout,
    /// The query failed for any other reason, the status carries the engine diagnostic
    Transport(QueryStatus),
}

impl ResolveError {
    /// Returns `true` if the resolve error is [`NotFound`].
    ///
    /// [`NotFound`]: ResolveError::NotFound
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` if the resolve error is [`Timeout`].
    ///
    /// [`Timeout`]: ResolveError::Timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if the resolve error is [`Config`].
    ///
    /// [`Config`]: ResolveError::Config
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(..))
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolveError::Config(err) => Some(err),
            ResolveError::Transport(status) => Some(status),
            _ => None,
        }
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Config(err) => write!(f, "Invalid resolver configuration: {}", err),
            ResolveError::NotFound => write!(f, "Domain name not found"),
            ResolveError::NoData => write!(f, "Domain name has no address records"),
            ResolveError::Timeout => write!(f, "No nameserver answered in time"),
            ResolveError::Transport(status) => write!(f, "Query failed: {}", status),
        }
    }
}

impl From<ConfigError> for ResolveError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<QueryStatus> for ResolveError {
    fn from(status: QueryStatus) -> Self {
        match status {
            QueryStatus::NotFound => Self::NotFound,
            QueryStatus::Timeout => Self::Timeout,
            status => Self::Transport(status),
        }
    }
}

/// Problems found in the resolver input before any network activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The domain to resolve is empty
    EmptyDomain,
    /// The domain can't be encoded as a DNS name
    InvalidDomain(String),
    /// No nameserver was provided
    EmptyServerList,
    /// One entry of the server list is not a valid `ip:port`
    InvalidServer(String),
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyDomain => write!(f, "Domain name is empty"),
            ConfigError::InvalidDomain(domain) => {
                write!(f, "Domain name is not valid: {}", domain)
            }
            ConfigError::EmptyServerList => write!(f, "Nameserver list is empty"),
            ConfigError::InvalidServer(entry) => {
                write!(f, "Nameserver entry is not a valid ip:port: {:?}", entry)
            }
        }
    }
}

/// Status codes reported by the query engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// NXDOMAIN
    NotFound,
    /// Every attempt timed out
    Timeout,
    /// The server reported SERVFAIL
    ServerFailure,
    /// The server refused the query
    Refused,
    /// The server doesn't implement this kind of query
    NotImplemented,
    /// The server could not interpret the query
    FormatError,
    /// The response could not be parsed
    BadResponse,
    /// The queried name can't be encoded in a query
    BadName,
    /// The server port is closed
    ConnectionRefused,
    /// A query is already pending on this channel
    Busy,
    /// Any other socket error
    Io(io::ErrorKind),
}

impl QueryStatus {
    pub(crate) fn from_rcode(rcode: RCODE) -> Option<Self> {
        match rcode {
            RCODE::NoError => None,
            RCODE::NameError => Some(Self::NotFound),
            RCODE::ServerFailure => Some(Self::ServerFailure),
            RCODE::Refused => Some(Self::Refused),
            RCODE::NotImplemented => Some(Self::NotImplemented),
            RCODE::FormatError => Some(Self::FormatError),
            _ => Some(Self::BadResponse),
        }
    }
}

impl Error for QueryStatus {}

impl Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStatus::NotFound => write!(f, "domain name not found"),
            QueryStatus::Timeout => write!(f, "timeout"),
            QueryStatus::ServerFailure => write!(f, "server failure"),
            QueryStatus::Refused => write!(f, "query refused"),
            QueryStatus::NotImplemented => write!(f, "query not implemented by server"),
            QueryStatus::FormatError => write!(f, "server could not interpret the query"),
            QueryStatus::BadResponse => write!(f, "malformed response"),
            QueryStatus::BadName => write!(f, "name can't be encoded in a query"),
            QueryStatus::ConnectionRefused => write!(f, "connection refused"),
            QueryStatus::Busy => write!(f, "a query is already pending"),
            QueryStatus::Io(kind) => write!(f, "socket error: {}", kind),
        }
    }
}

impl From<io::Error> for QueryStatus {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            kind => Self::Io(kind),
        }
    }
}

impl From<SimpleDnsError> for QueryStatus {
    fn from(_: SimpleDnsError) -> Self {
        Self::BadResponse
    }
}
