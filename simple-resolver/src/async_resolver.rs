//! Async (tokio) entry points.
//!
//! Resolution still runs the blocking engine, on tokio's blocking thread pool, so awaiting a
//! query never stalls the runtime workers.

use crate::{HostRecord, ResolveError, Resolver, ServerSpec};

impl Resolver {
    /// Async version of [`resolve`](Self::resolve)
    ///
    /// Must be called from within a tokio runtime
    pub async fn resolve_async(&self, domain: &str) -> Result<HostRecord, ResolveError> {
        let resolver = self.clone();
        let domain = domain.to_string();

        let handle = tokio::task::spawn_blocking(move || resolver.resolve(&domain));
        match handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                log::warn!("resolution task did not complete: {}", err);
                Err(ResolveError::Timeout)
            }
        }
    }
}

/// Async version of [`resolve_via_servers`](crate::resolve_via_servers)
///
/// The server list is validated before anything is scheduled on the runtime
pub async fn resolve_via_servers_async(
    domain: &str,
    servers: &str,
) -> Result<HostRecord, ResolveError> {
    let servers: ServerSpec = servers.parse()?;
    Resolver::new(servers).resolve_async(domain).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;

    #[tokio::test]
    async fn config_errors_fail_before_spawning() {
        let err = resolve_via_servers_async("azk.dev.azk.io", "localhost:53")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Config(ConfigError::InvalidServer(_))
        ));

        let err = resolve_via_servers_async("", "127.0.0.1:53")
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
