/*!
Blocking DNS address resolution against an explicit list of nameservers

The system resolver configuration (`/etc/resolv.conf`, `/etc/hosts`) is never consulted, every
query goes only to the nameservers given by the caller. This is useful for development domains
served by a local nameserver that the rest of the system doesn't know about.

For a single lookup, see [`resolve_via_servers`]
For repeated lookups with custom timeouts or retries, see [`Resolver`]
For a small nameserver to resolve against in tests, see [`SimpleNameserver`]

Each resolution builds its own query engine and sockets, and releases them before returning,
whatever the outcome.

```no_run
    match simple_resolver::resolve_via_servers("azk.dev.azk.io", "172.17.0.1:53") {
        Ok(host) => println!("{} -> {:?}", host.name(), host.addresses()),
        Err(err) if err.is_not_found() => println!("no such domain"),
        Err(err) => println!("failed to resolve: {}", err),
    }
```

# Features

* `async-tokio`: adds `Resolver::resolve_async` and `resolve_via_servers_async`, which run the
  blocking resolution on tokio's blocking thread pool
*/
#![warn(missing_docs)]

#[cfg(feature = "async-tokio")]
mod async_resolver;
mod channel;
mod completion;
mod host_record;
mod resolve_error;
mod resolver;
mod server_spec;
mod simple_nameserver;
mod socket_helper;
mod zone;

#[cfg(feature = "async-tokio")]
pub use async_resolver::resolve_via_servers_async;
pub use host_record::{AddressFamily, HostRecord};
pub use resolve_error::{ConfigError, QueryStatus, ResolveError};
pub use resolver::{resolve_via_servers, Resolver, ResolverOptions};
pub use server_spec::ServerSpec;
pub use simple_nameserver::{NameserverError, SimpleNameserver};
pub use zone::{Lookup, Zone};
