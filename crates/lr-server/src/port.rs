//! Port allocation.
//!
//! Finds the first free TCP port at or above a preferred one by binding and
//! immediately releasing probe listeners. The answer is best-effort: another
//! process may take the port between the probe and the real bind, which is
//! why [`bind_available`] retries the whole sequence a few times.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;

use crate::error::ServerError;

/// Real-bind attempts after losing the race against another process.
const MAX_BIND_ATTEMPTS: u32 = 3;

/// Probes used to confirm a port was released after shutdown.
const RELEASE_PROBES: u32 = 40;

/// Pause between release probes.
const RELEASE_PROBE_INTERVAL: Duration = Duration::from_millis(25);

/// Resolve `hostname` to the address the server binds to.
///
/// IPv4 results are preferred so that `localhost` binds `127.0.0.1` on hosts
/// where it also resolves to `::1`.
pub(crate) async fn resolve_host(hostname: &str) -> Result<IpAddr, ServerError> {
    let resolve_error = |source| ServerError::Resolve {
        hostname: hostname.to_owned(),
        source,
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname, 0))
        .await
        .map_err(resolve_error)?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(SocketAddr::ip)
        .ok_or_else(|| {
            resolve_error(std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                "hostname resolved to no addresses",
            ))
        })
}

/// Find the first port at or above `preferred` that can be bound on `ip`.
///
/// Only "address in use" moves on to the next port. Any other bind error is
/// returned as [`ServerError::Bind`]. Port `0` asks the OS for an ephemeral
/// port and returns the one it picked.
pub async fn allocate_port(ip: IpAddr, preferred: u16) -> Result<u16, ServerError> {
    let mut port = preferred;
    loop {
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr).await {
            Ok(probe) => {
                let bound = probe
                    .local_addr()
                    .map_err(|source| ServerError::Bind { addr, source })?;
                drop(probe);
                if bound.port() != preferred {
                    tracing::debug!(preferred, port = bound.port(), "Preferred port taken");
                }
                return Ok(bound.port());
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::trace!(port, "Port in use");
                port = port
                    .checked_add(1)
                    .ok_or(ServerError::PortsExhausted { preferred })?;
            }
            Err(source) => return Err(ServerError::Bind { addr, source }),
        }
    }
}

/// Allocate a port and bind the real listener on it.
///
/// If the allocated port is taken before the real bind, allocation restarts
/// from the next port, up to [`MAX_BIND_ATTEMPTS`] times.
pub(crate) async fn bind_available(ip: IpAddr, preferred: u16) -> Result<TcpListener, ServerError> {
    let mut from = preferred;
    let mut attempt = 1;
    loop {
        let port = allocate_port(ip, from).await?;
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < MAX_BIND_ATTEMPTS => {
                tracing::warn!(port, attempt, "Allocated port was taken before bind, retrying");
                attempt += 1;
                if preferred != 0 {
                    from = port
                        .checked_add(1)
                        .ok_or(ServerError::PortsExhausted { preferred })?;
                }
            }
            Err(source) => return Err(ServerError::Bind { addr, source }),
        }
    }
}

/// Wait until `addr` can be bound again.
///
/// Returns `false` if the port is still held after all probes.
pub(crate) async fn wait_released(addr: SocketAddr) -> bool {
    for _ in 0..RELEASE_PROBES {
        if TcpListener::bind(addr).await.is_ok() {
            return true;
        }
        tokio::time::sleep(RELEASE_PROBE_INTERVAL).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_port_zero_returns_ephemeral_port() {
        let port = allocate_port(LOCALHOST, 0).await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_free_preferred_port_is_returned() {
        let port = allocate_port(LOCALHOST, 0).await.unwrap();
        assert_eq!(allocate_port(LOCALHOST, port).await.unwrap(), port);
    }

    #[tokio::test]
    async fn test_occupied_port_is_skipped() {
        let occupied = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let allocated = allocate_port(LOCALHOST, port).await.unwrap();
        assert!(allocated > port);
    }

    #[tokio::test]
    async fn test_probe_listener_is_released() {
        let port = allocate_port(LOCALHOST, 0).await.unwrap();
        assert!(TcpListener::bind((LOCALHOST, port)).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_available_returns_listener() {
        let listener = bind_available(LOCALHOST, 0).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().ip(), LOCALHOST);
    }

    #[tokio::test]
    async fn test_wait_released_after_drop() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(wait_released(addr).await);
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let ip = resolve_host("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        assert_eq!(resolve_host("127.0.0.1").await.unwrap(), LOCALHOST);
    }

    #[tokio::test]
    async fn test_unresolvable_hostname_fails() {
        let err = resolve_host("no-such-host.invalid").await.unwrap_err();
        assert!(matches!(err, ServerError::Resolve { .. }));
    }

    #[tokio::test]
    async fn test_unassigned_address_is_fatal() {
        // TEST-NET-1 is never assigned to a local interface
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let err = allocate_port(ip, 0).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
