//! Outbound HTTP with SSRF protection.
//!
//! All outgoing requests (challenge verification, object-store traffic)
//! go through a client whose DNS resolution rejects private, loopback,
//! link-local, multicast, CGNAT, documentation, and metadata address
//! ranges. The filter runs on the resolved addresses the connector will
//! actually dial, which defeats DNS rebinding: the address checked is
//! the address connected to.
//!
//! IP-literal hosts never hit the resolver, so callers pass the target
//! URL through [`ensure_public_host`] before sending.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Maximum redirect hops before the client aborts.
const MAX_REDIRECTS: usize = 10;

/// Connect-phase timeout for outbound requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection lifetime in the pool.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors from the safe outbound path.
#[derive(Debug, Error)]
pub enum NetError {
    /// The target resolved only to forbidden addresses.
    #[error("connection to private/internal IP address {ip} is forbidden")]
    ForbiddenIp {
        /// The rejected address.
        ip: IpAddr,
    },

    /// Host resolution failed.
    #[error("failed to resolve host {host}: {source}")]
    Resolution {
        /// The host that failed to resolve.
        host: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Returns true when `ip` falls in a range outbound connections must
/// never reach.
///
/// Covers RFC 1918, loopback, link-local (including the cloud metadata
/// host), multicast, broadcast, carrier-grade NAT, the zero network,
/// documentation ranges, unique-local and site-local IPv6, and the
/// unspecified addresses. IPv4-mapped IPv6 addresses are unwrapped and
/// tested as IPv4.
#[must_use]
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_forbidden_v4(mapped);
            }
            is_forbidden_v6(v6)
        }
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();

    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        || octets[0] == 0
        // Carrier-grade NAT, 100.64.0.0/10 (RFC 6598).
        || (octets[0] == 100 && (64..128).contains(&octets[1]))
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();

    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // Unique local, fc00::/7 (RFC 4193).
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local, fe80::/10.
        || (segments[0] & 0xffc0) == 0xfe80
        // Site-local, fec0::/10 (deprecated, still blocked).
        || (segments[0] & 0xffc0) == 0xfec0
        // Documentation, 2001:db8::/32 (RFC 3849).
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
}

/// Rejects URLs whose host is a forbidden IP literal.
///
/// Literal hosts bypass DNS resolution entirely, so the resolver-level
/// filter never sees them; this is the complementary check callers run
/// before issuing a request.
///
/// # Errors
///
/// Returns [`NetError::ForbiddenIp`] for a forbidden literal host.
pub fn ensure_public_host(url: &Url) -> Result<(), NetError> {
    let ip = match url.host() {
        Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
        Some(Host::Ipv6(v6)) => IpAddr::V6(v6),
        _ => return Ok(()),
    };

    if is_forbidden_ip(ip) {
        return Err(NetError::ForbiddenIp { ip });
    }
    Ok(())
}

/// DNS resolver that filters forbidden addresses out of every lookup.
///
/// Resolution that yields only forbidden addresses fails with
/// [`NetError::ForbiddenIp`]; mixed results are narrowed to the public
/// subset so the connector can never dial an internal address.
#[derive(Debug, Default)]
pub struct SafeResolver;

impl Resolve for SafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|source| NetError::Resolution {
                    host: host.clone(),
                    source,
                })?
                .collect();

            match filter_public(resolved) {
                Ok(allowed) => Ok(Box::new(allowed.into_iter()) as Addrs),
                Err(err) => {
                    if let NetError::ForbiddenIp { ip } = &err {
                        warn!(%host, %ip, "blocked resolution to forbidden address");
                    }
                    Err(Box::new(err) as _)
                }
            }
        })
    }
}

/// Narrows resolved addresses to the public subset.
///
/// # Errors
///
/// Returns [`NetError::ForbiddenIp`] carrying one of the rejected
/// addresses when nothing public remains.
fn filter_public(resolved: Vec<SocketAddr>) -> Result<Vec<SocketAddr>, NetError> {
    let mut rejected: Option<IpAddr> = None;
    let allowed: Vec<SocketAddr> = resolved
        .into_iter()
        .filter(|addr| {
            if is_forbidden_ip(addr.ip()) {
                rejected.get_or_insert(addr.ip());
                false
            } else {
                true
            }
        })
        .collect();

    if allowed.is_empty() {
        let ip = rejected.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        return Err(NetError::ForbiddenIp { ip });
    }

    Ok(allowed)
}

/// Builds the outbound HTTP client used for all external calls.
///
/// Installs the [`SafeResolver`], caps redirects at ten hops, and binds
/// the whole request to `timeout`.
///
/// # Errors
///
/// Returns [`NetError::Build`] if the client cannot be constructed.
pub fn safe_client(timeout: Duration) -> Result<reqwest::Client, NetError> {
    let client = reqwest::Client::builder()
        .dns_resolver(Arc::new(SafeResolver))
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(10)
        .timeout(timeout)
        .build()?;

    Ok(client)
}
