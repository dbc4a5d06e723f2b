//! SSRF guard for outbound webhook POSTs: a DNS resolver that only ever
//! hands `reqwest` globally-routable IPv4 addresses, so a subscriber URL
//! cannot be used to make this process reach an internal service (the
//! webhook worker POSTs to a URL supplied by tenant configuration, which is
//! untrusted input). Adapted from the teacher's own `hook-worker/src/dns.rs`.

use std::error::Error as StdError;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use futures::FutureExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::task::spawn_blocking;

type BoxError = Box<dyn StdError + Send + Sync>;

/// `true` if `addr` is a publicly routable IPv4 address. IPv6 is rejected
/// outright rather than carrying a partial allowlist, matching the
/// teacher's "our infra does not currently support IPv6" stance.
fn is_global_ipv4(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => {
            !(ip.octets()[0] == 0
                || ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_broadcast())
        }
        IpAddr::V6(_) => false,
    }
}

/// A `reqwest` DNS resolver wrapping the stdlib resolver, filtering results
/// down to public IPv4 addresses only.
pub struct PublicIpv4Resolver;

impl Resolve for PublicIpv4Resolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolve_host = move || (name.as_str(), 0).to_socket_addrs();

        let future_result = spawn_blocking(resolve_host).map(|result| match result {
            Ok(Ok(addrs)) => {
                let addrs: Addrs = Box::new(addrs.filter(is_global_ipv4));
                Ok(addrs)
            }
            Ok(Err(err)) => {
                let err: BoxError = Box::new(err);
                Err(err)
            }
            Err(join_err) => {
                let err: BoxError =
                    Box::new(io::Error::new(io::ErrorKind::Interrupted, join_err));
                Err(err)
            }
        });

        Box::pin(future_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(octets: [u8; 4]) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(octets.into()), 0)
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(!is_global_ipv4(&addr([10, 0, 0, 1])));
        assert!(!is_global_ipv4(&addr([172, 16, 0, 1])));
        assert!(!is_global_ipv4(&addr([192, 168, 1, 1])));
    }

    #[test]
    fn rejects_loopback_and_link_local() {
        assert!(!is_global_ipv4(&addr([127, 0, 0, 1])));
        assert!(!is_global_ipv4(&addr([169, 254, 0, 1])));
    }

    #[test]
    fn accepts_a_public_address() {
        assert!(is_global_ipv4(&addr([93, 184, 216, 34])));
    }

    #[test]
    fn rejects_ipv6() {
        let v6 = SocketAddr::new("::1".parse().unwrap(), 0);
        assert!(!is_global_ipv4(&v6));
    }
}
