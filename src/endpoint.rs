//! Stream endpoint parsing and multicast classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::constants::{MULTICAST_FIRST_OCTET_MAX, MULTICAST_FIRST_OCTET_MIN};
use crate::error::{IngestError, Result};

/// URL schemes the classifier recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Udp,
    /// TS over RTP; the demuxer strips the fixed RTP header per datagram.
    Rtp,
}

/// Parsed `udp://host:port` / `rtp://host:port` target. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    host: String,
    port: u16,
    scheme: Scheme,
}

impl StreamEndpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| IngestError::Classification(format!("missing scheme in {url:?}")))?;

        let scheme = match scheme {
            "udp" => Scheme::Udp,
            "rtp" => Scheme::Rtp,
            other => {
                return Err(IngestError::Classification(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        };

        // IPv6 literals carry the port outside the brackets
        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(|| {
                IngestError::Classification(format!("unterminated IPv6 literal in {url:?}"))
            })?;
            let port = tail.strip_prefix(':').ok_or_else(|| {
                IngestError::Classification(format!("missing port in {url:?}"))
            })?;
            (host, port)
        } else {
            rest.rsplit_once(':').ok_or_else(|| {
                IngestError::Classification(format!("missing port in {url:?}"))
            })?
        };

        if host.is_empty() {
            return Err(IngestError::Classification(format!("empty host in {url:?}")));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| IngestError::Classification(format!("invalid port in {url:?}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
            scheme,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// True iff the host is an IPv4 literal in the Class D range
    /// (first octet 224..=239), or an IPv6 multicast literal.
    /// Hostnames classify as unicast.
    pub fn is_multicast(&self) -> bool {
        if let Ok(v4) = self.host.parse::<Ipv4Addr>() {
            let first = v4.octets()[0];
            return (MULTICAST_FIRST_OCTET_MIN..=MULTICAST_FIRST_OCTET_MAX).contains(&first);
        }
        if let Ok(v6) = self.host.parse::<Ipv6Addr>() {
            return v6.is_multicast();
        }
        false
    }

    /// Resolve the endpoint to a socket address (literal fast path first).
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| IngestError::Classification(format!("cannot resolve {}: {e}", self.host)))?
            .next()
            .ok_or_else(|| {
                IngestError::Classification(format!("no address for host {}", self.host))
            })
    }
}

impl std::fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Udp => "udp",
            Scheme::Rtp => "rtp",
        };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        }
    }
}
