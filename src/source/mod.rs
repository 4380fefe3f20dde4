//! UDP datagram source.
//!
//! Opens a unicast, broadcast or multicast-joined socket with `socket2`,
//! then reads datagrams through tokio. Reads resolve to one of three
//! outcomes: a datagram, a recoverable timeout, or end-of-stream after
//! close. Closing from another task unblocks an in-flight read promptly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::IngestionConfig;
use crate::endpoint::StreamEndpoint;
use crate::error::{IngestError, Result};
use crate::netif;

/// Outcome of a single read. Timeout is recoverable (retry), end-of-stream
/// is terminal.
#[derive(Debug)]
pub enum ReadOutcome {
    Datagram(Bytes),
    Timeout,
    EndOfStream,
}

/// Cross-task close handle; see [`UdpDatagramSource::closer`].
#[derive(Clone)]
pub struct SourceCloser {
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl SourceCloser {
    /// Idempotent. Any blocked read resolves to end-of-stream.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }
}

pub struct UdpDatagramSource {
    sock: UdpSocket,
    buf: Vec<u8>,
    timeout: Duration,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl UdpDatagramSource {
    /// Bind (and for multicast endpoints, join) the socket described by
    /// `endpoint`. Bind or join failure is fatal for the open attempt and
    /// is never retried internally.
    pub fn open(endpoint: &StreamEndpoint, config: &IngestionConfig) -> Result<Self> {
        let target = endpoint.socket_addr()?;
        let domain = match target {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| IngestError::open("socket create", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| IngestError::open("reuse address", e))?;
        socket
            .set_recv_buffer_size(config.socket_buffer_size)
            .map_err(|e| IngestError::open("receive buffer size", e))?;

        if endpoint.is_multicast() {
            socket
                .bind(&target.into())
                .map_err(|e| IngestError::open(format!("bind {target}"), e))?;
            match target.ip() {
                IpAddr::V4(group) => {
                    let iface = match &config.network_interface {
                        Some(name) => netif::ipv4_for_interface(name).ok_or_else(|| {
                            IngestError::open(
                                format!("interface {name} has no IPv4 address"),
                                std::io::Error::from(std::io::ErrorKind::NotFound),
                            )
                        })?,
                        None => Ipv4Addr::UNSPECIFIED,
                    };
                    socket
                        .join_multicast_v4(&group, &iface)
                        .map_err(|e| IngestError::open(format!("join {group} on {iface}"), e))?;
                    socket
                        .set_multicast_ttl_v4(config.ttl)
                        .map_err(|e| IngestError::open("multicast TTL", e))?;
                    debug!(%group, %iface, ttl = config.ttl, "joined multicast group");
                }
                IpAddr::V6(group) => {
                    socket
                        .join_multicast_v6(&group, 0)
                        .map_err(|e| IngestError::open(format!("join {group}"), e))?;
                    debug!(%group, "joined IPv6 multicast group");
                }
            }
        } else {
            if config.allow_broadcast {
                socket
                    .set_broadcast(true)
                    .map_err(|e| IngestError::open("broadcast", e))?;
            }
            socket
                .bind(&target.into())
                .map_err(|e| IngestError::open(format!("bind {target}"), e))?;
            debug!(%target, broadcast = config.allow_broadcast, "bound unicast socket");
        }

        socket
            .set_nonblocking(true)
            .map_err(|e| IngestError::open("nonblocking", e))?;
        let sock = UdpSocket::from_std(socket.into())
            .map_err(|e| IngestError::open("tokio registration", e))?;

        Ok(Self {
            sock,
            buf: vec![0u8; config.max_packet_size],
            timeout: config.connection_timeout,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle for closing the source from another task.
    pub fn closer(&self) -> SourceCloser {
        SourceCloser {
            closed: Arc::clone(&self.closed),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Idempotent; see [`SourceCloser::close`].
    pub fn close(&self) {
        self.closer().close();
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr().map_err(IngestError::Transport)
    }

    /// Wait for the next datagram. Resolves with `Timeout` once
    /// `connection_timeout` elapses without traffic, and with
    /// `EndOfStream` as soon as the source is closed.
    ///
    /// Datagrams larger than `max_packet_size` arrive truncated per
    /// platform socket semantics; the truncation is logged, not fatal.
    pub async fn read_next(&mut self) -> Result<ReadOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(ReadOutcome::EndOfStream);
        }
        tokio::select! {
            _ = self.shutdown.notified() => Ok(ReadOutcome::EndOfStream),
            _ = tokio::time::sleep(self.timeout) => Ok(ReadOutcome::Timeout),
            received = self.sock.recv_from(&mut self.buf) => match received {
                Ok((len, _from)) => {
                    if len == self.buf.len() {
                        warn!(len, "datagram filled the receive buffer, tail may be truncated");
                    }
                    Ok(ReadOutcome::Datagram(Bytes::copy_from_slice(&self.buf[..len])))
                }
                Err(e) => Err(IngestError::Transport(e)),
            },
        }
    }
}
