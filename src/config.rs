//! Ingestion configuration, fixed at pipeline construction time.

use std::time::Duration;

use crate::constants::*;

/// Extractor behavior toggles.
///
/// Both default to on, mirroring the hardcoded flags of the original
/// player's TS extractor. Streams with a reliable keyframe cadence can
/// disable `allow_non_idr_keyframes` to avoid provisional join points.
#[derive(Debug, Clone)]
pub struct DemuxFlags {
    /// Treat non-IDR video units seen before the first IDR as provisional
    /// random-access points (faster multicast join, possible initial
    /// glitches).
    pub allow_non_idr_keyframes: bool,
    /// Inspect video payloads for NAL-level access-unit boundaries. When
    /// off, units are delimited purely by PES packet starts.
    pub detect_access_units: bool,
}

impl Default for DemuxFlags {
    fn default() -> Self {
        Self {
            allow_non_idr_keyframes: true,
            detect_access_units: true,
        }
    }
}

/// Socket and demuxer parameters for one pipeline. Immutable once the
/// pipeline is built.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Receive buffer per datagram; larger datagrams are truncated.
    pub max_packet_size: usize,
    /// How long a read may wait for a datagram before yielding a
    /// recoverable timeout outcome.
    pub connection_timeout: Duration,
    /// Kernel receive buffer size requested for the socket.
    pub socket_buffer_size: usize,
    /// Multicast TTL, 1..=255.
    pub ttl: u32,
    /// Interface to join multicast on; platform default when unset.
    pub network_interface: Option<String>,
    /// Enable broadcast reception for unicast endpoints.
    pub allow_broadcast: bool,
    /// Extractor toggles.
    pub demux: DemuxFlags,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            connection_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            ttl: DEFAULT_TTL,
            network_interface: None,
            allow_broadcast: false,
            demux: DemuxFlags::default(),
        }
    }
}

impl IngestionConfig {
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.clamp(TS_PACKET_SIZE, MAX_UDP_PAYLOAD);
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl.clamp(1, 255);
        self
    }

    pub fn with_network_interface(mut self, name: impl Into<String>) -> Self {
        self.network_interface = Some(name.into());
        self
    }

    pub fn with_allow_broadcast(mut self, allow: bool) -> Self {
        self.allow_broadcast = allow;
        self
    }

    pub fn with_demux_flags(mut self, flags: DemuxFlags) -> Self {
        self.demux = flags;
        self
    }
}
