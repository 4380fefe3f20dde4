//! Constants for MPEG-TS framing and UDP ingestion defaults

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Well-known PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_NULL: u16 = 0x1FFF;

/// Stream types we inspect for random-access detection
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_HEVC: u8 = 0x24;

/// PTS clock rate (90 kHz)
pub const PTS_CLOCK_HZ: u64 = 90_000;

/// Absolute ceiling for a single UDP datagram payload
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Ingestion defaults, matching the UDP data source of the original player
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_TTL: u32 = 1;

/// IPv4 Class D (multicast) first-octet range
pub const MULTICAST_FIRST_OCTET_MIN: u8 = 224;
pub const MULTICAST_FIRST_OCTET_MAX: u8 = 239;

/// How many consecutive TS packets may fail to produce an access unit
/// (once the PMT is known) before the demuxer reports a sustained error
pub const DEMUX_ERROR_PACKET_BOUND: u32 = 1024;
