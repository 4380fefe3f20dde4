//! UDP/MPEG-TS ingestion pipeline.
//!
//! Classifies a `udp://` or `rtp://` target as multicast or unicast,
//! acquires the platform multicast capability when needed, reads raw
//! datagrams and demultiplexes them into elementary-stream access units
//! for an external playback engine.

pub mod capability;
pub mod config;
pub mod constants;
pub mod demux;
pub mod endpoint;
pub mod error;
pub mod netif;
pub mod pipeline;
pub mod psi;
pub mod source;

pub use capability::{CapabilityManager, CapabilityToken, MulticastLock, NullLock};
pub use config::{DemuxFlags, IngestionConfig};
pub use demux::{AccessUnit, TsDemuxer};
pub use endpoint::{Scheme, StreamEndpoint};
pub use error::{IngestError, Result};
pub use netif::{InterfaceInfo, list_active_interfaces};
pub use pipeline::{IngestionPipeline, PipelineEvent, PipelineState};
pub use source::{ReadOutcome, SourceCloser, UdpDatagramSource};
