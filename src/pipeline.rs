//! Ingestion pipeline coordinator.
//!
//! Composes endpoint classification, capability acquisition, the datagram
//! source and the TS demuxer into one handle the playback engine consumes.
//! The handle is the "media source": it yields demultiplexed access units
//! and owns the disposal contract for everything underneath.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::capability::{CapabilityManager, CapabilityToken};
use crate::config::IngestionConfig;
use crate::demux::{AccessUnit, TsDemuxer};
use crate::endpoint::{Scheme, StreamEndpoint};
use crate::error::{IngestError, Result};
use crate::source::{ReadOutcome, SourceCloser, UdpDatagramSource};

/// Pipeline lifecycle, in build order. `Disposed` is terminal and
/// reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Classifying,
    CapabilityAcquiring,
    SourceOpen,
    Streaming,
    Disposed,
}

/// What a poll of the pipeline produced. Timeout is recoverable; the
/// caller simply polls again.
#[derive(Debug)]
pub enum PipelineEvent {
    AccessUnit(AccessUnit),
    Timeout,
    EndOfStream,
}

type ErrorListener = Box<dyn Fn(&IngestError) + Send + Sync>;

pub struct IngestionPipeline {
    endpoint: StreamEndpoint,
    state: PipelineState,
    source: Option<UdpDatagramSource>,
    demuxer: TsDemuxer,
    token: Option<CapabilityToken>,
    listeners: Vec<ErrorListener>,
    pending: VecDeque<AccessUnit>,
}

impl IngestionPipeline {
    /// Classify the URL, acquire the multicast capability when needed,
    /// open the datagram source and attach the demuxer.
    ///
    /// A failure at any step unwinds what was already acquired before the
    /// error propagates: a released token for a failed open, nothing held
    /// for a failed classification.
    pub fn build(
        url: &str,
        config: IngestionConfig,
        capability: &Arc<CapabilityManager>,
    ) -> Result<Self> {
        let endpoint = StreamEndpoint::parse(url)?;
        let multicast = endpoint.is_multicast();
        debug!(%endpoint, multicast, "classified stream endpoint");

        let token = if multicast {
            Some(capability.acquire()?)
        } else {
            None
        };

        let source = match UdpDatagramSource::open(&endpoint, &config) {
            Ok(source) => source,
            Err(e) => {
                // unwind: the token (when held) goes back before we report
                if let Some(token) = token {
                    token.release();
                }
                return Err(e);
            }
        };

        let demuxer = TsDemuxer::new(config.demux.clone(), endpoint.scheme() == Scheme::Rtp);

        info!(%endpoint, "ingestion pipeline streaming");
        Ok(Self {
            endpoint,
            state: PipelineState::Streaming,
            source: Some(source),
            demuxer,
            token,
            listeners: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    /// Local address of the underlying socket (diagnostics, tests).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.source {
            Some(source) => source.local_addr(),
            None => Err(IngestError::Transport(std::io::Error::from(
                std::io::ErrorKind::NotConnected,
            ))),
        }
    }

    /// Handle that lets another task dispose the transport while a poll
    /// is in flight; the poll resolves to `EndOfStream` promptly.
    pub fn closer(&self) -> Option<SourceCloser> {
        self.source.as_ref().map(|s| s.closer())
    }

    /// Register a callback for asynchronous transport/demux errors.
    /// Listeners are dropped on dispose.
    pub fn add_error_listener(&mut self, listener: impl Fn(&IngestError) + Send + Sync + 'static) {
        if self.state != PipelineState::Disposed {
            self.listeners.push(Box::new(listener));
        }
    }

    /// Poll the next demultiplexed access unit.
    ///
    /// Transport timeouts surface as [`PipelineEvent::Timeout`] and the
    /// caller may keep polling. Errors are fanned out to registered
    /// listeners before being returned.
    pub async fn next_access_unit(&mut self) -> Result<PipelineEvent> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(PipelineEvent::AccessUnit(unit));
            }
            let Some(source) = self.source.as_mut() else {
                return Ok(PipelineEvent::EndOfStream);
            };

            let outcome = match source.read_next().await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.notify(e)),
            };
            match outcome {
                ReadOutcome::Datagram(datagram) => {
                    let mut units = Vec::new();
                    if let Err(e) = self.demuxer.push_datagram(&datagram, &mut units) {
                        return Err(self.notify(e));
                    }
                    self.pending.extend(units);
                }
                ReadOutcome::Timeout => return Ok(PipelineEvent::Timeout),
                ReadOutcome::EndOfStream => return Ok(PipelineEvent::EndOfStream),
            }
        }
    }

    /// Tear everything down: close the socket, hand back the capability,
    /// drop listeners. Safe to call from any state, any number of times.
    pub fn dispose(&mut self) {
        if self.state == PipelineState::Disposed {
            return;
        }
        if let Some(source) = self.source.take() {
            source.close();
            // dropping the source releases the file descriptor
        }
        if let Some(token) = self.token.take() {
            token.release();
        }
        self.listeners.clear();
        self.pending.clear();
        self.state = PipelineState::Disposed;
        info!(endpoint = %self.endpoint, "ingestion pipeline disposed");
    }

    fn notify(&self, error: IngestError) -> IngestError {
        for listener in &self.listeners {
            listener(&error);
        }
        error
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}
