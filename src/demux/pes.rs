//! PES packet reassembly into elementary-stream access units.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::DemuxFlags;
use crate::constants::{PES_START_CODE, STREAM_TYPE_H264, STREAM_TYPE_HEVC};

/// One demultiplexed access unit: the PES payload of a single elementary
/// stream packet, header stripped.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub pid: u16,
    pub stream_type: u8,
    /// 33-bit PTS at 90 kHz, when the PES header carried one.
    pub pts: Option<u64>,
    /// Whether playback may start at this unit. Always true for audio;
    /// for video governed by IDR detection and the non-IDR tolerance flag.
    pub is_random_access: bool,
    pub data: Bytes,
}

/// Hard cap on a single buffered PES packet, to bound memory when a
/// stream never signals a packet boundary.
const MAX_PES_SIZE: usize = 4 * 1024 * 1024;

/// Collects TS payloads of one elementary PID between payload-unit-start
/// markers and emits the finished PES packet as an access unit.
pub(crate) struct PesAssembler {
    stream_type: u8,
    buf: BytesMut,
    collecting: bool,
    last_cc: Option<u8>,
    /// Set after the first real IDR; provisional random-access points are
    /// only granted before that.
    seen_idr: bool,
}

impl PesAssembler {
    pub(crate) fn new(stream_type: u8) -> Self {
        Self {
            stream_type,
            buf: BytesMut::new(),
            collecting: false,
            last_cc: None,
            seen_idr: false,
        }
    }

    pub(crate) fn stream_type(&self) -> u8 {
        self.stream_type
    }

    /// Feed one TS packet payload. Returns the access unit completed by
    /// this packet, if any.
    pub(crate) fn push(
        &mut self,
        pid: u16,
        payload: &[u8],
        payload_unit_start: bool,
        continuity_counter: u8,
        flags: &DemuxFlags,
    ) -> Option<AccessUnit> {
        // A continuity break means packets were lost mid-unit; the partial
        // unit cannot be trusted and is discarded, never emitted.
        if let Some(prev) = self.last_cc {
            let expected = (prev + 1) & 0x0F;
            if continuity_counter == prev {
                // duplicate packet, ignore payload
                return None;
            }
            if continuity_counter != expected && self.collecting {
                debug!(pid, prev, got = continuity_counter, "continuity break, dropping partial unit");
                self.buf.clear();
                self.collecting = false;
            }
        }
        self.last_cc = Some(continuity_counter);

        let mut finished = None;
        if payload_unit_start {
            if self.collecting && !self.buf.is_empty() {
                finished = self.finish(pid, flags);
            }
            self.buf.clear();
            self.collecting = true;
        }

        if self.collecting {
            if self.buf.len() + payload.len() > MAX_PES_SIZE {
                debug!(pid, "PES packet exceeds size cap, dropping");
                self.buf.clear();
                self.collecting = false;
            } else {
                self.buf.extend_from_slice(payload);
            }
        }

        finished
    }

    /// Parse the buffered PES packet. Malformed packets yield `None` and
    /// are counted by the caller toward the sustained-error bound.
    fn finish(&mut self, pid: u16, flags: &DemuxFlags) -> Option<AccessUnit> {
        let raw = self.buf.split().freeze();
        if raw.len() < 9 || raw[..3] != PES_START_CODE {
            trace!(pid, "discarding payload without PES start code");
            return None;
        }

        let pts_dts_flags = (raw[7] & 0xC0) >> 6;
        let header_len = 9 + raw[8] as usize;
        if header_len >= raw.len() {
            trace!(pid, "PES header longer than packet");
            return None;
        }

        let pts = if pts_dts_flags & 0b10 != 0 && raw.len() >= 14 {
            Some(decode_pts(&raw[9..14]))
        } else {
            None
        };

        let data = raw.slice(header_len..);
        let is_random_access = self.classify_random_access(&data, flags);

        Some(AccessUnit {
            pid,
            stream_type: self.stream_type,
            pts,
            is_random_access,
            data,
        })
    }

    fn classify_random_access(&mut self, data: &[u8], flags: &DemuxFlags) -> bool {
        if !is_video(self.stream_type) {
            // audio / data units are all sync points
            return true;
        }
        if !flags.detect_access_units {
            return flags.allow_non_idr_keyframes;
        }
        if contains_idr(self.stream_type, data) {
            self.seen_idr = true;
            return true;
        }
        // until a true IDR shows up, non-IDR units may serve as
        // provisional join points
        flags.allow_non_idr_keyframes && !self.seen_idr
    }
}

fn is_video(stream_type: u8) -> bool {
    matches!(stream_type, STREAM_TYPE_H264 | STREAM_TYPE_HEVC)
}

/// Scan Annex-B NAL units for an IDR (H.264 type 5) or IRAP
/// (HEVC types 19..=21) slice.
fn contains_idr(stream_type: u8, data: &[u8]) -> bool {
    let mut i = 0;
    while i + 3 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            let nal = data[i + 3];
            match stream_type {
                STREAM_TYPE_H264 => {
                    if nal & 0x1F == 5 {
                        return true;
                    }
                }
                STREAM_TYPE_HEVC => {
                    let nal_type = (nal >> 1) & 0x3F;
                    if (19..=21).contains(&nal_type) {
                        return true;
                    }
                }
                _ => {}
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    false
}

/// 33-bit PTS from the 5-byte PES timestamp field.
fn decode_pts(p: &[u8]) -> u64 {
    ((p[0] as u64 & 0x0E) << 29)
        | ((p[1] as u64) << 22)
        | (((p[2] as u64 & 0xFE) >> 1) << 15)
        | ((p[3] as u64) << 7)
        | ((p[4] as u64) >> 1)
}
