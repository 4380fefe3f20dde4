//! MPEG-TS demultiplexer adapter.
//!
//! Push-based: the pipeline feeds raw datagrams and collects completed
//! access units. Operates in single-PMT mode (first PAT program wins),
//! resynchronizes on corrupt input, and is forward-only — re-parsing a
//! stream from the start needs a fresh instance.

mod pes;

pub use pes::AccessUnit;

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::config::DemuxFlags;
use crate::constants::*;
use crate::error::{IngestError, Result};
use crate::psi::{PatEntry, PmtSection, parse_pat, parse_pmt};

use pes::PesAssembler;

pub struct TsDemuxer {
    flags: DemuxFlags,
    /// Strip the fixed RTP header in front of each datagram (rtp:// scheme).
    strip_rtp: bool,
    /// Partial TS packet carried between datagrams.
    carry: BytesMut,
    /// Program selected from the first PAT (single-PMT operation).
    program: Option<PatEntry>,
    pmt: Option<PmtSection>,
    assemblers: HashMap<u16, PesAssembler>,
    /// TS packets processed since the last emitted unit, once the PMT is
    /// known. Drives the sustained-error escalation.
    packets_since_unit: u32,
    stalled: bool,
}

impl TsDemuxer {
    pub fn new(flags: DemuxFlags, strip_rtp: bool) -> Self {
        Self {
            flags,
            strip_rtp,
            carry: BytesMut::new(),
            program: None,
            pmt: None,
            assemblers: HashMap::new(),
            packets_since_unit: 0,
            stalled: false,
        }
    }

    /// Feed one datagram, appending any completed access units to `out`.
    ///
    /// Malformed packets are skipped with best-effort resynchronization.
    /// Only a sustained failure — [`DEMUX_ERROR_PACKET_BOUND`] packets
    /// without a single unit after the PMT appeared — escalates to an
    /// error.
    pub fn push_datagram(&mut self, datagram: &[u8], out: &mut Vec<AccessUnit>) -> Result<()> {
        let payload = if self.strip_rtp {
            strip_rtp_header(datagram)
        } else {
            datagram
        };
        self.carry.extend_from_slice(payload);

        loop {
            if self.carry.is_empty() {
                break;
            }
            if self.carry[0] != TS_SYNC_BYTE {
                // lost sync: drop bytes up to the next candidate sync byte
                match self.carry.iter().position(|&b| b == TS_SYNC_BYTE) {
                    Some(pos) => {
                        debug!(skipped = pos, "resynchronizing on TS sync byte");
                        self.carry.advance(pos);
                    }
                    None => {
                        self.carry.clear();
                        break;
                    }
                }
                continue;
            }
            if self.carry.len() < TS_PACKET_SIZE {
                break;
            }
            let packet = self.carry.split_to(TS_PACKET_SIZE);
            self.process_packet(&packet, out);
        }

        if self.pmt.is_some() && self.packets_since_unit > DEMUX_ERROR_PACKET_BOUND {
            self.stalled = true;
            return Err(IngestError::Demux(format!(
                "no access unit produced within {DEMUX_ERROR_PACKET_BOUND} packets"
            )));
        }
        Ok(())
    }

    /// The PMT of the selected program, once seen.
    pub fn program(&self) -> Option<&PmtSection> {
        self.pmt.as_ref()
    }

    /// Whether the demuxer hit the sustained-error bound.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    fn process_packet(&mut self, chunk: &[u8], out: &mut Vec<AccessUnit>) {
        // transport_error_indicator: the packet is known-bad, drop it
        if chunk[1] & 0x80 != 0 {
            return;
        }

        let pid = (((chunk[1] & 0x1F) as u16) << 8) | chunk[2] as u16;
        if pid == PID_NULL {
            return;
        }
        let payload_unit_start = chunk[1] & 0x40 != 0;
        let adaptation_field_ctrl = (chunk[3] & 0x30) >> 4;
        let continuity_counter = chunk[3] & 0x0F;

        if self.pmt.is_some() {
            self.packets_since_unit = self.packets_since_unit.saturating_add(1);
        }

        // adaptation-field-only or reserved: no payload to parse
        if adaptation_field_ctrl == 0 || adaptation_field_ctrl == 2 {
            return;
        }
        let mut payload_offset = 4usize;
        if adaptation_field_ctrl == 3 {
            let adaptation_len = chunk[4] as usize;
            payload_offset += 1 + adaptation_len;
            if payload_offset >= TS_PACKET_SIZE {
                return;
            }
        }
        let payload = &chunk[payload_offset..];

        if pid == PID_PAT {
            if payload_unit_start {
                self.handle_pat(payload);
            }
            return;
        }

        if let Some(program) = self.program {
            if pid == program.pmt_pid {
                if payload_unit_start {
                    self.handle_pmt(payload);
                }
                return;
            }
        }

        if let Some(assembler) = self.assemblers.get_mut(&pid) {
            if let Some(unit) = assembler.push(
                pid,
                payload,
                payload_unit_start,
                continuity_counter,
                &self.flags,
            ) {
                self.packets_since_unit = 0;
                out.push(unit);
            }
        }
    }

    fn handle_pat(&mut self, payload: &[u8]) {
        let pat = match parse_pat(payload) {
            Ok(pat) => pat,
            Err(e) => {
                debug!(error = %e, "dropping invalid PAT section");
                return;
            }
        };
        if !pat.current_next {
            return;
        }
        let Some(first) = pat.programs.first().copied() else {
            return;
        };
        match self.program {
            None => {
                debug!(
                    program = first.program_number,
                    pmt_pid = first.pmt_pid,
                    "selected program (single-PMT mode)"
                );
                self.program = Some(first);
            }
            Some(current) if current != first && pat.programs.iter().all(|p| *p != current) => {
                // the selected program vanished from the PAT; multi-program
                // remuxes are out of scope, so follow the replacement
                warn!(
                    old = current.program_number,
                    new = first.program_number,
                    "selected program left the PAT, switching"
                );
                self.program = Some(first);
                self.pmt = None;
                self.assemblers.clear();
            }
            Some(_) => {}
        }
    }

    fn handle_pmt(&mut self, payload: &[u8]) {
        let pmt = match parse_pmt(payload) {
            Ok(pmt) => pmt,
            Err(e) => {
                debug!(error = %e, "dropping invalid PMT section");
                return;
            }
        };

        let changed = self
            .pmt
            .as_ref()
            .map(|old| old.version != pmt.version)
            .unwrap_or(true);
        if changed {
            debug!(
                program = pmt.program_number,
                version = pmt.version,
                streams = pmt.streams.len(),
                "program map updated"
            );
            // drop assemblers for PIDs that left the program
            self.assemblers
                .retain(|pid, _| pmt.streams.iter().any(|s| s.elementary_pid == *pid));
            for es in &pmt.streams {
                self.assemblers
                    .entry(es.elementary_pid)
                    .or_insert_with(|| PesAssembler::new(es.stream_type));
            }
            self.pmt = Some(pmt);
        }
    }
}

/// Strip a fixed RTP header (RFC 3550) when the datagram looks like
/// RTP-encapsulated TS; anything else passes through untouched.
fn strip_rtp_header(datagram: &[u8]) -> &[u8] {
    if datagram.len() < 12 || datagram[0] >> 6 != 2 {
        return datagram;
    }
    let csrc_count = (datagram[0] & 0x0F) as usize;
    let mut offset = 12 + 4 * csrc_count;
    // header extension
    if datagram[0] & 0x10 != 0 {
        if datagram.len() < offset + 4 {
            return datagram;
        }
        let ext_words = u16::from_be_bytes([datagram[offset + 2], datagram[offset + 3]]) as usize;
        offset += 4 + 4 * ext_words;
    }
    if offset < datagram.len() && datagram[offset] == TS_SYNC_BYTE {
        &datagram[offset..]
    } else {
        datagram
    }
}
