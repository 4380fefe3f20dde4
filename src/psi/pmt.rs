use crate::error::{IngestError, Result};
use crate::psi::section::SectionReader;

#[derive(Debug, Clone)]
pub struct PmtSection {
    pub version: u8,
    pub program_number: u16,
    pub pcr_pid: u16,
    pub streams: Vec<EsEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsEntry {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

/// Parse a Program Map Table section. Program and ES descriptors are
/// skipped; only the stream map is retained.
pub fn parse_pmt(payload: &[u8]) -> Result<PmtSection> {
    let sec = SectionReader::new(payload)?;
    if sec.table_id != 0x02 {
        return Err(IngestError::Demux("not a PMT".into()));
    }
    let body = sec.body;
    if body.len() < 4 {
        return Err(IngestError::Demux("short PMT body".into()));
    }

    let pcr_pid = (((body[0] & 0x1F) as u16) << 8) | body[1] as u16;
    let program_info_len = (((body[2] & 0x0F) as usize) << 8) | body[3] as usize;
    let mut idx = 4 + program_info_len;

    let mut streams = Vec::new();
    while idx + 5 <= body.len() {
        let stream_type = body[idx];
        let elementary_pid = (((body[idx + 1] & 0x1F) as u16) << 8) | body[idx + 2] as u16;
        let es_info_len = (((body[idx + 3] & 0x0F) as usize) << 8) | body[idx + 4] as usize;
        streams.push(EsEntry {
            stream_type,
            elementary_pid,
        });
        idx += 5 + es_info_len;
    }

    Ok(PmtSection {
        version: sec.version,
        program_number: sec.table_id_extension,
        pcr_pid,
        streams,
    })
}
