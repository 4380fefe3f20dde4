use crate::error::{IngestError, Result};
use crate::psi::section::SectionReader;

#[derive(Debug, Clone)]
pub struct PatSection {
    pub version: u8,
    pub current_next: bool,
    pub programs: Vec<PatEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Parse a Program Association Table section. NIT pointers
/// (program_number 0) are skipped.
pub fn parse_pat(payload: &[u8]) -> Result<PatSection> {
    let sec = SectionReader::new(payload)?;
    if sec.table_id != 0x00 {
        return Err(IngestError::Demux("not a PAT".into()));
    }

    let mut programs = Vec::new();
    let mut idx = 0;
    while idx + 4 <= sec.body.len() {
        let program_number = u16::from_be_bytes([sec.body[idx], sec.body[idx + 1]]);
        let pmt_pid = (((sec.body[idx + 2] & 0x1F) as u16) << 8) | sec.body[idx + 3] as u16;
        if program_number != 0 {
            programs.push(PatEntry {
                program_number,
                pmt_pid,
            });
        }
        idx += 4;
    }

    Ok(PatSection {
        version: sec.version,
        current_next: sec.current_next,
        programs,
    })
}
