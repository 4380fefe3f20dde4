//! Generic PSI section reader with CRC-32 (MPEG-2) validation.

use crc::{CRC_32_MPEG_2, Crc};

use crate::error::{IngestError, Result};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Fixed section header plus the body slice between header and CRC.
pub struct SectionReader<'a> {
    pub table_id: u8,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section: u8,
    /// transport_stream_id for PAT, program_number for PMT
    pub table_id_extension: u16,
    pub body: &'a [u8],
}

impl<'a> SectionReader<'a> {
    /// Validates pointer field, section_length and the trailing CRC-32.
    pub fn new(payload: &'a [u8]) -> Result<Self> {
        let pointer = *payload
            .first()
            .ok_or_else(|| IngestError::Demux("empty section payload".into()))? as usize;
        let start = 1 + pointer;
        if payload.len() < start + 8 {
            return Err(IngestError::Demux("short section".into()));
        }

        let table_id = payload[start];
        let section_len = (((payload[start + 1] & 0x0F) as usize) << 8) | payload[start + 2] as usize;
        if section_len < 9 {
            return Err(IngestError::Demux("invalid section_length".into()));
        }
        let end = start + 3 + section_len;
        if end > payload.len() {
            return Err(IngestError::Demux("truncated section".into()));
        }

        let expected = CRC_MPEG.checksum(&payload[start..end - 4]);
        let stored = u32::from_be_bytes(
            payload[end - 4..end]
                .try_into()
                .map_err(|_| IngestError::Demux("short CRC".into()))?,
        );
        if expected != stored {
            return Err(IngestError::Demux("CRC-32 mismatch".into()));
        }

        Ok(Self {
            table_id,
            version: (payload[start + 5] & 0x3E) >> 1,
            current_next: payload[start + 5] & 0x01 != 0,
            section_number: payload[start + 6],
            last_section: payload[start + 7],
            table_id_extension: u16::from_be_bytes(
                payload[start + 3..start + 5]
                    .try_into()
                    .map_err(|_| IngestError::Demux("short header".into()))?,
            ),
            body: &payload[start + 8..end - 4],
        })
    }
}
