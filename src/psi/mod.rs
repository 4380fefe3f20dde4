//! PSI table parsing (PAT/PMT only; single-program operation).

pub mod pat;
pub mod pmt;
pub mod section;

pub use pat::{PatEntry, PatSection, parse_pat};
pub use pmt::{EsEntry, PmtSection, parse_pmt};
