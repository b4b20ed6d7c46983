//! SCSI command descriptor block construction and sense data interpretation.
//!
//! This crate owns the wire format of the SCSI commands the dispatch engine
//! issues: fixed-length CDBs with big-endian multi-byte fields, plus the
//! decoding of sense buffers and the response payloads of the discovery
//! commands (INQUIRY, READ CAPACITY(10)).
//!
//! # Example
//!
//! ```
//! use protocol_scsi::{Cdb, Opcode};
//!
//! let cdb = Cdb::read16(0x12345, 1);
//! assert_eq!(cdb.opcode(), Some(Opcode::Read16));
//! assert_eq!(cdb.as_bytes().len(), 16);
//! ```

mod cdb;
mod sense;

pub use cdb::{Cdb, Opcode};
pub use sense::{
    SENSE_KEY_NO_SENSE, SENSE_KEY_RECOVERED_ERROR, SENSE_KEY_UNIT_ATTENTION,
    parse_inquiry_product_id, parse_read_capacity10, sense_key,
};

/// Allocation length used for standard INQUIRY responses.
pub const INQUIRY_REPLY_LEN: u8 = 96;
