//! Command descriptor block construction.
//!
//! CDBs are fixed-size byte arrays (6, 10, or 16 bytes) with big-endian
//! multi-byte fields. Each constructor produces a complete, ready-to-submit
//! block; the caller supplies only the logical parameters.

/// Maximum CDB length produced by this crate.
pub const MAX_CDB_LEN: usize = 16;

/// Operation codes for the commands the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    TestUnitReady = 0x00,
    Inquiry = 0x12,
    ReadCapacity10 = 0x25,
    Read16 = 0x88,
    Write16 = 0x8a,
}

impl Opcode {
    /// Try to convert a byte to an opcode.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::TestUnitReady),
            0x12 => Some(Opcode::Inquiry),
            0x25 => Some(Opcode::ReadCapacity10),
            0x88 => Some(Opcode::Read16),
            0x8a => Some(Opcode::Write16),
            _ => None,
        }
    }

    /// Human-readable command name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::TestUnitReady => "TEST UNIT READY",
            Opcode::Inquiry => "INQUIRY",
            Opcode::ReadCapacity10 => "READ CAPACITY(10)",
            Opcode::Read16 => "READ(16)",
            Opcode::Write16 => "WRITE(16)",
        }
    }
}

/// A complete command descriptor block.
///
/// Stores up to 16 bytes inline; `as_bytes()` yields exactly the significant
/// prefix for the command's group (6 bytes for TEST UNIT READY and INQUIRY,
/// 10 for READ CAPACITY(10), 16 for READ(16)/WRITE(16)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; MAX_CDB_LEN],
    len: u8,
}

impl Cdb {
    /// TEST UNIT READY: 6 zero bytes.
    pub fn test_unit_ready() -> Self {
        Self {
            bytes: [0; MAX_CDB_LEN],
            len: 6,
        }
    }

    /// READ(16) of `blocks` logical blocks starting at `lba`.
    pub fn read16(lba: u64, blocks: u32) -> Self {
        Self::rw16(Opcode::Read16, lba, blocks)
    }

    /// WRITE(16) of `blocks` logical blocks starting at `lba`.
    pub fn write16(lba: u64, blocks: u32) -> Self {
        Self::rw16(Opcode::Write16, lba, blocks)
    }

    fn rw16(op: Opcode, lba: u64, blocks: u32) -> Self {
        let mut bytes = [0u8; MAX_CDB_LEN];
        bytes[0] = op as u8;
        bytes[2..10].copy_from_slice(&lba.to_be_bytes());
        bytes[10..14].copy_from_slice(&blocks.to_be_bytes());
        Self { bytes, len: 16 }
    }

    /// Standard INQUIRY with the given allocation length.
    pub fn inquiry(alloc_len: u8) -> Self {
        let mut bytes = [0u8; MAX_CDB_LEN];
        bytes[0] = Opcode::Inquiry as u8;
        bytes[4] = alloc_len;
        Self { bytes, len: 6 }
    }

    /// READ CAPACITY(10): returns last LBA and block size, both 32-bit.
    pub fn read_capacity10() -> Self {
        let mut bytes = [0u8; MAX_CDB_LEN];
        bytes[0] = Opcode::ReadCapacity10 as u8;
        Self { bytes, len: 10 }
    }

    /// The significant CDB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// CDB length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; CDBs are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Decoded operation code, if recognized.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.bytes[0])
    }

    /// Command name for diagnostics; `"(unknown)"` for unrecognized opcodes.
    pub fn name(&self) -> &'static str {
        self.opcode().map_or("(unknown)", |op| op.name())
    }
}
