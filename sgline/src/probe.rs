//! Pre-run device probes.
//!
//! Before any worker queues traffic, each target is interrogated over the
//! synchronous `SG_IO` path: an INQUIRY to identify the product (the
//! caller decides whether to accept it) and, when a span runs to the end
//! of the device, a READ CAPACITY(10) to find that end.

use protocol_scsi::{
    parse_inquiry_product_id, parse_read_capacity10, Cdb, INQUIRY_REPLY_LEN,
};

use crate::config::Config;
use crate::console::Console;
use crate::error::ProbeError;
use crate::session::DataDirection;
use crate::sg::{self, ErrCategory};

/// Size and granularity of a device, as reported by READ CAPACITY(10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Address of the last readable block.
    pub last_lba: u32,
    /// Logical block size in bytes.
    pub block_size: u32,
}

/// Fetch the product identification string for a device.
///
/// Trailing padding is trimmed. A recovered condition is noted and treated
/// as success.
pub fn inquiry_product_id(
    path: &str,
    config: &Config,
    console: &Console,
) -> Result<String, ProbeError> {
    const COMMAND: &str = "INQUIRY";
    let file = sg::open_device(path, config.blocking_open)?;
    let cdb = Cdb::inquiry(INQUIRY_REPLY_LEN);
    let mut reply = [0u8; INQUIRY_REPLY_LEN as usize];
    let verdict = sg::blocking_command(
        &file,
        &cdb,
        Some((DataDirection::FromDevice, &mut reply)),
        config.command_timeout_ms,
    )
    .map_err(|source| ProbeError::Io {
        command: COMMAND,
        source,
    })?;
    match verdict.category {
        ErrCategory::Clean => {}
        ErrCategory::Recovered => {
            console.note(
                0,
                format_args!("recovered error on {COMMAND} for {path}, continuing"),
            );
        }
        _ => {
            return Err(ProbeError::CommandFailed {
                command: COMMAND,
                detail: verdict.detail,
            })
        }
    }
    let product = parse_inquiry_product_id(&reply).ok_or_else(|| ProbeError::CommandFailed {
        command: COMMAND,
        detail: "short reply".to_string(),
    })?;
    Ok(String::from_utf8_lossy(product).trim_end().to_string())
}

/// Fetch the capacity of a device.
///
/// A unit attention straight after open is routine (device reset, media
/// change) and clears when reported, so the command is retried once.
pub fn read_capacity(
    path: &str,
    config: &Config,
    console: &Console,
) -> Result<Capacity, ProbeError> {
    const COMMAND: &str = "READ CAPACITY(10)";
    let file = sg::open_device(path, config.blocking_open)?;
    let cdb = Cdb::read_capacity10();
    let mut reply = [0u8; 64];
    let mut verdict = sg::blocking_command(
        &file,
        &cdb,
        Some((DataDirection::FromDevice, &mut reply)),
        config.command_timeout_ms,
    )
    .map_err(|source| ProbeError::Io {
        command: COMMAND,
        source,
    })?;
    if verdict.category == ErrCategory::UnitAttention {
        console.note(
            1,
            format_args!("unit attention on {COMMAND} for {path}, retrying"),
        );
        verdict = sg::blocking_command(
            &file,
            &cdb,
            Some((DataDirection::FromDevice, &mut reply)),
            config.command_timeout_ms,
        )
        .map_err(|source| ProbeError::Io {
            command: COMMAND,
            source,
        })?;
    }
    if verdict.category != ErrCategory::Clean {
        return Err(ProbeError::CommandFailed {
            command: COMMAND,
            detail: verdict.detail,
        });
    }
    let (last_lba, block_size) =
        parse_read_capacity10(&reply).ok_or_else(|| ProbeError::CommandFailed {
            command: COMMAND,
            detail: "short reply".to_string(),
        })?;
    Ok(Capacity {
        last_lba,
        block_size,
    })
}
