//! Sense buffer and discovery response interpretation.
//!
//! Sense data arrives in one of two layouts distinguished by the response
//! code in byte 0: fixed format (0x70/0x71, sense key in byte 2) and
//! descriptor format (0x72/0x73, sense key in byte 1).

/// Sense key: no sense data.
pub const SENSE_KEY_NO_SENSE: u8 = 0x0;
/// Sense key: command completed with a recovered error (benign advisory).
pub const SENSE_KEY_RECOVERED_ERROR: u8 = 0x1;
/// Sense key: unit attention (e.g. reset or media change since last command).
pub const SENSE_KEY_UNIT_ATTENTION: u8 = 0x6;

/// Extract the sense key from a sense buffer.
///
/// Returns `None` when the buffer is too short or the response code is not
/// a recognized fixed or descriptor format.
pub fn sense_key(sense: &[u8]) -> Option<u8> {
    let resp_code = *sense.first()? & 0x7f;
    match resp_code {
        0x70 | 0x71 => Some(sense.get(2)? & 0x0f),
        0x72 | 0x73 => Some(sense.get(1)? & 0x0f),
        _ => None,
    }
}

/// Extract the product identification field (bytes 16..32) from a standard
/// INQUIRY response.
pub fn parse_inquiry_product_id(data: &[u8]) -> Option<&[u8]> {
    data.get(16..32)
}

/// Decode a READ CAPACITY(10) response into `(last_lba, block_size)`.
pub fn parse_read_capacity10(data: &[u8]) -> Option<(u32, u32)> {
    let last_lba = u32::from_be_bytes(data.get(0..4)?.try_into().ok()?);
    let block_size = u32::from_be_bytes(data.get(4..8)?.try_into().ok()?);
    Some((last_lba, block_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_format_sense_key() {
        let mut sense = [0u8; 18];
        sense[0] = 0x70;
        sense[2] = SENSE_KEY_RECOVERED_ERROR;
        assert_eq!(sense_key(&sense), Some(SENSE_KEY_RECOVERED_ERROR));
    }

    #[test]
    fn descriptor_format_sense_key() {
        let mut sense = [0u8; 8];
        sense[0] = 0x72;
        sense[1] = SENSE_KEY_UNIT_ATTENTION;
        assert_eq!(sense_key(&sense), Some(SENSE_KEY_UNIT_ATTENTION));
    }

    #[test]
    fn deferred_and_valid_bit_accepted() {
        // Bit 7 (the legacy "valid" bit) must not confuse the response code.
        let mut sense = [0u8; 18];
        sense[0] = 0xf1; // 0x71 with bit 7 set
        sense[2] = 0x03;
        assert_eq!(sense_key(&sense), Some(0x03));
    }

    #[test]
    fn unrecognized_or_short_sense() {
        assert_eq!(sense_key(&[]), None);
        assert_eq!(sense_key(&[0x00, 0x01]), None);
        assert_eq!(sense_key(&[0x70]), None); // fixed format but truncated
    }

    #[test]
    fn inquiry_product_id_field() {
        let mut data = [0u8; 96];
        data[16..26].copy_from_slice(b"scsi_debug");
        let id = parse_inquiry_product_id(&data).unwrap();
        assert!(id.starts_with(b"scsi_debug"));
        assert_eq!(id.len(), 16);
        assert_eq!(parse_inquiry_product_id(&data[..20]), None);
    }

    #[test]
    fn read_capacity_decode() {
        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&0x0001_ffffu32.to_be_bytes());
        data[4..8].copy_from_slice(&512u32.to_be_bytes());
        assert_eq!(parse_read_capacity10(&data), Some((0x0001_ffff, 512)));
        assert_eq!(parse_read_capacity10(&data[..7]), None);
    }
}
