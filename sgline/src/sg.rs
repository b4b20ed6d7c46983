//! sg driver interface and the production device session.
//!
//! The sg character device speaks a fixed control block: a request is
//! submitted by `write()`ing an [`SgIoHdr`], and a finished request is
//! harvested by `read()`ing one back, tag and status filled in. The
//! [`SgSession`] wraps one open descriptor in the [`DeviceSession`]
//! contract; [`blocking_command`] drives the synchronous `SG_IO` path used
//! when probing a device before a run.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};

use protocol_scsi::{sense_key, Cdb, SENSE_KEY_RECOVERED_ERROR, SENSE_KEY_UNIT_ATTENTION};

use crate::config::{Config, QueueDiscipline};
use crate::correlation::CorrelationId;
use crate::error::{OpenError, SessionError};
use crate::session::{CompletionStatus, DataDirection, DataTransfer, DeviceSession};

// From <scsi/sg.h>.
const SG_INTERFACE_ID: i32 = 'S' as i32;
const SG_DXFER_NONE: i32 = -1;
const SG_DXFER_TO_DEV: i32 = -2;
const SG_DXFER_FROM_DEV: i32 = -3;

const SG_IO: libc::c_ulong = 0x2285;
const SG_GET_NUM_WAITING: libc::c_ulong = 0x227d;

const SG_FLAG_DIRECT_IO: u32 = 0x1;
const SG_FLAG_Q_AT_TAIL: u32 = 0x10;
const SG_FLAG_Q_AT_HEAD: u32 = 0x20;
const SG_FLAG_NO_DXFER: u32 = 0x10000;

// Status decode masks, from SAM and the driver headers.
const SCSI_STATUS_MASK: u8 = 0x7e;
const SCSI_STATUS_CHECK_CONDITION: u8 = 0x02;
const SCSI_STATUS_COMMAND_TERMINATED: u8 = 0x22;
const DRIVER_STATUS_MASK: u16 = 0x0f;
const DRIVER_STATUS_SENSE: u16 = 0x08;

const SENSE_BUF_LEN: usize = 64;

/// Control block exchanged with the sg driver (version 3 interface).
///
/// This matches the kernel's `struct sg_io_hdr` (88 bytes on 64-bit).
/// Submission fills the identification, command, transfer and timeout
/// fields; the driver fills the status fields when the request is read
/// back.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SgIoHdr {
    /// Always 'S' for the sg v3 interface.
    pub interface_id: i32,
    /// Transfer direction, one of the `SG_DXFER_*` values.
    pub dxfer_direction: i32,
    /// Command block length in bytes.
    pub cmd_len: u8,
    /// Capacity of the sense buffer at `sbp`.
    pub mx_sb_len: u8,
    /// Scatter-gather element count (0 = `dxferp` is a plain buffer).
    pub iovec_count: u16,
    /// Transfer length in bytes.
    pub dxfer_len: u32,
    /// Transfer buffer.
    pub dxferp: *mut libc::c_void,
    /// Command block.
    pub cmdp: *mut u8,
    /// Sense buffer, written when the device reports sense data.
    pub sbp: *mut u8,
    /// Command timeout in milliseconds.
    pub timeout: u32,
    /// `SG_FLAG_*` bits.
    pub flags: u32,
    /// Caller's tag; reported back on completion.
    pub pack_id: i32,
    /// Opaque caller pointer, unused here.
    pub usr_ptr: *mut libc::c_void,
    /// Raw SCSI status byte.
    pub status: u8,
    /// Shifted SCSI status.
    pub masked_status: u8,
    /// Message-level status.
    pub msg_status: u8,
    /// Bytes of sense data actually written to `sbp`.
    pub sb_len_wr: u8,
    /// Transport status.
    pub host_status: u16,
    /// Driver status, low nibble plus `DRIVER_STATUS_SENSE`.
    pub driver_status: u16,
    /// Bytes requested but not transferred.
    pub resid: i32,
    /// Command duration in milliseconds.
    pub duration: u32,
    /// Auxiliary information bits.
    pub info: u32,
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<SgIoHdr>() == 88);

impl SgIoHdr {
    fn zeroed() -> Self {
        // Safety: all-zero bytes are a valid value for this plain C struct
        // (null pointers included).
        unsafe { mem::zeroed() }
    }
}

/// How the driver and device judged one completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrCategory {
    /// No error anywhere in the stack.
    Clean,
    /// The device recovered; data was transferred.
    Recovered,
    /// The device demands attention (reset, media change) and wants the
    /// command re-issued.
    UnitAttention,
    /// Anything else. Not decoded further.
    Other,
}

/// Categorize a completed request from its status bytes and sense data.
pub(crate) fn categorize(hdr: &SgIoHdr, sense: &[u8]) -> ErrCategory {
    let scsi = hdr.status & SCSI_STATUS_MASK;
    let driver = hdr.driver_status & DRIVER_STATUS_MASK;
    if scsi == 0 && hdr.host_status == 0 && driver == 0 {
        return ErrCategory::Clean;
    }
    let sense_worthy = scsi == SCSI_STATUS_CHECK_CONDITION
        || scsi == SCSI_STATUS_COMMAND_TERMINATED
        || driver & DRIVER_STATUS_SENSE != 0;
    if sense_worthy {
        match sense_key(sense) {
            Some(SENSE_KEY_RECOVERED_ERROR) => return ErrCategory::Recovered,
            Some(SENSE_KEY_UNIT_ATTENTION) => return ErrCategory::UnitAttention,
            _ => {}
        }
    }
    ErrCategory::Other
}

/// Human-readable status summary for failure reports.
pub(crate) fn status_detail(hdr: &SgIoHdr, sense: &[u8]) -> String {
    let mut detail = format!(
        "scsi status 0x{:02x}, host status 0x{:04x}, driver status 0x{:04x}",
        hdr.status, hdr.host_status, hdr.driver_status
    );
    if let Some(key) = sense_key(sense) {
        detail.push_str(&format!(", sense key 0x{key:x}"));
    }
    detail
}

/// Open an sg device node, refusing anything that is not a character
/// device. Writing test patterns to a misnamed block device would corrupt
/// it, so the type check comes before any command is issued.
pub fn open_device(path: &str, blocking: bool) -> Result<File, OpenError> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if !blocking {
        options.custom_flags(libc::O_NONBLOCK);
    }
    let file = options.open(path).map_err(|source| OpenError::Device {
        path: path.to_string(),
        source,
    })?;
    let metadata = file.metadata().map_err(|source| OpenError::Device {
        path: path.to_string(),
        source,
    })?;
    if !metadata.file_type().is_char_device() {
        return Err(OpenError::NotCharDevice {
            path: path.to_string(),
        });
    }
    Ok(file)
}

/// Issue one command synchronously through the `SG_IO` ioctl.
///
/// Used for pre-run probes; the dispatcher's asynchronous traffic goes
/// through [`SgSession`] instead.
pub(crate) fn blocking_command(
    file: &File,
    cdb: &Cdb,
    data: Option<(DataDirection, &mut [u8])>,
    timeout_ms: u32,
) -> io::Result<CommandVerdict> {
    let mut sense = [0u8; SENSE_BUF_LEN];
    let mut hdr = SgIoHdr::zeroed();
    hdr.interface_id = SG_INTERFACE_ID;
    hdr.cmd_len = cdb.len() as u8;
    hdr.cmdp = cdb.as_bytes().as_ptr() as *mut u8;
    hdr.mx_sb_len = SENSE_BUF_LEN as u8;
    hdr.sbp = sense.as_mut_ptr();
    hdr.timeout = timeout_ms;
    match data {
        None => hdr.dxfer_direction = SG_DXFER_NONE,
        Some((direction, buf)) => {
            hdr.dxfer_direction = match direction {
                DataDirection::FromDevice => SG_DXFER_FROM_DEV,
                DataDirection::ToDevice => SG_DXFER_TO_DEV,
            };
            hdr.dxfer_len = buf.len() as u32;
            hdr.dxferp = buf.as_mut_ptr() as *mut libc::c_void;
        }
    }
    // Safety: hdr, the command block, the sense buffer and the transfer
    // buffer all outlive this call; SG_IO completes before returning.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), SG_IO, &mut hdr) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    let sense_len = (hdr.sb_len_wr as usize).min(SENSE_BUF_LEN);
    let sense = &sense[..sense_len];
    Ok(CommandVerdict {
        category: categorize(&hdr, sense),
        detail: status_detail(&hdr, sense),
    })
}

/// Outcome of a [`blocking_command`] call.
pub(crate) struct CommandVerdict {
    pub category: ErrCategory,
    pub detail: String,
}

/// Command flag bits for every submission of a run.
fn command_flags(config: &Config) -> u32 {
    let mut flags = match config.discipline {
        QueueDiscipline::DriverDefault => 0,
        QueueDiscipline::AtHead => SG_FLAG_Q_AT_HEAD,
        QueueDiscipline::AtTail => SG_FLAG_Q_AT_TAIL,
    };
    if config.direct {
        flags |= SG_FLAG_DIRECT_IO;
    }
    if config.no_transfer {
        flags |= SG_FLAG_NO_DXFER;
    }
    flags
}

/// Assemble the write-side control block for one asynchronous command.
///
/// The sense destination is registered here, not at harvest time: the
/// driver captures this header on submission and later copies sense bytes
/// to its `sbp` while servicing the read that returns the completion. The
/// `sbp`/`mx_sb_len` fields of the header handed to read() are echoed
/// back, never consumed.
fn submission_header(
    cdb: &Cdb,
    id: CorrelationId,
    transfer: Option<DataTransfer>,
    flags: u32,
    timeout_ms: u32,
    sense: &mut [u8; SENSE_BUF_LEN],
) -> SgIoHdr {
    let mut hdr = SgIoHdr::zeroed();
    hdr.interface_id = SG_INTERFACE_ID;
    hdr.cmd_len = cdb.len() as u8;
    hdr.cmdp = cdb.as_bytes().as_ptr() as *mut u8;
    hdr.mx_sb_len = SENSE_BUF_LEN as u8;
    hdr.sbp = sense.as_mut_ptr();
    hdr.timeout = timeout_ms;
    hdr.flags = flags;
    hdr.pack_id = id.as_pack_id();
    match transfer {
        None => hdr.dxfer_direction = SG_DXFER_NONE,
        Some(t) => {
            hdr.dxfer_direction = match t.direction {
                DataDirection::FromDevice => SG_DXFER_FROM_DEV,
                DataDirection::ToDevice => SG_DXFER_TO_DEV,
            };
            hdr.dxferp = t.ptr as *mut libc::c_void;
            hdr.dxfer_len = t.len;
        }
    }
    hdr
}

/// One asynchronous command queue against an open sg device.
///
/// Closing the descriptor while commands are in flight is safe: the driver
/// reclaims whatever is still queued.
pub struct SgSession {
    file: File,
    flags: u32,
    timeout_ms: u32,
    /// Sense destination for every submission. The driver writes it while
    /// this session's own read call harvests a completion, one at a time,
    /// so a single buffer serves the whole queue.
    sense: [u8; SENSE_BUF_LEN],
}

impl SgSession {
    /// Open `path` and prepare a session according to `config`.
    pub fn open(path: &str, config: &Config) -> Result<Self, OpenError> {
        let file = open_device(path, config.blocking_open)?;
        Ok(SgSession {
            file,
            flags: command_flags(config),
            timeout_ms: config.command_timeout_ms,
            sense: [0u8; SENSE_BUF_LEN],
        })
    }

    /// Flag bits attached to each submission, for diagnostics.
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

impl DeviceSession for SgSession {
    unsafe fn submit(
        &mut self,
        cdb: &Cdb,
        id: CorrelationId,
        transfer: Option<DataTransfer>,
    ) -> Result<(), SessionError> {
        let hdr = submission_header(
            cdb,
            id,
            transfer,
            self.flags,
            self.timeout_ms,
            &mut self.sense,
        );
        // Safety: the driver copies hdr and the command block during the
        // write call; the transfer buffer stays valid per this method's
        // contract, and the registered sense buffer lives as long as this
        // session.
        let n = unsafe {
            libc::write(
                self.file.as_raw_fd(),
                &hdr as *const SgIoHdr as *const libc::c_void,
                mem::size_of::<SgIoHdr>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOMEM) => SessionError::ResourceExhausted,
                _ => SessionError::Io(err),
            });
        }
        Ok(())
    }

    fn completions_available(&mut self) -> Result<u32, SessionError> {
        let mut waiting: libc::c_int = 0;
        // Safety: the ioctl writes one int through a valid pointer.
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), SG_GET_NUM_WAITING, &mut waiting)
        };
        if rc < 0 {
            return Err(SessionError::Io(io::Error::last_os_error()));
        }
        Ok(waiting.max(0) as u32)
    }

    fn read_completion(&mut self) -> Result<(CorrelationId, CompletionStatus), SessionError> {
        self.sense.fill(0);
        let mut hdr = SgIoHdr::zeroed();
        hdr.interface_id = SG_INTERFACE_ID;
        // Safety: the driver fills hdr, and writes at most mx_sb_len sense
        // bytes through the pointer registered at submission (self.sense);
        // both stay valid for the duration of the call.
        let n = unsafe {
            libc::read(
                self.file.as_raw_fd(),
                &mut hdr as *mut SgIoHdr as *mut libc::c_void,
                mem::size_of::<SgIoHdr>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EAGAIN) => SessionError::NotReady,
                _ => SessionError::Io(err),
            });
        }
        let id = CorrelationId::from_raw(hdr.pack_id as u32);
        let sense_len = (hdr.sb_len_wr as usize).min(SENSE_BUF_LEN);
        let sense = &self.sense[..sense_len];
        let status = match categorize(&hdr, sense) {
            ErrCategory::Clean => CompletionStatus::Good,
            ErrCategory::Recovered => CompletionStatus::Recovered,
            ErrCategory::UnitAttention | ErrCategory::Other => CompletionStatus::Failed {
                detail: status_detail(&hdr, sense),
            },
        };
        Ok((id, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::config::TargetSpec;

    fn hdr_with(status: u8, host: u16, driver: u16) -> SgIoHdr {
        let mut hdr = SgIoHdr::zeroed();
        hdr.status = status;
        hdr.host_status = host;
        hdr.driver_status = driver;
        hdr
    }

    // Fixed-format sense block with the given key.
    fn sense_with_key(key: u8) -> [u8; 18] {
        let mut sense = [0u8; 18];
        sense[0] = 0x70;
        sense[2] = key;
        sense
    }

    #[test]
    fn header_layout_matches_driver() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<SgIoHdr>(), 88);
    }

    #[test]
    fn submission_header_registers_sense_buffer() {
        let mut sense = [0u8; SENSE_BUF_LEN];
        let mut data = [0u8; 512];
        let cdb = Cdb::read16(0x1000, 1);
        let transfer = DataTransfer::from_device(data.as_mut_ptr(), data.len() as u32);
        let hdr = submission_header(
            &cdb,
            CorrelationId::from_raw(42),
            Some(transfer),
            SG_FLAG_Q_AT_TAIL,
            20_000,
            &mut sense,
        );

        assert_eq!(hdr.interface_id, SG_INTERFACE_ID);
        assert_eq!(hdr.sbp, sense.as_mut_ptr());
        assert_eq!(hdr.mx_sb_len, SENSE_BUF_LEN as u8);
        assert_eq!(hdr.pack_id, 42);
        assert_eq!(hdr.cmd_len, 16);
        assert_eq!(hdr.dxfer_direction, SG_DXFER_FROM_DEV);
        assert_eq!(hdr.dxfer_len, 512);
        assert_eq!(hdr.flags, SG_FLAG_Q_AT_TAIL);
        assert_eq!(hdr.timeout, 20_000);
    }

    #[test]
    fn no_transfer_commands_also_register_sense() {
        let mut sense = [0u8; SENSE_BUF_LEN];
        let hdr = submission_header(
            &Cdb::test_unit_ready(),
            CorrelationId::from_raw(7),
            None,
            0,
            20_000,
            &mut sense,
        );
        assert_eq!(hdr.dxfer_direction, SG_DXFER_NONE);
        assert!(!hdr.sbp.is_null());
        assert_eq!(hdr.mx_sb_len, SENSE_BUF_LEN as u8);
    }

    #[test]
    fn all_zero_status_is_clean() {
        let hdr = hdr_with(0, 0, 0);
        assert_eq!(categorize(&hdr, &[]), ErrCategory::Clean);
    }

    #[test]
    fn recovered_error_detected_from_sense() {
        let hdr = hdr_with(SCSI_STATUS_CHECK_CONDITION, 0, DRIVER_STATUS_SENSE);
        let sense = sense_with_key(SENSE_KEY_RECOVERED_ERROR);
        assert_eq!(categorize(&hdr, &sense), ErrCategory::Recovered);
    }

    #[test]
    fn unit_attention_detected_from_sense() {
        let hdr = hdr_with(SCSI_STATUS_CHECK_CONDITION, 0, 0);
        let sense = sense_with_key(SENSE_KEY_UNIT_ATTENTION);
        assert_eq!(categorize(&hdr, &sense), ErrCategory::UnitAttention);
    }

    #[test]
    fn transport_error_is_other() {
        // host_status 0x07 is an outright transport failure; no sense data.
        let hdr = hdr_with(0, 0x07, 0);
        assert_eq!(categorize(&hdr, &[]), ErrCategory::Other);
        let detail = status_detail(&hdr, &[]);
        assert!(detail.contains("host status 0x0007"));
    }

    #[test]
    fn check_condition_without_usable_sense_is_other() {
        let hdr = hdr_with(SCSI_STATUS_CHECK_CONDITION, 0, 0);
        assert_eq!(categorize(&hdr, &[]), ErrCategory::Other);
    }

    #[test]
    fn sense_bytes_decide_recovered_versus_failed() {
        // Same completion status either way; only the captured sense data
        // separates a recovered condition from a fatal one.
        let hdr = hdr_with(SCSI_STATUS_CHECK_CONDITION, 0, DRIVER_STATUS_SENSE);
        assert_eq!(categorize(&hdr, &[]), ErrCategory::Other);
        let sense = sense_with_key(SENSE_KEY_RECOVERED_ERROR);
        assert_eq!(categorize(&hdr, &sense), ErrCategory::Recovered);
    }

    #[test]
    fn detail_includes_sense_key() {
        let hdr = hdr_with(SCSI_STATUS_CHECK_CONDITION, 0, DRIVER_STATUS_SENSE);
        let sense = sense_with_key(0x03);
        assert!(status_detail(&hdr, &sense).ends_with("sense key 0x3"));
    }

    #[test]
    fn flags_follow_config() {
        let base = || {
            ConfigBuilder::new()
                .target(TargetSpec::fixed("/dev/sg0", 0))
        };
        let plain = base().build().unwrap();
        assert_eq!(command_flags(&plain), 0);

        let tail = base()
            .discipline(QueueDiscipline::AtTail)
            .build()
            .unwrap();
        assert_eq!(command_flags(&tail), SG_FLAG_Q_AT_TAIL);

        let head_direct = base()
            .discipline(QueueDiscipline::AtHead)
            .direct(true)
            .build()
            .unwrap();
        assert_eq!(command_flags(&head_direct), SG_FLAG_Q_AT_HEAD | SG_FLAG_DIRECT_IO);

        let no_xfer = base().no_transfer(true).build().unwrap();
        assert_eq!(command_flags(&no_xfer), SG_FLAG_NO_DXFER);
    }
}
