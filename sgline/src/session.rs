//! Device session abstraction.
//!
//! The dispatcher drives any [`DeviceSession`]: the production
//! implementation wraps an sg character device ([`crate::sg::SgSession`]),
//! and tests script one in memory. The contract is deliberately narrow:
//! tagged asynchronous submit, a count of ready completions, and a
//! non-blocking read of one completion.

use crate::correlation::CorrelationId;
use crate::error::SessionError;
use protocol_scsi::Cdb;

/// Which way a command moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    FromDevice,
    ToDevice,
}

/// Buffer lent to the driver for one command.
#[derive(Debug, Clone, Copy)]
pub struct DataTransfer {
    pub direction: DataDirection,
    pub ptr: *mut u8,
    pub len: u32,
}

impl DataTransfer {
    /// Device-to-host transfer landing in `ptr..ptr+len`.
    pub fn from_device(ptr: *mut u8, len: u32) -> Self {
        DataTransfer {
            direction: DataDirection::FromDevice,
            ptr,
            len,
        }
    }

    /// Host-to-device transfer sourced from `ptr..ptr+len`.
    pub fn to_device(ptr: *mut u8, len: u32) -> Self {
        DataTransfer {
            direction: DataDirection::ToDevice,
            ptr,
            len,
        }
    }
}

/// How one command finished, as judged from driver and device status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Clean completion.
    Good,
    /// The device reported a recovered condition; the data is good.
    Recovered,
    /// Fatal device or transport error.
    Failed { detail: String },
}

/// One asynchronous command queue against a device.
///
/// Implementations report back-pressure through [`SessionError`]:
/// `ResourceExhausted` from [`submit`](DeviceSession::submit) means the
/// driver is transiently out of resources and the submission may be
/// retried; `NotReady` from
/// [`read_completion`](DeviceSession::read_completion) means nothing has
/// completed yet. Both leave the session usable. Any `Io` error is fatal
/// to the session.
pub trait DeviceSession {
    /// Queue one command tagged with `id`.
    ///
    /// # Safety
    ///
    /// If `transfer` is `Some`, its buffer must stay valid and untouched
    /// until the completion carrying `id` has been read back.
    unsafe fn submit(
        &mut self,
        cdb: &Cdb,
        id: CorrelationId,
        transfer: Option<DataTransfer>,
    ) -> Result<(), SessionError>;

    /// Number of completions ready to be read without blocking.
    fn completions_available(&mut self) -> Result<u32, SessionError>;

    /// Read one completion. Returns `Err(SessionError::NotReady)` when none
    /// has arrived yet.
    fn read_completion(&mut self) -> Result<(CorrelationId, CompletionStatus), SessionError>;

    /// Release the underlying device handle. Dropping the session does the
    /// same; this marks the teardown point in dispatch code.
    fn close(self)
    where
        Self: Sized,
    {
    }
}
