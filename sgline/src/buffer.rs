//! Pool of page-aligned transfer buffers.
//!
//! Each worker owns one pool. A buffer is acquired at submission, lent to
//! the kernel for the life of the command, and released when the matching
//! completion is harvested. The pool starts empty and grows on demand;
//! released buffers are handed out most-recent-first, so steady state runs
//! entirely on recycled memory and the number of allocations is bounded by
//! the queue depth. Buffer addresses are stable for the pool's lifetime.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::AllocError;

struct AlignedBuf {
    ptr: NonNull<u8>,
}

/// Growable pool of fixed-size, page-aligned buffers.
pub struct BufferPool {
    transfer_len: u32,
    layout: Layout,
    buffers: Vec<AlignedBuf>,
    free_list: Vec<u16>,
    in_use: Vec<bool>, // double-release protection
}

// Safety: the buffers are uniquely owned heap allocations; the pool is only
// ever used from the thread that owns it.
unsafe impl Send for BufferPool {}

impl BufferPool {
    /// Create an empty pool whose buffers each hold one transfer of
    /// `transfer_len` bytes. Every buffer starts on a page boundary and
    /// spans at least a page, as direct transfers require.
    pub fn new(transfer_len: u32) -> Result<Self, AllocError> {
        let page = page_size();
        let size = (transfer_len as usize).max(page);
        let layout =
            Layout::from_size_align(size, page).map_err(|_| AllocError { bytes: size })?;
        Ok(BufferPool {
            transfer_len,
            layout,
            buffers: Vec::new(),
            free_list: Vec::new(),
            in_use: Vec::new(),
        })
    }

    /// Acquire a buffer and return (slot_index, ptr, transfer_len).
    ///
    /// Hands back the most recently released buffer when one is free,
    /// otherwise allocates a fresh zeroed block. Recycled buffers keep
    /// whatever the last command left in them.
    pub fn acquire(&mut self) -> Result<(u16, *mut u8, u32), AllocError> {
        if let Some(idx) = self.free_list.pop() {
            self.in_use[idx as usize] = true;
            return Ok((idx, self.buffers[idx as usize].ptr.as_ptr(), self.transfer_len));
        }
        // Safety: layout has non-zero size and power-of-two alignment.
        let raw = unsafe { alloc_zeroed(self.layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError {
            bytes: self.layout.size(),
        })?;
        debug_assert!(self.buffers.len() < u16::MAX as usize);
        let idx = self.buffers.len() as u16;
        self.buffers.push(AlignedBuf { ptr });
        self.in_use.push(true);
        Ok((idx, ptr.as_ptr(), self.transfer_len))
    }

    /// Release a buffer back to the pool (called when its completion is
    /// harvested). The most recently released buffer is handed out next.
    pub fn release(&mut self, idx: u16) {
        debug_assert!((idx as usize) < self.buffers.len());
        if (idx as usize) >= self.in_use.len() || !self.in_use[idx as usize] {
            return; // unknown or already released
        }
        self.in_use[idx as usize] = false;
        self.free_list.push(idx);
    }

    /// Bytes moved per command.
    pub fn transfer_len(&self) -> u32 {
        self.transfer_len
    }

    /// Number of buffers allocated so far (the in-flight high-water mark).
    pub fn allocated(&self) -> usize {
        self.buffers.len()
    }

    /// Total buffer bytes allocated so far.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers.len() * self.layout.size()
    }

    /// Number of buffers sitting in the free list.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        for buf in &self.buffers {
            // Safety: each ptr came from alloc_zeroed with this exact
            // layout and is freed exactly once.
            unsafe { dealloc(buf.ptr.as_ptr(), self.layout) }
        }
    }
}

fn page_size() -> usize {
    // Safety: sysconf(_SC_PAGESIZE) has no preconditions.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as usize
    }
}
