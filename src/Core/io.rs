// I/O accessor for the shared region. Every read or write of buffer contents
// goes through here; callers only ever hold offsets or physical addresses.

use crate::error::{Result, RpmsgError};
use crate::Core::SharedMemory::SharedMemoryBackend;
use std::ptr;
use std::sync::atomic::{fence, Ordering};

/// A mapped shared-memory region plus the physical address the peer uses for it.
pub struct IoRegion {
    shm: Box<dyn SharedMemoryBackend>,
    phys_base: u64,
}

// All access is bounds-checked copies; ownership of individual buffers is
// arbitrated by the virtqueues and the transport mutex.
unsafe impl Send for IoRegion {}
unsafe impl Sync for IoRegion {}

impl IoRegion {
    pub fn new(shm: Box<dyn SharedMemoryBackend>, phys_base: u64) -> Self {
        Self { shm, phys_base }
    }

    pub fn size(&self) -> usize {
        self.shm.size()
    }

    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    pub(crate) fn backend(&self) -> &dyn SharedMemoryBackend {
        &*self.shm
    }

    pub fn offset_to_phys(&self, offset: usize) -> Option<u64> {
        (offset < self.size()).then(|| self.phys_base + offset as u64)
    }

    pub fn phys_to_offset(&self, phys: u64) -> Option<usize> {
        let offset = phys.checked_sub(self.phys_base)?;
        usize::try_from(offset).ok().filter(|&o| o < self.size())
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(RpmsgError::OutOfRange { offset, len }),
        }
    }

    /// Copy `dst.len()` bytes out of the region starting at `offset`.
    pub fn block_read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        // SAFETY: range checked above; the region outlives self.
        unsafe {
            ptr::copy_nonoverlapping(self.shm.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn block_write(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        // SAFETY: range checked above; the region outlives self.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.shm.as_ptr().add(offset), src.len());
        }
        Ok(())
    }

    /// Fill `len` bytes at `offset` with `value`.
    pub fn block_set(&self, offset: usize, value: u8, len: usize) -> Result<()> {
        self.check(offset, len)?;
        // SAFETY: range checked above.
        unsafe {
            ptr::write_bytes(self.shm.as_ptr().add(offset), value, len);
        }
        Ok(())
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.block_read(offset, &mut out)?;
        Ok(out)
    }

    /// Make writes to `[offset, offset + len)` visible to the peer before the
    /// next notification is issued.
    pub fn flush(&self, offset: usize, len: usize) {
        tracing::trace!(offset, len, "cache flush");
        fence(Ordering::Release);
    }

    /// Discard stale views of `[offset, offset + len)` before reading data the
    /// peer produced.
    pub fn invalidate(&self, offset: usize, len: usize) {
        tracing::trace!(offset, len, "cache invalidate");
        fence(Ordering::Acquire);
    }
}
