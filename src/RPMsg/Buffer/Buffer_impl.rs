use super::Buffer::{BufferControl, HeldRxBuffer, RxBuffer, TxBuffer};
use crate::error::{Result, RpmsgError};
use crate::Core::io::IoRegion;
use crate::RPMsg::Structs::Rpmsg_Structs::{RpmsgHeader, RPMSG_HEADER_SIZE};
use std::cell::Cell;
use std::sync::Arc;

impl BufferControl {
    /// Offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + RPMSG_HEADER_SIZE
    }
}

/// Copy `dst.len()` bytes (at most `payload_len - at`) from a payload.
fn read_payload(io: &IoRegion, ctrl: &BufferControl, payload_len: usize, at: usize, dst: &mut [u8]) -> Result<usize> {
    if at > payload_len {
        return Err(RpmsgError::Param("read offset past end of payload"));
    }
    let n = dst.len().min(payload_len - at);
    io.block_read(ctrl.payload_offset() + at, &mut dst[..n])?;
    Ok(n)
}

impl TxBuffer {
    pub(crate) fn new(io: Arc<IoRegion>, ctrl: BufferControl, capacity: usize) -> Self {
        Self { io, ctrl, capacity }
    }

    /// Usable payload bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idx(&self) -> u16 {
        self.ctrl.idx
    }

    /// Offset of the buffer's header in the shared region.
    pub fn offset(&self) -> usize {
        self.ctrl.offset
    }

    /// Write `data` at payload offset `at`. Fails rather than truncating.
    pub fn write(&mut self, at: usize, data: &[u8]) -> Result<()> {
        match at.checked_add(data.len()) {
            Some(end) if end <= self.capacity => self.io.block_write(self.ctrl.payload_offset() + at, data),
            _ => Err(RpmsgError::BufferSize {
                len: at.saturating_add(data.len()),
                capacity: self.capacity,
            }),
        }
    }

    /// Read back what was written so far.
    pub fn read(&self, at: usize, dst: &mut [u8]) -> Result<usize> {
        read_payload(&self.io, &self.ctrl, self.capacity, at, dst)
    }

    pub(crate) fn into_control(self) -> BufferControl {
        self.ctrl
    }
}

impl RxBuffer {
    pub(crate) fn new(io: Arc<IoRegion>, header: RpmsgHeader, ctrl: BufferControl, payload_len: usize) -> Self {
        Self {
            io,
            header,
            ctrl,
            payload_len,
            held: Cell::new(false),
        }
    }

    pub fn src(&self) -> u32 {
        self.header.src
    }

    pub fn dst(&self) -> u32 {
        self.header.dst
    }

    pub fn len(&self) -> usize {
        self.payload_len
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }

    pub fn idx(&self) -> u16 {
        self.ctrl.idx
    }

    pub fn header(&self) -> RpmsgHeader {
        self.header
    }

    pub fn read(&self, at: usize, dst: &mut [u8]) -> Result<usize> {
        read_payload(&self.io, &self.ctrl, self.payload_len, at, dst)
    }

    /// Copy the whole payload out of shared memory.
    pub fn payload(&self) -> Result<Vec<u8>> {
        self.io.read_bytes(self.ctrl.payload_offset(), self.payload_len)
    }

    /// Keep the buffer after the callback returns. Only the first call
    /// yields a handle.
    pub fn hold(&self) -> Option<HeldRxBuffer> {
        if self.held.replace(true) {
            return None;
        }
        Some(HeldRxBuffer {
            io: self.io.clone(),
            header: self.header,
            ctrl: self.ctrl,
            payload_len: self.payload_len,
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.get()
    }
}

impl HeldRxBuffer {
    pub fn src(&self) -> u32 {
        self.header.src
    }

    pub fn dst(&self) -> u32 {
        self.header.dst
    }

    pub fn len(&self) -> usize {
        self.payload_len
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }

    pub fn idx(&self) -> u16 {
        self.ctrl.idx
    }

    pub fn read(&self, at: usize, dst: &mut [u8]) -> Result<usize> {
        read_payload(&self.io, &self.ctrl, self.payload_len, at, dst)
    }

    pub fn payload(&self) -> Result<Vec<u8>> {
        self.io.read_bytes(self.ctrl.payload_offset(), self.payload_len)
    }

    pub(crate) fn into_control(self) -> BufferControl {
        self.ctrl
    }
}
