//! Virtqueue interface consumed by the RPMsg transport.

use std::fmt::Debug;
use std::sync::Arc;

/// One scatter-gather element handed to `add_buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VqBuf {
    /// Physical address as the peer sees it
    pub addr: u64,
    pub len: u32,
}

/// A buffer the device returned to the driver (used ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedBuffer {
    /// Cookie the driver attached when it added the buffer
    pub cookie: u64,
    /// Bytes the device reported as consumed
    pub len: u32,
    /// Head descriptor index
    pub idx: u16,
}

/// A buffer the driver made available to the device (available ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailBuffer {
    pub addr: u64,
    pub len: u32,
    pub idx: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VirtqueueError {
    #[error("Not enough free descriptors")]
    Full,
    #[error("Descriptor index {0} out of range")]
    InvalidIndex(u16),
    #[error("Empty or inconsistent buffer chain")]
    EmptyChain,
    #[error("Descriptor {0} is not owned by the device")]
    NotOwned(u16),
}

/// Notification callback, run when the peer kicked this queue.
pub type VqCallback = Arc<dyn Fn() + Send + Sync>;

/// Split-virtqueue operations from both the driver and the device perspective.
///
/// Implementations synchronise internally; the transport additionally
/// serialises its own calls under the device mutex.
pub trait Virtqueue: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn num_desc(&self) -> u16;

    /// Descriptors not currently posted.
    fn num_free(&self) -> u16;

    /// Driver: post a chain of `readable` device-readable followed by
    /// `writable` device-writable buffers.
    fn add_buffer(
        &self,
        bufs: &[VqBuf],
        readable: usize,
        writable: usize,
        cookie: u64,
    ) -> Result<u16, VirtqueueError>;

    /// Driver: reclaim the next buffer the device finished with.
    fn get_buffer(&self) -> Option<UsedBuffer>;

    /// Device: take the next buffer the driver posted.
    fn get_available_buffer(&self) -> Option<AvailBuffer>;

    /// Device: hand descriptor `idx` back to the driver with `len` bytes used.
    fn add_consumed_buffer(&self, idx: u16, len: u32) -> Result<(), VirtqueueError>;

    /// Length recorded in descriptor `idx`.
    fn get_buffer_length(&self, idx: u16) -> u32;

    /// Length of the next available descriptor, 0 if none is pending.
    fn get_desc_size(&self) -> u32;

    /// Notify the peer that this side produced work.
    fn kick(&self);

    fn set_callback(&self, cb: Option<VqCallback>);

    fn enable_cb(&self);

    fn disable_cb(&self);

    /// Entry point for the interrupt handler or poll loop: run the registered
    /// callback unless it has been disabled.
    fn trigger_callback(&self);
}
