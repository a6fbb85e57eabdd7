// Role-dependent translation of "get/return a buffer" into virtqueue calls.
//
// Host:   TX buffers come from used buffers on the send queue or the pool and
//         are posted device-readable; RX buffers come back on the used ring.
// Remote: both directions borrow host-posted buffers off the available ring
//         and hand them back as consumed descriptors.
//
// Callers hold the transport mutex around every call.

use super::reclaimer::Reclaimer;
use super::Buffer::BufferControl;
use crate::error::{Result, RpmsgError};
use crate::Core::io::IoRegion;
use crate::Core::pool::SharedMemPool;
use crate::RPMsg::Structs::Rpmsg_Structs::RPMSG_HEADER_SIZE;
use crate::Virtio::device::Role;
use crate::Virtio::queue::{Virtqueue, VirtqueueError, VqBuf};
use std::sync::Arc;

pub(crate) struct BufferExchange {
    role: Role,
    rvq: Arc<dyn Virtqueue>,
    svq: Arc<dyn Virtqueue>,
    io: Arc<IoRegion>,
    /// Host TX buffer size (host-to-remote)
    h2r_buf_size: u32,
}

impl BufferExchange {
    pub(crate) fn new(
        role: Role,
        rvq: Arc<dyn Virtqueue>,
        svq: Arc<dyn Virtqueue>,
        io: Arc<IoRegion>,
        h2r_buf_size: u32,
    ) -> Self {
        Self {
            role,
            rvq,
            svq,
            io,
            h2r_buf_size,
        }
    }

    pub(crate) fn rvq(&self) -> &Arc<dyn Virtqueue> {
        &self.rvq
    }

    pub(crate) fn svq(&self) -> &Arc<dyn Virtqueue> {
        &self.svq
    }

    fn to_offset(&self, phys: u64, len: u32) -> Result<usize> {
        let offset = self.io.phys_to_offset(phys).ok_or(RpmsgError::OutOfRange {
            offset: phys as usize,
            len: len as usize,
        })?;
        // The whole buffer must lie inside the region.
        if offset + len as usize > self.io.size() {
            return Err(RpmsgError::OutOfRange {
                offset,
                len: len as usize,
            });
        }
        Ok(offset)
    }

    fn to_phys(&self, offset: usize) -> Result<u64> {
        self.io
            .offset_to_phys(offset)
            .ok_or(RpmsgError::OutOfRange { offset, len: 0 })
    }

    /// Next TX buffer: reclaimed first, then the role's own source.
    pub(crate) fn get_tx(
        &self,
        pool: Option<&mut SharedMemPool>,
        reclaimer: &mut Reclaimer,
    ) -> Result<Option<BufferControl>> {
        if let Some(ctrl) = reclaimer.acquire() {
            return Ok(Some(ctrl));
        }

        match self.role {
            Role::Host => {
                while let Some(used) = self.svq.get_buffer() {
                    match self.to_offset(used.cookie, self.h2r_buf_size) {
                        Ok(offset) => {
                            return Ok(Some(BufferControl {
                                idx: used.idx,
                                offset,
                                len: self.h2r_buf_size,
                            }))
                        }
                        // The descriptor is already free again; only the buffer is lost
                        Err(e) => tracing::warn!(idx = used.idx, error = %e, "dropping used TX buffer outside shared memory"),
                    }
                }
                // A fresh buffer is only useful if it can be posted.
                if self.svq.num_free() == 0 {
                    return Ok(None);
                }
                let Some(offset) = pool.and_then(|p| p.get_buffer(self.h2r_buf_size as usize)) else {
                    return Ok(None);
                };
                Ok(Some(BufferControl {
                    idx: 0,
                    offset,
                    len: self.h2r_buf_size,
                }))
            }
            Role::Remote => {
                while let Some(avail) = self.svq.get_available_buffer() {
                    match self.to_offset(avail.addr, avail.len) {
                        Ok(offset) => {
                            return Ok(Some(BufferControl {
                                idx: avail.idx,
                                offset,
                                len: avail.len,
                            }))
                        }
                        Err(e) => {
                            tracing::warn!(idx = avail.idx, error = %e, "returning TX descriptor outside shared memory");
                            self.svq.add_consumed_buffer(avail.idx, 0)?;
                            self.svq.kick();
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Next inbound buffer, invalidated and ready to parse.
    ///
    /// Descriptors that point outside the shared region, or that came back
    /// too short to hold a header, are handed back to the peer and skipped.
    pub(crate) fn get_rx(&self) -> Result<Option<BufferControl>> {
        loop {
            let ctrl = match self.role {
                Role::Host => {
                    let Some(used) = self.rvq.get_buffer() else {
                        return Ok(None);
                    };
                    let len = self.rvq.get_buffer_length(used.idx);
                    match self.to_offset(used.cookie, len) {
                        Ok(offset) if (used.len as usize) < RPMSG_HEADER_SIZE => {
                            tracing::warn!(idx = used.idx, len = used.len, "reposting short RX buffer");
                            self.return_rx(BufferControl { idx: used.idx, offset, len })?;
                            self.rvq.kick();
                            continue;
                        }
                        Ok(offset) => BufferControl {
                            idx: used.idx,
                            offset,
                            len,
                        },
                        Err(e) => {
                            tracing::warn!(idx = used.idx, error = %e, "dropping RX buffer outside shared memory");
                            continue;
                        }
                    }
                }
                Role::Remote => {
                    let Some(avail) = self.rvq.get_available_buffer() else {
                        return Ok(None);
                    };
                    match self.to_offset(avail.addr, avail.len) {
                        Ok(offset) => BufferControl {
                            idx: avail.idx,
                            offset,
                            len: avail.len,
                        },
                        Err(e) => {
                            tracing::warn!(idx = avail.idx, error = %e, "returning RX descriptor outside shared memory");
                            self.rvq.add_consumed_buffer(avail.idx, 0)?;
                            self.rvq.kick();
                            continue;
                        }
                    }
                }
            };
            self.io.invalidate(ctrl.offset, ctrl.len as usize);
            return Ok(Some(ctrl));
        }
    }

    /// Publish a filled TX buffer of `len` bytes (header included).
    ///
    /// Pool buffers handed out before any was posted can outnumber the
    /// descriptors. On a full queue the host parks one finished buffer in the
    /// reclaimer to free a descriptor; if none has come back yet the send
    /// fails with `NoBuffer`.
    pub(crate) fn enqueue_tx(&self, ctrl: BufferControl, len: u32, reclaimer: &mut Reclaimer) -> Result<()> {
        self.io.flush(ctrl.offset, len as usize);
        match self.role {
            Role::Host => {
                let phys = self.to_phys(ctrl.offset)?;
                let bufs = [VqBuf { addr: phys, len }];
                match self.svq.add_buffer(&bufs, 1, 0, phys) {
                    Ok(_) => {}
                    Err(VirtqueueError::Full) => {
                        let used = self.svq.get_buffer().ok_or(RpmsgError::NoBuffer)?;
                        match self.to_offset(used.cookie, self.h2r_buf_size) {
                            Ok(offset) => reclaimer.release(BufferControl {
                                idx: used.idx,
                                offset,
                                len: self.h2r_buf_size,
                            }),
                            Err(e) => tracing::warn!(idx = used.idx, error = %e, "dropping used TX buffer outside shared memory"),
                        }
                        self.svq.add_buffer(&bufs, 1, 0, phys).map_err(|e| match e {
                            VirtqueueError::Full => RpmsgError::NoBuffer,
                            e => e.into(),
                        })?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Role::Remote => self.svq.add_consumed_buffer(ctrl.idx, len)?,
        }
        Ok(())
    }

    /// Give an inbound buffer back so the peer can fill it again.
    pub(crate) fn return_rx(&self, ctrl: BufferControl) -> Result<()> {
        match self.role {
            Role::Host => {
                let phys = self.to_phys(ctrl.offset)?;
                self.rvq.add_buffer(&[VqBuf { addr: phys, len: ctrl.len }], 0, 1, phys)?;
            }
            Role::Remote => self.rvq.add_consumed_buffer(ctrl.idx, ctrl.len)?,
        }
        Ok(())
    }

    /// Return a held buffer. The remote still owns the descriptor, so its
    /// length is read back from the queue; the host freed its descriptor on
    /// receipt and relies on the recorded length.
    pub(crate) fn return_held_rx(&self, mut ctrl: BufferControl) -> Result<()> {
        if self.role == Role::Remote {
            ctrl.len = self.rvq.get_buffer_length(ctrl.idx);
        }
        self.return_rx(ctrl)
    }

    pub(crate) fn kick_tx(&self) {
        self.svq.kick();
    }

    pub(crate) fn kick_rx(&self) {
        self.rvq.kick();
    }
}
