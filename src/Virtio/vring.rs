//! In-process split virtqueue.
//!
//! A vring has three parts:
//!
//! 1. **Descriptor table**: buffer address/length entries plus a free chain
//! 2. **Available ring**: driver-to-device ring of descriptor chain heads
//! 3. **Used ring**: device-to-driver ring of completed chain heads
//!
//! Both sides hold a `VringHandle` to the same `VringShared`. A kick from one
//! side raises the other side's pending flag and rings its doorbell.

use super::queue::{AvailBuffer, UsedBuffer, VirtqueueError, VqBuf, VqCallback, Virtqueue};
use crate::Core::futex;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Descriptor flag: chain continues via `next`
pub const VRING_DESC_F_NEXT: u16 = 1;
/// Descriptor flag: device-writable buffer
pub const VRING_DESC_F_WRITE: u16 = 2;

/// Which side of the vring a handle acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Driver = 0,
    Device = 1,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Driver => Side::Device,
            Side::Device => Side::Driver,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VringDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[derive(Debug, Clone, Copy)]
struct VringUsedElem {
    id: u16,
    len: u32,
}

struct VringState {
    desc: Vec<VringDesc>,
    cookies: Vec<Option<u64>>,
    /// Heads the device took off the available ring and has not consumed yet
    device_owned: Vec<bool>,
    free_head: u16,
    num_free: u16,
    avail: VecDeque<u16>,
    used: VecDeque<VringUsedElem>,
}

/// Per-side notification words shared by every vring of one link.
pub(crate) struct Doorbells {
    words: [CachePadded<AtomicU32>; 2],
}

impl Doorbells {
    pub(crate) fn new() -> Self {
        Self {
            words: [
                CachePadded::new(AtomicU32::new(0)),
                CachePadded::new(AtomicU32::new(0)),
            ],
        }
    }

    pub(crate) fn ring(&self, side: Side) {
        let word = &self.words[side as usize];
        word.fetch_add(1, Ordering::Release);
        futex::futex_wake(word);
    }

    pub(crate) fn current(&self, side: Side) -> u32 {
        self.words[side as usize].load(Ordering::Acquire)
    }

    /// Park until the doorbell moves past `seen` or `timeout` passes.
    pub(crate) fn wait(&self, side: Side, seen: u32, timeout: Duration) {
        futex::futex_wait(&self.words[side as usize], seen, Some(timeout));
    }
}

pub(crate) struct VringShared {
    name: String,
    num_desc: u16,
    state: Mutex<VringState>,
    pending: [AtomicBool; 2],
    callbacks: [Mutex<Option<VqCallback>>; 2],
    cb_enabled: [AtomicBool; 2],
    doorbells: Arc<Doorbells>,
}

impl VringShared {
    pub(crate) fn new(name: &str, num_desc: u16, doorbells: Arc<Doorbells>) -> Arc<Self> {
        let n = num_desc as usize;
        // Free chain: each descriptor points at the next one
        let desc = (0..num_desc)
            .map(|i| VringDesc {
                next: if i + 1 < num_desc { i + 1 } else { 0 },
                ..VringDesc::default()
            })
            .collect();

        Arc::new(Self {
            name: name.to_owned(),
            num_desc,
            state: Mutex::new(VringState {
                desc,
                cookies: vec![None; n],
                device_owned: vec![false; n],
                free_head: 0,
                num_free: num_desc,
                avail: VecDeque::with_capacity(n),
                used: VecDeque::with_capacity(n),
            }),
            pending: [AtomicBool::new(false), AtomicBool::new(false)],
            callbacks: [Mutex::new(None), Mutex::new(None)],
            cb_enabled: [AtomicBool::new(true), AtomicBool::new(true)],
            doorbells,
        })
    }
}

/// One side's view of a vring.
pub struct VringHandle {
    shared: Arc<VringShared>,
    side: Side,
}

impl VringHandle {
    pub(crate) fn new(shared: Arc<VringShared>, side: Side) -> Self {
        Self { shared, side }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Consume this side's pending notification, if any.
    pub fn take_pending(&self) -> bool {
        self.shared.pending[self.side as usize].swap(false, Ordering::AcqRel)
    }

    /// Whether the peer kicked this side since the last `take_pending`.
    pub fn is_pending(&self) -> bool {
        self.shared.pending[self.side as usize].load(Ordering::Acquire)
    }

    /// Heads waiting on the available ring.
    pub fn avail_len(&self) -> usize {
        self.shared.state.lock().avail.len()
    }

    /// Heads waiting on the used ring.
    pub fn used_len(&self) -> usize {
        self.shared.state.lock().used.len()
    }
}

impl Virtqueue for VringHandle {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn num_desc(&self) -> u16 {
        self.shared.num_desc
    }

    fn num_free(&self) -> u16 {
        self.shared.state.lock().num_free
    }

    fn add_buffer(
        &self,
        bufs: &[VqBuf],
        readable: usize,
        writable: usize,
        cookie: u64,
    ) -> Result<u16, VirtqueueError> {
        if bufs.is_empty() || readable + writable != bufs.len() {
            return Err(VirtqueueError::EmptyChain);
        }
        let mut st = self.shared.state.lock();
        if (st.num_free as usize) < bufs.len() {
            return Err(VirtqueueError::Full);
        }

        let head = st.free_head;
        let mut cur = head;
        for (i, buf) in bufs.iter().enumerate() {
            let d = &mut st.desc[cur as usize];
            d.addr = buf.addr;
            d.len = buf.len;
            d.flags = 0;
            if i >= readable {
                d.flags |= VRING_DESC_F_WRITE;
            }
            if i + 1 < bufs.len() {
                d.flags |= VRING_DESC_F_NEXT;
            }
            // The free chain already links to the next descriptor we take.
            cur = d.next;
        }
        st.free_head = cur;
        st.num_free -= bufs.len() as u16;
        st.cookies[head as usize] = Some(cookie);
        st.avail.push_back(head);
        Ok(head)
    }

    fn get_buffer(&self) -> Option<UsedBuffer> {
        let mut st = self.shared.state.lock();
        let elem = st.used.pop_front()?;
        let cookie = st.cookies[elem.id as usize].take();

        // Return the chain to the free list
        let mut tail = elem.id;
        let mut count = 1u16;
        while st.desc[tail as usize].flags & VRING_DESC_F_NEXT != 0 {
            tail = st.desc[tail as usize].next;
            count += 1;
        }
        let free_head = st.free_head;
        st.desc[tail as usize].next = free_head;
        st.free_head = elem.id;
        st.num_free += count;

        match cookie {
            Some(cookie) => Some(UsedBuffer {
                cookie,
                len: elem.len,
                idx: elem.id,
            }),
            None => {
                tracing::error!(vq = %self.shared.name, idx = elem.id, "used descriptor without cookie");
                None
            }
        }
    }

    fn get_available_buffer(&self) -> Option<AvailBuffer> {
        let mut st = self.shared.state.lock();
        let head = st.avail.pop_front()?;
        st.device_owned[head as usize] = true;
        let d = st.desc[head as usize];
        Some(AvailBuffer {
            addr: d.addr,
            len: d.len,
            idx: head,
        })
    }

    fn add_consumed_buffer(&self, idx: u16, len: u32) -> Result<(), VirtqueueError> {
        if idx >= self.shared.num_desc {
            return Err(VirtqueueError::InvalidIndex(idx));
        }
        let mut st = self.shared.state.lock();
        if !st.device_owned[idx as usize] {
            return Err(VirtqueueError::NotOwned(idx));
        }
        st.device_owned[idx as usize] = false;
        st.used.push_back(VringUsedElem { id: idx, len });
        Ok(())
    }

    fn get_buffer_length(&self, idx: u16) -> u32 {
        let st = self.shared.state.lock();
        st.desc.get(idx as usize).map_or(0, |d| d.len)
    }

    fn get_desc_size(&self) -> u32 {
        let st = self.shared.state.lock();
        st.avail
            .front()
            .map_or(0, |&head| st.desc[head as usize].len)
    }

    fn kick(&self) {
        let peer = self.side.peer();
        self.shared.pending[peer as usize].store(true, Ordering::Release);
        self.shared.doorbells.ring(peer);
    }

    fn set_callback(&self, cb: Option<VqCallback>) {
        *self.shared.callbacks[self.side as usize].lock() = cb;
    }

    fn enable_cb(&self) {
        self.shared.cb_enabled[self.side as usize].store(true, Ordering::Release);
    }

    fn disable_cb(&self) {
        self.shared.cb_enabled[self.side as usize].store(false, Ordering::Release);
    }

    fn trigger_callback(&self) {
        if !self.shared.cb_enabled[self.side as usize].load(Ordering::Acquire) {
            return;
        }
        let cb = self.shared.callbacks[self.side as usize].lock().clone();
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl fmt::Debug for VringHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VringHandle")
            .field("name", &self.shared.name)
            .field("side", &self.side)
            .field("num_desc", &self.shared.num_desc)
            .field("num_free", &self.num_free())
            .finish()
    }
}
