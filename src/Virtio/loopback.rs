//! Two virtio devices wired back to back inside one process.
//!
//! `LoopbackLink` owns what a real platform keeps in the resource table and
//! the vring carve-out: the status byte, the feature words and two vrings.
//! The host end acts as the virtio driver, the remote end as the device.

use super::device::{Role, VirtioDevice};
use super::queue::Virtqueue;
use super::vring::{Doorbells, Side, VringHandle, VringShared};
use crate::error::{Result, RpmsgError};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of vrings an RPMsg link uses.
pub const LOOPBACK_NUM_VRINGS: usize = 2;

struct LinkShared {
    status: CachePadded<AtomicU8>,
    device_features: AtomicU32,
    driver_features: AtomicU32,
    vrings: [Arc<VringShared>; LOOPBACK_NUM_VRINGS],
    doorbells: Arc<Doorbells>,
}

/// Factory for a connected host/remote device pair.
#[derive(Clone)]
pub struct LoopbackLink {
    shared: Arc<LinkShared>,
}

impl LoopbackLink {
    /// `num_desc` descriptors per vring; `device_features` is what the remote offers.
    pub fn new(num_desc: u16, device_features: u32) -> Self {
        let doorbells = Arc::new(Doorbells::new());
        Self {
            shared: Arc::new(LinkShared {
                status: CachePadded::new(AtomicU8::new(0)),
                device_features: AtomicU32::new(device_features),
                driver_features: AtomicU32::new(0),
                vrings: [
                    VringShared::new("vring0", num_desc, doorbells.clone()),
                    VringShared::new("vring1", num_desc, doorbells.clone()),
                ],
                doorbells,
            }),
        }
    }

    pub fn host(&self) -> Arc<LoopbackDevice> {
        Arc::new(LoopbackDevice::new(self.shared.clone(), Role::Host))
    }

    pub fn remote(&self) -> Arc<LoopbackDevice> {
        Arc::new(LoopbackDevice::new(self.shared.clone(), Role::Remote))
    }

    pub fn status(&self) -> u8 {
        self.shared.status.load(Ordering::Acquire)
    }

    /// Clear status and negotiated features, as a device reset would.
    pub fn reset(&self) {
        self.shared.status.store(0, Ordering::Release);
        self.shared.driver_features.store(0, Ordering::Release);
    }
}

/// One end of a `LoopbackLink`.
pub struct LoopbackDevice {
    link: Arc<LinkShared>,
    role: Role,
    queues: Mutex<Vec<Arc<VringHandle>>>,
}

impl LoopbackDevice {
    fn new(link: Arc<LinkShared>, role: Role) -> Self {
        Self {
            link,
            role,
            queues: Mutex::new(Vec::new()),
        }
    }

    fn side(&self) -> Side {
        match self.role {
            Role::Host => Side::Driver,
            Role::Remote => Side::Device,
        }
    }

    /// Deliver pending peer notifications by running the queue callbacks.
    /// Returns how many queues were serviced.
    pub fn poll(&self) -> usize {
        let queues = self.queues.lock().clone();
        let mut serviced = 0;
        for q in queues {
            if q.take_pending() {
                q.trigger_callback();
                serviced += 1;
            }
        }
        serviced
    }

    /// Block until the peer kicks one of this end's queues or `timeout` passes.
    pub fn wait_for_kick(&self, timeout: Duration) -> bool {
        let side = self.side();
        let seen = self.link.doorbells.current(side);
        if self.has_pending() {
            return true;
        }
        self.link.doorbells.wait(side, seen, timeout);
        self.has_pending()
    }

    fn has_pending(&self) -> bool {
        self.queues.lock().iter().any(|q| q.is_pending())
    }

    /// Handles created so far, in creation order.
    pub fn queues(&self) -> Vec<Arc<VringHandle>> {
        self.queues.lock().clone()
    }
}

impl VirtioDevice for LoopbackDevice {
    fn role(&self) -> Role {
        self.role
    }

    fn get_status(&self) -> u8 {
        self.link.status.load(Ordering::Acquire)
    }

    fn set_status(&self, status: u8) {
        self.link.status.store(status, Ordering::Release);
    }

    fn get_features(&self) -> u32 {
        let offered = self.link.device_features.load(Ordering::Acquire);
        match self.role {
            Role::Host => offered,
            Role::Remote => offered & self.link.driver_features.load(Ordering::Acquire),
        }
    }

    fn set_features(&self, features: u32) {
        match self.role {
            Role::Host => self.link.driver_features.store(features, Ordering::Release),
            Role::Remote => self.link.device_features.store(features, Ordering::Release),
        }
    }

    fn create_virtqueues(&self, names: &[&str]) -> Result<Vec<Arc<dyn Virtqueue>>> {
        if names.len() > LOOPBACK_NUM_VRINGS {
            return Err(RpmsgError::Init(format!(
                "{} virtqueues requested, link provides {}",
                names.len(),
                LOOPBACK_NUM_VRINGS
            )));
        }
        tracing::debug!(role = ?self.role, ?names, "creating virtqueues");

        let side = self.side();
        let mut queues = self.queues.lock();
        queues.clear();
        let mut out: Vec<Arc<dyn Virtqueue>> = Vec::with_capacity(names.len());
        for vring in self.link.vrings.iter().take(names.len()) {
            let handle = Arc::new(VringHandle::new(vring.clone(), side));
            queues.push(handle.clone());
            out.push(handle);
        }
        Ok(out)
    }
}

impl fmt::Debug for LoopbackDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackDevice")
            .field("role", &self.role)
            .field("status", &format_args!("{:#04x}", self.get_status()))
            .field("features", &format_args!("{:#x}", self.get_features()))
            .finish_non_exhaustive()
    }
}
