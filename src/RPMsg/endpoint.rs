//! Endpoints: addressable message sinks bound to one transport.
//!
//! The transport's registry shares ownership of each endpoint with the
//! application. Registry mutations and lookups happen under the transport
//! mutex, so a lookup never sees a half-updated list.

use super::transport::RpmsgVirtioDevice;
use super::Buffer::{HeldRxBuffer, RxBuffer, TxBuffer};
use super::Structs::Rpmsg_Structs::{
    NsFlags, RPMSG_ADDR_ANY, RPMSG_ADDR_BMP_SIZE, RPMSG_NAME_SIZE, RPMSG_RESERVED_ADDRESSES,
};
use crate::error::{Result, RpmsgError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Receive callback. An `Err` is logged and counted, never propagated.
pub type EndpointCallback = Arc<dyn Fn(&Endpoint, &RxBuffer) -> Result<()> + Send + Sync>;

/// Called when the peer announces that the endpoint this one was bound to is gone.
pub type EndpointUnbindCallback = Arc<dyn Fn(&Endpoint) + Send + Sync>;

struct EndpointInner {
    name: String,
    addr: AtomicU32,
    dest_addr: AtomicU32,
    cb: Mutex<Option<EndpointCallback>>,
    ns_unbind_cb: Mutex<Option<EndpointUnbindCallback>>,
    rdev: Mutex<Weak<RpmsgVirtioDevice>>,
}

/// Handle to an endpoint. Clones refer to the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

/// Cut `name` to the wire width without splitting a character.
fn truncate_name(name: &str) -> String {
    if name.len() <= RPMSG_NAME_SIZE {
        return name.to_owned();
    }
    let mut end = RPMSG_NAME_SIZE;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

impl Endpoint {
    /// An unregistered endpoint; pass it to `RpmsgVirtioDevice::register_endpoint`.
    pub fn new(
        name: &str,
        src: u32,
        dest: u32,
        cb: EndpointCallback,
        ns_unbind_cb: Option<EndpointUnbindCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                name: truncate_name(name),
                addr: AtomicU32::new(src),
                dest_addr: AtomicU32::new(dest),
                cb: Mutex::new(Some(cb)),
                ns_unbind_cb: Mutex::new(ns_unbind_cb),
                rdev: Mutex::new(Weak::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn addr(&self) -> u32 {
        self.inner.addr.load(Ordering::Acquire)
    }

    pub fn dest_addr(&self) -> u32 {
        self.inner.dest_addr.load(Ordering::Acquire)
    }

    pub fn set_dest_addr(&self, dest: u32) {
        self.inner.dest_addr.store(dest, Ordering::Release);
    }

    /// Both ends known: the endpoint can `send`.
    pub fn is_ready(&self) -> bool {
        self.addr() != RPMSG_ADDR_ANY && self.dest_addr() != RPMSG_ADDR_ANY
    }

    /// The transport this endpoint is registered with, if any.
    pub fn device(&self) -> Option<Arc<RpmsgVirtioDevice>> {
        self.inner.rdev.lock().upgrade()
    }

    pub fn same_as(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn rdev(&self) -> Result<Arc<RpmsgVirtioDevice>> {
        self.device()
            .ok_or(RpmsgError::Param("endpoint is not registered"))
    }

    /// Resolve the destination on first contact. Returns whether it changed.
    pub(crate) fn bind_if_unresolved(&self, src: u32) -> bool {
        self.inner
            .dest_addr
            .compare_exchange(RPMSG_ADDR_ANY, src, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn callback(&self) -> Option<EndpointCallback> {
        self.inner.cb.lock().clone()
    }

    pub(crate) fn ns_unbind_callback(&self) -> Option<EndpointUnbindCallback> {
        self.inner.ns_unbind_cb.lock().clone()
    }

    pub(crate) fn attach(&self, rdev: Weak<RpmsgVirtioDevice>) {
        *self.inner.rdev.lock() = rdev;
    }

    /// Clear everything an unregistered endpoint must not keep.
    pub(crate) fn reset(&self) {
        self.inner.addr.store(RPMSG_ADDR_ANY, Ordering::Release);
        self.inner.dest_addr.store(RPMSG_ADDR_ANY, Ordering::Release);
        *self.inner.cb.lock() = None;
        *self.inner.ns_unbind_cb.lock() = None;
        *self.inner.rdev.lock() = Weak::new();
    }

    /// Send to the bound destination, waiting for a buffer if needed.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let dest = self.dest_addr();
        if dest == RPMSG_ADDR_ANY {
            return Err(RpmsgError::Addr(dest));
        }
        self.rdev()?.send_offchannel_raw(self.addr(), dest, data, true)
    }

    /// Like `send`, but fail with `NoBuffer` instead of waiting.
    pub fn try_send(&self, data: &[u8]) -> Result<usize> {
        let dest = self.dest_addr();
        if dest == RPMSG_ADDR_ANY {
            return Err(RpmsgError::Addr(dest));
        }
        self.rdev()?.send_offchannel_raw(self.addr(), dest, data, false)
    }

    pub fn send_to(&self, data: &[u8], dst: u32) -> Result<usize> {
        self.rdev()?.send_offchannel_raw(self.addr(), dst, data, true)
    }

    pub fn try_send_to(&self, data: &[u8], dst: u32) -> Result<usize> {
        self.rdev()?.send_offchannel_raw(self.addr(), dst, data, false)
    }

    /// Send with an explicit source address.
    pub fn send_offchannel(&self, src: u32, dst: u32, data: &[u8]) -> Result<usize> {
        self.rdev()?.send_offchannel_raw(src, dst, data, true)
    }

    pub fn try_send_offchannel(&self, src: u32, dst: u32, data: &[u8]) -> Result<usize> {
        self.rdev()?.send_offchannel_raw(src, dst, data, false)
    }

    pub fn get_tx_payload_buffer(&self, wait: bool) -> Result<TxBuffer> {
        self.rdev()?.get_tx_payload_buffer(wait)
    }

    /// Send `len` bytes already written into `tx` to the bound destination.
    pub fn send_nocopy(&self, tx: TxBuffer, len: usize) -> Result<usize> {
        let rdev = self.rdev()?;
        let dest = self.dest_addr();
        if dest == RPMSG_ADDR_ANY {
            rdev.release_tx_buffer(tx);
            return Err(RpmsgError::Addr(dest));
        }
        rdev.send_offchannel_nocopy(self.addr(), dest, tx, len)
    }

    pub fn send_to_nocopy(&self, tx: TxBuffer, len: usize, dst: u32) -> Result<usize> {
        self.rdev()?.send_offchannel_nocopy(self.addr(), dst, tx, len)
    }

    pub fn send_offchannel_nocopy(&self, src: u32, dst: u32, tx: TxBuffer, len: usize) -> Result<usize> {
        self.rdev()?.send_offchannel_nocopy(src, dst, tx, len)
    }

    pub fn release_tx_buffer(&self, tx: TxBuffer) -> Result<()> {
        self.rdev()?.release_tx_buffer(tx);
        Ok(())
    }

    pub fn hold_rx_buffer(&self, rx: &RxBuffer) -> Option<HeldRxBuffer> {
        rx.hold()
    }

    pub fn release_rx_buffer(&self, held: HeldRxBuffer) -> Result<()> {
        self.rdev()?.release_rx_buffer(held)
    }
}

/// Endpoint list plus the allocator for dynamic addresses.
#[derive(Default)]
pub(crate) struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    /// Bit n set: address `RPMSG_RESERVED_ADDRESSES + n` is taken
    bitmap: u128,
}

impl EndpointRegistry {
    pub(crate) fn insert(&mut self, ept: Endpoint) {
        self.endpoints.push(ept);
    }

    pub(crate) fn remove(&mut self, ept: &Endpoint) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|e| !e.same_as(ept));
        self.endpoints.len() != before
    }

    pub(crate) fn contains(&self, ept: &Endpoint) -> bool {
        self.endpoints.iter().any(|e| e.same_as(ept))
    }

    pub(crate) fn by_addr(&self, addr: u32) -> Option<Endpoint> {
        self.endpoints.iter().find(|e| e.addr() == addr).cloned()
    }

    /// Find-or-match used by name service and applications.
    ///
    /// In order: exact local address; local/remote address pair; same name
    /// with the given known destination; same name still unbound.
    pub(crate) fn lookup(&self, name: Option<&str>, addr: u32, dest: u32) -> Option<Endpoint> {
        let name = name.map(truncate_name);
        for ept in &self.endpoints {
            if addr != RPMSG_ADDR_ANY && ept.addr() == addr {
                return Some(ept.clone());
            }
            if addr == ept.addr() && dest == ept.dest_addr() {
                return Some(ept.clone());
            }
            let name_match = name.as_deref().is_some_and(|n| n == ept.name());
            if !name_match {
                continue;
            }
            if dest != RPMSG_ADDR_ANY && ept.dest_addr() == dest {
                return Some(ept.clone());
            }
            if addr == RPMSG_ADDR_ANY && ept.dest_addr() == RPMSG_ADDR_ANY {
                return Some(ept.clone());
            }
        }
        None
    }

    pub(crate) fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Lowest free dynamic address.
    pub(crate) fn allocate_address(&mut self) -> Option<u32> {
        let bit = (!self.bitmap).trailing_zeros();
        if bit >= RPMSG_ADDR_BMP_SIZE {
            return None;
        }
        self.bitmap |= 1u128 << bit;
        Some(RPMSG_RESERVED_ADDRESSES + bit)
    }

    /// Claim an explicit address. Addresses below the dynamic range are not tracked.
    pub(crate) fn reserve_address(&mut self, addr: u32) -> Result<()> {
        if addr < RPMSG_RESERVED_ADDRESSES {
            return Ok(());
        }
        let bit = addr - RPMSG_RESERVED_ADDRESSES;
        if bit >= RPMSG_ADDR_BMP_SIZE {
            return Err(RpmsgError::Param("source address outside the allocatable range"));
        }
        if self.bitmap & (1u128 << bit) != 0 {
            return Err(RpmsgError::Addr(addr));
        }
        self.bitmap |= 1u128 << bit;
        Ok(())
    }

    pub(crate) fn release_address(&mut self, addr: u32) {
        if let Some(bit) = addr.checked_sub(RPMSG_RESERVED_ADDRESSES) {
            if bit < RPMSG_ADDR_BMP_SIZE {
                self.bitmap &= !(1u128 << bit);
            }
        }
    }
}

impl RpmsgVirtioDevice {
    /// Insert an already initialised endpoint. No address collision check.
    pub fn register_endpoint(self: &Arc<Self>, ept: &Endpoint) -> Result<()> {
        self.check_active()?;
        let mut st = self.state.lock();
        ept.attach(Arc::downgrade(self));
        st.endpoints.insert(ept.clone());
        tracing::debug!(name = ept.name(), addr = ept.addr(), dest = ept.dest_addr(), "endpoint registered");
        Ok(())
    }

    /// Allocate (or claim) an address, register, and announce the endpoint.
    ///
    /// `src == RPMSG_ADDR_ANY` picks the lowest free dynamic address. The
    /// announcement goes out only when name service was negotiated, the name
    /// is non-empty and the destination is still unknown.
    pub fn create_endpoint(
        self: &Arc<Self>,
        name: &str,
        src: u32,
        dest: u32,
        cb: EndpointCallback,
        ns_unbind_cb: Option<EndpointUnbindCallback>,
    ) -> Result<Endpoint> {
        self.check_active()?;
        let ept = {
            let mut st = self.state.lock();
            let addr = if src == RPMSG_ADDR_ANY {
                st.endpoints
                    .allocate_address()
                    .ok_or(RpmsgError::Addr(RPMSG_ADDR_ANY))?
            } else {
                st.endpoints.reserve_address(src)?;
                src
            };
            let ept = Endpoint::new(name, addr, dest, cb, ns_unbind_cb);
            ept.attach(Arc::downgrade(self));
            st.endpoints.insert(ept.clone());
            ept
        };
        tracing::debug!(name = ept.name(), addr = ept.addr(), dest, "endpoint created");

        if self.support_ns() && !ept.name().is_empty() && dest == RPMSG_ADDR_ANY {
            if let Err(e) = self.send_ns_message(&ept, NsFlags::Create) {
                self.unregister_endpoint(&ept);
                return Err(e);
            }
        }
        Ok(ept)
    }

    /// Announce the destruction (if applicable) and unregister.
    pub fn destroy_endpoint(&self, ept: &Endpoint) {
        if self.support_ns() && ept.addr() >= RPMSG_RESERVED_ADDRESSES && ept.addr() != RPMSG_ADDR_ANY {
            if let Err(e) = self.send_ns_message(ept, NsFlags::Destroy) {
                tracing::warn!(name = ept.name(), error = %e, "failed to announce endpoint destruction");
            }
        }
        self.unregister_endpoint(ept);
    }

    /// Remove from the registry and clear the endpoint.
    pub fn unregister_endpoint(&self, ept: &Endpoint) {
        let mut st = self.state.lock();
        if !st.endpoints.contains(ept) {
            return;
        }
        st.endpoints.release_address(ept.addr());
        st.endpoints.remove(ept);
        ept.reset();
        tracing::debug!(name = ept.name(), "endpoint unregistered");
    }

    /// Registered endpoint with local address `addr`.
    pub fn endpoint_by_addr(&self, addr: u32) -> Option<Endpoint> {
        self.state.lock().endpoints.by_addr(addr)
    }

    /// See `EndpointRegistry::lookup` for the match order.
    pub fn get_endpoint(&self, name: Option<&str>, addr: u32, dest: u32) -> Option<Endpoint> {
        self.state.lock().endpoints.lookup(name, addr, dest)
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }
}
