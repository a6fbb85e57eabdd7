use crate::Core::io::IoRegion;
use crate::Core::pool::SharedMemPool;
use crate::RPMsg::endpoint::Endpoint;
use crate::RPMsg::transport::RpmsgVirtioDevice;
use crate::RPMsg::Buffer::{HeldRxBuffer, RxBuffer, TxBuffer};
use std::fmt;

/// Debug function for SharedMemPool
///
/// Shows the carve-out bounds and how much of it is still free.
pub fn debug_shared_mem_pool(pool: &SharedMemPool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedMemPool")
        .field("base", &format_args!("0x{:x}", pool.base()))
        .field("size", &pool.size())
        .field("available", &pool.available())
        .finish()
}

/// Debug function for IoRegion
///
/// Never dereferences the mapping; only its location and handle are shown.
pub fn debug_io_region(io: &IoRegion, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let shm = io.backend();
    f.debug_struct("IoRegion")
        .field("va", &format_args!("{:p}", shm.as_ptr()))
        .field("pa", &format_args!("0x{:x}", io.phys_base()))
        .field("size", &io.size())
        .field("handle", &shm.raw_handle())
        .finish()
}

/// Debug function for RpmsgVirtioDevice
///
/// Takes the transport lock briefly to report the endpoint count and the
/// number of reclaimed buffers.
pub fn debug_transport(rdev: &RpmsgVirtioDevice, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (endpoints, reclaimed, pool) = {
        let st = rdev.state.lock();
        (
            st.endpoints.len(),
            st.reclaimer.len(),
            st.pool.as_ref().map(|p| p.available()),
        )
    };
    f.debug_struct("RpmsgVirtioDevice")
        .field("role", &rdev.role())
        .field("features", &format_args!("{:#x}", rdev.features()))
        .field("active", &rdev.is_active())
        .field("endpoints", &endpoints)
        .field("reclaimed", &reclaimed)
        .field("pool_available", &pool)
        .finish_non_exhaustive()
}

pub fn debug_endpoint(ept: &Endpoint, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Endpoint")
        .field("name", &ept.name())
        .field("addr", &format_args!("{:#x}", ept.addr()))
        .field("dest_addr", &format_args!("{:#x}", ept.dest_addr()))
        .field("registered", &ept.device().is_some())
        .finish()
}

pub fn debug_tx_buffer(tx: &TxBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TxBuffer")
        .field("idx", &tx.idx())
        .field("offset", &format_args!("0x{:x}", tx.offset()))
        .field("capacity", &tx.capacity())
        .finish()
}

pub fn debug_rx_buffer(rx: &RxBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RxBuffer")
        .field("src", &format_args!("{:#x}", rx.src()))
        .field("dst", &format_args!("{:#x}", rx.dst()))
        .field("len", &rx.len())
        .field("held", &rx.is_held())
        .finish()
}

pub fn debug_held_rx_buffer(held: &HeldRxBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HeldRxBuffer")
        .field("idx", &held.idx())
        .field("src", &format_args!("{:#x}", held.src()))
        .field("dst", &format_args!("{:#x}", held.dst()))
        .field("len", &held.len())
        .finish()
}

// Debug impls for the types above

impl fmt::Debug for IoRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_io_region(self, f)
    }
}

impl fmt::Debug for RpmsgVirtioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_transport(self, f)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_endpoint(self, f)
    }
}

impl fmt::Debug for TxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_tx_buffer(self, f)
    }
}

impl fmt::Debug for RxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_rx_buffer(self, f)
    }
}

impl fmt::Debug for HeldRxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_held_rx_buffer(self, f)
    }
}
