// Handles for buffers lent out of the virtqueues to application code.

use crate::Core::io::IoRegion;
use crate::RPMsg::Structs::Rpmsg_Structs::RpmsgHeader;
use std::cell::Cell;
use std::sync::Arc;

/// Transport bookkeeping for one buffer in flight.
///
/// This never reaches shared memory; the wire header's reserved field stays zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferControl {
    /// Descriptor index the buffer travelled under (0 for fresh pool buffers)
    pub idx: u16,
    /// Offset of the header within the shared region
    pub offset: usize,
    /// Full buffer length, header included
    pub len: u32,
}

/// A transmit buffer obtained with `get_tx_payload_buffer`.
///
/// Must end in exactly one of `send_nocopy` or `release_tx_buffer`; a dropped
/// handle leaks its slot until the transport is torn down.
#[must_use = "a TX buffer must be sent or released"]
pub struct TxBuffer {
    pub(crate) io: Arc<IoRegion>,
    pub(crate) ctrl: BufferControl,
    pub(crate) capacity: usize,
}

/// A received message, valid for the duration of the endpoint callback.
pub struct RxBuffer {
    pub(crate) io: Arc<IoRegion>,
    pub(crate) header: RpmsgHeader,
    pub(crate) ctrl: BufferControl,
    pub(crate) payload_len: usize,
    pub(crate) held: Cell<bool>,
}

/// A receive buffer kept past its callback with `RxBuffer::hold`.
///
/// Hand it back with `release_rx_buffer`; until then the peer cannot reuse it.
#[must_use = "a held RX buffer must be released"]
pub struct HeldRxBuffer {
    pub(crate) io: Arc<IoRegion>,
    pub(crate) header: RpmsgHeader,
    pub(crate) ctrl: BufferControl,
    pub(crate) payload_len: usize,
}
