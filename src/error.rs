// Error taxonomy for the transport and the numeric status codes of the RPMsg C API.

use crate::Virtio::queue::VirtqueueError;
use std::io;

// Status codes
pub const RPMSG_SUCCESS: i32 = 0;
pub const RPMSG_ERROR_BASE: i32 = -2000;
pub const RPMSG_ERR_NO_MEM: i32 = RPMSG_ERROR_BASE - 1;
pub const RPMSG_ERR_NO_BUFF: i32 = RPMSG_ERROR_BASE - 2;
pub const RPMSG_ERR_PARAM: i32 = RPMSG_ERROR_BASE - 3;
pub const RPMSG_ERR_DEV_STATE: i32 = RPMSG_ERROR_BASE - 4;
pub const RPMSG_ERR_BUFF_SIZE: i32 = RPMSG_ERROR_BASE - 5;
pub const RPMSG_ERR_INIT: i32 = RPMSG_ERROR_BASE - 6;
pub const RPMSG_ERR_ADDR: i32 = RPMSG_ERROR_BASE - 7;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpmsgError {
    #[error("Invalid parameter: {0}")]
    Param(&'static str),
    #[error("No buffer available")]
    NoBuffer,
    /// Only surfaces through the `RPMSG_ERR_NO_MEM` status mapping; pool
    /// exhaustion reports `NoBuffer`.
    #[error("Out of shared memory")]
    NoMem,
    #[error("Device not ready")]
    DevState,
    #[error("Payload of {len} bytes exceeds buffer capacity {capacity}")]
    BufferSize { len: usize, capacity: usize },
    #[error("Initialization failed: {0}")]
    Init(String),
    #[error("Address {0:#x} unavailable")]
    Addr(u32),
    #[error("Shared memory access out of range (offset {offset:#x}, len {len})")]
    OutOfRange { offset: usize, len: usize },
    #[error("Virtqueue error: {0}")]
    Virtqueue(#[from] VirtqueueError),
}

impl RpmsgError {
    /// The negative status code a C caller of the transport would see.
    pub fn status(&self) -> i32 {
        match self {
            RpmsgError::Param(_) | RpmsgError::OutOfRange { .. } => RPMSG_ERR_PARAM,
            RpmsgError::NoBuffer => RPMSG_ERR_NO_BUFF,
            RpmsgError::NoMem => RPMSG_ERR_NO_MEM,
            RpmsgError::DevState => RPMSG_ERR_DEV_STATE,
            RpmsgError::BufferSize { .. } => RPMSG_ERR_BUFF_SIZE,
            RpmsgError::Init(_) => RPMSG_ERR_INIT,
            RpmsgError::Addr(_) => RPMSG_ERR_ADDR,
            RpmsgError::Virtqueue(_) => RPMSG_ERR_PARAM,
        }
    }

    /// Whether retrying later can succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpmsgError::NoBuffer)
    }
}

impl From<RpmsgError> for io::Error {
    fn from(err: RpmsgError) -> Self {
        let kind = match &err {
            RpmsgError::NoBuffer => io::ErrorKind::WouldBlock,
            RpmsgError::DevState => io::ErrorKind::NotConnected,
            RpmsgError::Param(_) | RpmsgError::OutOfRange { .. } => io::ErrorKind::InvalidInput,
            RpmsgError::NoMem => io::ErrorKind::OutOfMemory,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, RpmsgError>;

/// Collapse a result into the C-style status convention.
pub fn to_status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => RPMSG_SUCCESS,
        Err(e) => e.status(),
    }
}
