//! Virtio device side of the transport: role, status and feature negotiation.

use super::queue::Virtqueue;
use crate::error::Result;
use std::fmt::Debug;
use std::sync::Arc;

/// Which end of the shared-memory channel this processor plays.
///
/// The host is the virtio driver: it owns the buffer pool and publishes
/// buffers. The remote is the virtio device: it borrows what the host posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Remote,
}

// Device status bits
pub const VIRTIO_CONFIG_STATUS_ACK: u8 = 0x01;
pub const VIRTIO_CONFIG_STATUS_DRIVER: u8 = 0x02;
pub const VIRTIO_CONFIG_STATUS_DRIVER_OK: u8 = 0x04;
pub const VIRTIO_CONFIG_STATUS_FEATURES_OK: u8 = 0x08;
pub const VIRTIO_CONFIG_STATUS_NEEDS_RESET: u8 = 0x40;
pub const VIRTIO_CONFIG_STATUS_FAILED: u8 = 0x80;

/// Feature bit: the peer supports name-service announcements.
pub const VIRTIO_RPMSG_F_NS: u32 = 0;

/// The device/feature-negotiation surface the transport consumes.
pub trait VirtioDevice: Send + Sync + Debug {
    fn role(&self) -> Role;

    fn get_status(&self) -> u8;

    fn set_status(&self, status: u8);

    /// Host: features offered by the device. Remote: features the host acked.
    fn get_features(&self) -> u32;

    fn set_features(&self, features: u32);

    /// Create one queue per name, in order, as seen from this role.
    fn create_virtqueues(&self, names: &[&str]) -> Result<Vec<Arc<dyn Virtqueue>>>;
}
