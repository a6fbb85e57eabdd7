//! RPMsg transport over a pair of virtqueues.
//!
//! ### Locking:
//! One mutex per transport guards the pool, the reclaimer, the endpoint
//! registry and every virtqueue operation. It is never held across an
//! endpoint callback, a name-service callback, or a sleep in the TX wait loop.
//!
//! ### Buffer flow:
//! - **Send**: acquire (reclaimer, then pool/virtqueue) → header + payload →
//!   enqueue on the send queue → kick.
//! - **Receive**: driven by the RX queue callback; dequeue → dispatch to the
//!   endpoint → return unless held → kick once the queue is drained.

use super::builder::{NsBindCallback, RpmsgVirtioConfig};
use super::endpoint::{Endpoint, EndpointCallback, EndpointRegistry};
use super::ns::ns_endpoint_callback;
use super::Buffer::exchange::BufferExchange;
use super::Buffer::reclaimer::Reclaimer;
use super::Buffer::{BufferControl, HeldRxBuffer, RxBuffer, TxBuffer};
use super::Structs::Rpmsg_Structs::{
    RpmsgHeader, RPMSG_ADDR_ANY, RPMSG_HEADER_SIZE, RPMSG_NS_EPT_ADDR,
};
use crate::error::{Result, RpmsgError};
use crate::Core::io::IoRegion;
use crate::Core::pool::SharedMemPool;
use crate::Virtio::device::{
    Role, VirtioDevice, VIRTIO_CONFIG_STATUS_ACK, VIRTIO_CONFIG_STATUS_DRIVER,
    VIRTIO_CONFIG_STATUS_DRIVER_OK, VIRTIO_CONFIG_STATUS_FAILED, VIRTIO_CONFIG_STATUS_FEATURES_OK,
    VIRTIO_RPMSG_F_NS,
};
use crate::Virtio::queue::{Virtqueue, VqBuf, VqCallback};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Names of the two queues, in the order the device creates them.
pub const RPMSG_VQ_NAMES: [&str; 2] = ["rx_vq", "tx_vq"];

/// Features this implementation can use.
const SUPPORTED_FEATURES: u32 = 1 << VIRTIO_RPMSG_F_NS;

pub(crate) struct InitParams {
    pub(crate) vdev: Arc<dyn VirtioDevice>,
    pub(crate) io: Arc<IoRegion>,
    pub(crate) pool: Option<SharedMemPool>,
    pub(crate) config: RpmsgVirtioConfig,
    pub(crate) ns_bind_cb: Option<NsBindCallback>,
    pub(crate) ns_unbind_cb: Option<NsBindCallback>,
}

/// Everything the transport mutex protects.
pub(crate) struct TransportState {
    pub(crate) pool: Option<SharedMemPool>,
    pub(crate) reclaimer: Reclaimer,
    pub(crate) endpoints: EndpointRegistry,
}

/// One side of an RPMsg link.
pub struct RpmsgVirtioDevice {
    pub(crate) role: Role,
    pub(crate) vdev: Arc<dyn VirtioDevice>,
    pub(crate) io: Arc<IoRegion>,
    pub(crate) config: RpmsgVirtioConfig,
    pub(crate) exchange: BufferExchange,
    pub(crate) state: Mutex<TransportState>,
    pub(crate) features: u32,
    pub(crate) ns_bind_cb: Option<NsBindCallback>,
    pub(crate) ns_unbind_cb: Option<NsBindCallback>,
    active: AtomicBool,
    callback_failures: AtomicU64,
}

impl RpmsgVirtioDevice {
    pub(crate) fn init(params: InitParams) -> Result<Arc<Self>> {
        let InitParams {
            vdev,
            io,
            pool,
            config,
            ns_bind_cb,
            ns_unbind_cb,
        } = params;
        config.validate()?;
        let role = vdev.role();

        let features = match role {
            Role::Host => {
                vdev.set_status(VIRTIO_CONFIG_STATUS_ACK | VIRTIO_CONFIG_STATUS_DRIVER);
                let acked = vdev.get_features() & SUPPORTED_FEATURES;
                vdev.set_features(acked);
                vdev.set_status(
                    VIRTIO_CONFIG_STATUS_ACK | VIRTIO_CONFIG_STATUS_DRIVER | VIRTIO_CONFIG_STATUS_FEATURES_OK,
                );
                acked
            }
            Role::Remote => {
                wait_remote_ready(&*vdev, &config)?;
                vdev.get_features()
            }
        };
        tracing::debug!(?role, features = format_args!("{:#x}", features), "features negotiated");

        let vqs = vdev.create_virtqueues(&RPMSG_VQ_NAMES)?;
        let [vq0, vq1]: [_; 2] = vqs
            .try_into()
            .map_err(|_| RpmsgError::Init("device must provide exactly two virtqueues".into()))?;
        let (rvq, svq) = match role {
            Role::Host => (vq0, vq1),
            Role::Remote => (vq1, vq0),
        };

        let pool = match role {
            Role::Host => {
                let mut pool = pool.ok_or(RpmsgError::Param("host role requires a shared memory pool"))?;
                populate_rx(&io, &mut pool, &*rvq, config.r2h_buf_size)?;
                Some(pool)
            }
            Role::Remote => {
                if pool.is_some() {
                    tracing::warn!("remote role ignores the shared memory pool");
                }
                None
            }
        };

        let exchange = BufferExchange::new(role, rvq.clone(), svq.clone(), io.clone(), config.h2r_buf_size);
        let rdev = Arc::new(Self {
            role,
            vdev: vdev.clone(),
            io,
            config,
            exchange,
            state: Mutex::new(TransportState {
                pool,
                reclaimer: Reclaimer::new(),
                endpoints: EndpointRegistry::default(),
            }),
            features,
            ns_bind_cb,
            ns_unbind_cb,
            active: AtomicBool::new(true),
            callback_failures: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&rdev);
        let rx_cb: VqCallback = Arc::new(move || {
            if let Some(rdev) = weak.upgrade() {
                rdev.handle_rx();
            }
        });
        rvq.set_callback(Some(rx_cb));
        // Nothing to do when the peer returns TX buffers; they are reaped lazily.
        svq.set_callback(None);
        if role == Role::Host {
            svq.disable_cb();
        }

        if rdev.support_ns() {
            let cb: EndpointCallback = Arc::new(ns_endpoint_callback);
            let ns_ept = Endpoint::new("NS", RPMSG_NS_EPT_ADDR, RPMSG_NS_EPT_ADDR, cb, None);
            rdev.register_endpoint(&ns_ept)?;
        }

        if role == Role::Host {
            vdev.set_status(vdev.get_status() | VIRTIO_CONFIG_STATUS_DRIVER_OK);
        }
        tracing::debug!(?role, "rpmsg transport initialized");
        Ok(rdev)
    }

    /// Destroy every endpoint and stop servicing the queues.
    pub fn deinit(&self) {
        let endpoints = self.state.lock().endpoints.snapshot();
        for ept in endpoints {
            self.destroy_endpoint(&ept);
        }
        self.active.store(false, Ordering::Release);
        self.exchange.rvq().set_callback(None);
        tracing::debug!(role = ?self.role, "rpmsg transport deinitialized");
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &RpmsgVirtioConfig {
        &self.config
    }

    pub fn features(&self) -> u32 {
        self.features
    }

    pub fn support_ns(&self) -> bool {
        self.features & (1 << VIRTIO_RPMSG_F_NS) != 0
    }

    pub fn io(&self) -> &Arc<IoRegion> {
        &self.io
    }

    /// Endpoint callbacks that returned an error so far.
    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RpmsgError::DevState)
        }
    }

    fn check_ready(&self) -> Result<()> {
        self.check_active()?;
        if self.vdev.get_status() & VIRTIO_CONFIG_STATUS_DRIVER_OK == 0 {
            return Err(RpmsgError::DevState);
        }
        Ok(())
    }

    /// Payload bytes a TX buffer can carry.
    pub fn get_tx_buffer_size(&self) -> usize {
        let size = match self.role {
            Role::Host => self.config.h2r_buf_size,
            Role::Remote => self.exchange.svq().get_desc_size(),
        };
        (size as usize).saturating_sub(RPMSG_HEADER_SIZE)
    }

    /// Payload bytes an RX buffer can carry.
    pub fn get_rx_buffer_size(&self) -> usize {
        let size = match self.role {
            Role::Host => self.config.r2h_buf_size,
            Role::Remote => self.exchange.rvq().get_desc_size(),
        };
        (size as usize).saturating_sub(RPMSG_HEADER_SIZE)
    }

    fn tx_capacity(&self, ctrl: &BufferControl) -> usize {
        let len = match self.role {
            Role::Host => ctrl.len.min(self.config.h2r_buf_size),
            Role::Remote => ctrl.len,
        };
        (len as usize).saturating_sub(RPMSG_HEADER_SIZE)
    }

    /// Obtain a TX buffer to fill in place.
    ///
    /// With `wait`, retries every `tx_poll_interval` until `tx_timeout`, with
    /// the lock released between attempts; otherwise tries once.
    pub fn get_tx_payload_buffer(&self, wait: bool) -> Result<TxBuffer> {
        self.check_ready()?;

        let start = Instant::now();
        let ctrl = loop {
            let got = {
                let mut guard = self.state.lock();
                let st = &mut *guard;
                self.exchange.get_tx(st.pool.as_mut(), &mut st.reclaimer)?
            };
            if let Some(ctrl) = got {
                break ctrl;
            }
            if !wait {
                return Err(RpmsgError::NoBuffer);
            }
            if start.elapsed() >= self.config.tx_timeout() {
                tracing::warn!(timeout_ms = self.config.tx_timeout_ms, "timed out waiting for a TX buffer");
                return Err(RpmsgError::NoBuffer);
            }
            thread::sleep(self.config.tx_poll_interval());
        };

        Ok(TxBuffer::new(self.io.clone(), ctrl, self.tx_capacity(&ctrl)))
    }

    /// Copy `data` into a fresh buffer and send it. Payloads larger than a
    /// buffer are truncated; the number of bytes sent is returned.
    pub fn send_offchannel_raw(&self, src: u32, dst: u32, data: &[u8], wait: bool) -> Result<usize> {
        if dst == RPMSG_ADDR_ANY {
            return Err(RpmsgError::Param("destination address must be set"));
        }
        let mut tx = self.get_tx_payload_buffer(wait)?;
        let len = data.len().min(tx.capacity());
        if let Err(e) = tx.write(0, &data[..len]) {
            self.release_tx_buffer(tx);
            return Err(e);
        }
        self.send_offchannel_nocopy(src, dst, tx, len)
    }

    /// Send `len` bytes the caller already wrote into `tx`.
    ///
    /// On failure the buffer goes back to the reclaimer.
    pub fn send_offchannel_nocopy(&self, src: u32, dst: u32, tx: TxBuffer, len: usize) -> Result<usize> {
        if let Err(e) = self.check_ready() {
            self.release_tx_buffer(tx);
            return Err(e);
        }
        if dst == RPMSG_ADDR_ANY {
            self.release_tx_buffer(tx);
            return Err(RpmsgError::Param("destination address must be set"));
        }
        if len > tx.capacity() {
            let capacity = tx.capacity();
            self.release_tx_buffer(tx);
            return Err(RpmsgError::BufferSize { len, capacity });
        }

        let ctrl = tx.into_control();
        let header = RpmsgHeader::new(src, dst, len as u16);
        let mut st = self.state.lock();
        let sent = self
            .io
            .block_write(ctrl.offset, &header.to_bytes())
            .and_then(|_| self.exchange.enqueue_tx(ctrl, (RPMSG_HEADER_SIZE + len) as u32, &mut st.reclaimer));
        if let Err(e) = sent {
            tracing::error!(error = %e, src, dst, "failed to enqueue TX buffer");
            st.reclaimer.release(ctrl);
            return Err(e);
        }
        self.exchange.kick_tx();
        Ok(len)
    }

    /// Give back a TX buffer without sending it.
    pub fn release_tx_buffer(&self, tx: TxBuffer) {
        self.state.lock().reclaimer.release(tx.into_control());
    }

    /// Return a buffer kept with `RxBuffer::hold` and notify the peer.
    pub fn release_rx_buffer(&self, held: HeldRxBuffer) -> Result<()> {
        let ctrl = held.into_control();
        let _st = self.state.lock();
        self.exchange.return_held_rx(ctrl)?;
        self.exchange.kick_rx();
        Ok(())
    }

    fn read_rx(&self, ctrl: BufferControl) -> Result<RxBuffer> {
        let mut raw = [0u8; RPMSG_HEADER_SIZE];
        self.io.block_read(ctrl.offset, &mut raw)?;
        let header = RpmsgHeader::from_bytes(&raw);
        let capacity = (ctrl.len as usize).saturating_sub(RPMSG_HEADER_SIZE);
        let mut payload_len = header.len as usize;
        if payload_len > capacity {
            tracing::warn!(len = payload_len, capacity, "RX header length exceeds buffer, truncating");
            payload_len = capacity;
        }
        Ok(RxBuffer::new(self.io.clone(), header, ctrl, payload_len))
    }

    /// Drain the RX queue, dispatching each message to its endpoint.
    ///
    /// This is the RX virtqueue callback; an interrupt handler or poll loop
    /// may also call it directly.
    pub fn handle_rx(&self) {
        let mut next = {
            let _st = self.state.lock();
            self.exchange.get_rx()
        };

        loop {
            let ctrl = match next {
                Ok(Some(ctrl)) => ctrl,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to dequeue RX buffer");
                    break;
                }
            };

            let held = match self.read_rx(ctrl) {
                Ok(rx) => {
                    self.dispatch(&rx);
                    rx.is_held()
                }
                Err(e) => {
                    tracing::error!(error = %e, "unreadable RX buffer");
                    false
                }
            };

            let _st = self.state.lock();
            if !held {
                if let Err(e) = self.exchange.return_rx(ctrl) {
                    tracing::error!(error = %e, idx = ctrl.idx, "failed to return RX buffer");
                }
            }
            next = self.exchange.get_rx();
            if !matches!(next, Ok(Some(_))) {
                self.exchange.kick_rx();
            }
        }
    }

    fn dispatch(&self, rx: &RxBuffer) {
        let ept = self.state.lock().endpoints.by_addr(rx.dst());
        let Some(ept) = ept else {
            tracing::debug!(dst = rx.dst(), src = rx.src(), "no endpoint for message, dropping");
            return;
        };

        if ept.bind_if_unresolved(rx.src()) {
            tracing::debug!(name = ept.name(), dest = rx.src(), "endpoint bound on first contact");
        }
        if let Some(cb) = ept.callback() {
            if let Err(e) = cb(&ept, rx) {
                self.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(name = ept.name(), addr = ept.addr(), error = %e, "endpoint callback failed");
            }
        }
    }
}

/// Spin (with sleeps) until the host has set DRIVER_OK.
fn wait_remote_ready(vdev: &dyn VirtioDevice, config: &RpmsgVirtioConfig) -> Result<()> {
    let start = Instant::now();
    loop {
        let status = vdev.get_status();
        if status & VIRTIO_CONFIG_STATUS_FAILED != 0 {
            return Err(RpmsgError::DevState);
        }
        if status & VIRTIO_CONFIG_STATUS_DRIVER_OK != 0 {
            return Ok(());
        }
        if start.elapsed() >= config.ready_timeout() {
            tracing::warn!(status, "host never signalled DRIVER_OK");
            return Err(RpmsgError::DevState);
        }
        thread::sleep(config.tx_poll_interval());
    }
}

/// Host: post one zeroed RX buffer per descriptor.
fn populate_rx(
    io: &IoRegion,
    pool: &mut SharedMemPool,
    rvq: &dyn Virtqueue,
    buf_size: u32,
) -> Result<()> {
    for _ in 0..rvq.num_desc() {
        let offset = pool.get_buffer(buf_size as usize).ok_or(RpmsgError::NoBuffer)?;
        io.block_set(offset, 0, buf_size as usize)?;
        let phys = io
            .offset_to_phys(offset)
            .ok_or(RpmsgError::OutOfRange { offset, len: buf_size as usize })?;
        rvq.add_buffer(&[VqBuf { addr: phys, len: buf_size }], 0, 1, phys)?;
    }
    io.flush(0, io.size());
    Ok(())
}
