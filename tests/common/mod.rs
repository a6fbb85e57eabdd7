// Shared harness: a host and a remote transport wired back to back over a
// LoopbackLink, both mapping the same heap-backed region.
#![allow(dead_code)]

use parking_lot::Mutex;
use rpmsg_virtio::Core::io::IoRegion;
use rpmsg_virtio::Core::pool::SharedMemPool;
use rpmsg_virtio::Core::HeapSharedMemory;
use rpmsg_virtio::RPMsg::Buffer::RxBuffer;
use rpmsg_virtio::Virtio::device::VIRTIO_RPMSG_F_NS;
use rpmsg_virtio::Virtio::{LoopbackDevice, LoopbackLink};
use rpmsg_virtio::{Endpoint, EndpointCallback, RpmsgVirtioConfig, RpmsgVirtioDevice, TransportBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the peer "sees" the shared region.
pub const PHYS_BASE: u64 = 0x3ed0_0000;

pub const NS: u32 = 1 << VIRTIO_RPMSG_F_NS;

pub struct Link {
    pub link: LoopbackLink,
    pub host_dev: Arc<LoopbackDevice>,
    pub remote_dev: Arc<LoopbackDevice>,
    pub io: Arc<IoRegion>,
    pub host: Arc<RpmsgVirtioDevice>,
    pub remote: Arc<RpmsgVirtioDevice>,
}

/// Region big enough for a full RX ring plus a full TX ring of host buffers.
pub fn region_size(num_desc: u16, config: &RpmsgVirtioConfig) -> usize {
    num_desc as usize * (config.h2r_buf_size + config.r2h_buf_size) as usize
}

pub fn heap_region(size: usize) -> Arc<IoRegion> {
    let shm = HeapSharedMemory::new(size).unwrap();
    Arc::new(IoRegion::new(Box::new(shm), PHYS_BASE))
}

/// Test config: short waits so failing paths finish quickly.
pub fn quick_config() -> RpmsgVirtioConfig {
    RpmsgVirtioConfig {
        tx_timeout_ms: 200,
        tx_poll_interval_us: 500,
        ready_timeout_ms: 200,
        ..RpmsgVirtioConfig::default()
    }
}

/// Bring up both ends, letting each side customise its builder.
pub fn connect_with<H, R>(num_desc: u16, features: u32, config: RpmsgVirtioConfig, host_setup: H, remote_setup: R) -> Link
where
    H: FnOnce(TransportBuilder) -> TransportBuilder,
    R: FnOnce(TransportBuilder) -> TransportBuilder,
{
    let link = LoopbackLink::new(num_desc, features);
    let size = region_size(num_desc, &config);
    let io = heap_region(size);
    let pool = SharedMemPool::new(0, size).unwrap();

    let host_dev = link.host();
    let remote_dev = link.remote();
    let host = host_setup(
        TransportBuilder::new(host_dev.clone(), io.clone())
            .with_config(config.clone())
            .with_shm_pool(pool),
    )
    .build()
    .unwrap();
    let remote = remote_setup(TransportBuilder::new(remote_dev.clone(), io.clone()).with_config(config))
        .build()
        .unwrap();

    Link {
        link,
        host_dev,
        remote_dev,
        io,
        host,
        remote,
    }
}

pub fn connect(num_desc: u16, features: u32) -> Link {
    connect_with(num_desc, features, quick_config(), |b| b, |b| b)
}

impl Link {
    /// Deliver notifications on both ends until nothing is pending.
    pub fn pump(&self) {
        for _ in 0..64 {
            if self.host_dev.poll() + self.remote_dev.poll() == 0 {
                break;
            }
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub src: u32,
    pub dst: u32,
    pub data: Vec<u8>,
}

pub type Inbox = Arc<Mutex<Vec<Received>>>;

/// Callback that records every message it sees.
pub fn recorder() -> (EndpointCallback, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = inbox.clone();
    let cb: EndpointCallback = Arc::new(move |_ept: &Endpoint, rx: &RxBuffer| -> rpmsg_virtio::Result<()> {
        sink.lock().push(Received {
            src: rx.src(),
            dst: rx.dst(),
            data: rx.payload()?,
        });
        Ok(())
    });
    (cb, inbox)
}

pub fn noop() -> EndpointCallback {
    Arc::new(|_: &Endpoint, _: &RxBuffer| -> rpmsg_virtio::Result<()> { Ok(()) })
}

/// Spin on `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
