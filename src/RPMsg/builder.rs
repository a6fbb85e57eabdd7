use super::transport::{InitParams, RpmsgVirtioDevice};
use super::Structs::Rpmsg_Structs::RPMSG_HEADER_SIZE;
use crate::error::{Result, RpmsgError};
use crate::Core::io::IoRegion;
use crate::Core::pool::SharedMemPool;
use crate::Virtio::device::VirtioDevice;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default size of every RPMsg buffer, header included.
pub const RPMSG_BUFFER_SIZE: u32 = 512;

/// Largest buffer whose payload length still fits the 16-bit header field.
pub const RPMSG_MAX_BUFFER_SIZE: u32 = u16::MAX as u32 + RPMSG_HEADER_SIZE as u32;

/// Device-level callback for name-service create/destroy announcements.
pub type NsBindCallback = Arc<dyn Fn(&Arc<RpmsgVirtioDevice>, &str, u32) + Send + Sync>;

/// Transport tunables. Every field has a default; a TOML file may set any subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpmsgVirtioConfig {
    /// Host-to-remote buffer size (host TX)
    pub h2r_buf_size: u32,
    /// Remote-to-host buffer size (host RX)
    pub r2h_buf_size: u32,
    /// Upper bound on a blocking wait for a TX buffer
    pub tx_timeout_ms: u64,
    /// Sleep between TX buffer attempts
    pub tx_poll_interval_us: u64,
    /// How long a remote waits for the host to set DRIVER_OK
    pub ready_timeout_ms: u64,
}

impl Default for RpmsgVirtioConfig {
    fn default() -> Self {
        Self {
            h2r_buf_size: RPMSG_BUFFER_SIZE,
            r2h_buf_size: RPMSG_BUFFER_SIZE,
            tx_timeout_ms: 15_000,
            tx_poll_interval_us: 1_000,
            ready_timeout_ms: 15_000,
        }
    }
}

impl RpmsgVirtioConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| RpmsgError::Init(format!("invalid transport configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for size in [self.h2r_buf_size, self.r2h_buf_size] {
            if size as usize <= RPMSG_HEADER_SIZE {
                return Err(RpmsgError::Param("buffer size must exceed the header size"));
            }
            if size > RPMSG_MAX_BUFFER_SIZE {
                return Err(RpmsgError::Param("buffer size exceeds the 16-bit length field"));
            }
        }
        if self.tx_poll_interval_us == 0 {
            return Err(RpmsgError::Param("poll interval must be non-zero"));
        }
        Ok(())
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    pub fn tx_poll_interval(&self) -> Duration {
        Duration::from_micros(self.tx_poll_interval_us)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Collects everything one side needs and brings the transport up.
pub struct TransportBuilder {
    vdev: Arc<dyn VirtioDevice>,
    io: Arc<IoRegion>,
    pool: Option<SharedMemPool>,
    config: RpmsgVirtioConfig,
    ns_bind_cb: Option<NsBindCallback>,
    ns_unbind_cb: Option<NsBindCallback>,
}

impl TransportBuilder {
    pub fn new(vdev: Arc<dyn VirtioDevice>, io: Arc<IoRegion>) -> Self {
        Self {
            vdev,
            io,
            pool: None,
            config: RpmsgVirtioConfig::default(),
            ns_bind_cb: None,
            ns_unbind_cb: None,
        }
    }

    pub fn with_config(mut self, config: RpmsgVirtioConfig) -> Self {
        self.config = config;
        self
    }

    /// Buffer pool; required for the host role, ignored by the remote.
    pub fn with_shm_pool(mut self, pool: SharedMemPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Called when the peer announces a name no local endpoint is waiting for.
    pub fn on_ns_bind<F>(mut self, cb: F) -> Self
    where
        F: Fn(&Arc<RpmsgVirtioDevice>, &str, u32) + Send + Sync + 'static,
    {
        self.ns_bind_cb = Some(Arc::new(cb));
        self
    }

    /// Called when the peer announces that one of its endpoints went away.
    pub fn on_ns_unbind<F>(mut self, cb: F) -> Self
    where
        F: Fn(&Arc<RpmsgVirtioDevice>, &str, u32) + Send + Sync + 'static,
    {
        self.ns_unbind_cb = Some(Arc::new(cb));
        self
    }

    pub fn build(self) -> Result<Arc<RpmsgVirtioDevice>> {
        RpmsgVirtioDevice::init(InitParams {
            vdev: self.vdev,
            io: self.io,
            pool: self.pool,
            config: self.config,
            ns_bind_cb: self.ns_bind_cb,
            ns_unbind_cb: self.ns_unbind_cb,
        })
    }
}
