// Name service: announcements of named endpoints on the well-known address 0x35.
//
// One-way protocol. A CREATE either binds an existing unbound endpoint of that
// name or asks the application (bind callback) to create one; a DESTROY
// unbinds the matching endpoint and tells the application.

use super::endpoint::Endpoint;
use super::transport::RpmsgVirtioDevice;
use super::Buffer::RxBuffer;
use super::Structs::Rpmsg_Structs::{NsFlags, RpmsgNsMessage, RPMSG_ADDR_ANY, RPMSG_NS_EPT_ADDR};
use crate::error::Result;
use std::sync::Arc;

/// Receive callback of the name-service endpoint.
pub(crate) fn ns_endpoint_callback(ept: &Endpoint, rx: &RxBuffer) -> Result<()> {
    let Some(rdev) = ept.device() else {
        return Ok(());
    };
    let raw = rx.payload()?;
    let Some(msg) = RpmsgNsMessage::from_bytes(&raw) else {
        tracing::warn!(len = raw.len(), src = rx.src(), "dropping malformed name service message");
        return Ok(());
    };
    rdev.handle_ns_announcement(&msg.name(), msg.addr, msg.ns_flags());
    Ok(())
}

impl RpmsgVirtioDevice {
    /// Apply one announcement. Callbacks run without the transport lock held.
    pub fn handle_ns_announcement(self: &Arc<Self>, name: &str, dest: u32, flags: NsFlags) {
        tracing::debug!(name, dest, ?flags, "name service announcement");
        let st = self.state.lock();
        let ept = st.endpoints.lookup(Some(name), RPMSG_ADDR_ANY, dest);

        match flags {
            NsFlags::Destroy => {
                if let Some(ept) = &ept {
                    ept.set_dest_addr(RPMSG_ADDR_ANY);
                }
                drop(st);
                if let Some(ept) = &ept {
                    if let Some(cb) = ept.ns_unbind_callback() {
                        cb(ept);
                    }
                }
                if let Some(cb) = &self.ns_unbind_cb {
                    cb(self, name, dest);
                }
            }
            NsFlags::Create => match ept {
                Some(ept) => {
                    ept.set_dest_addr(dest);
                }
                None => {
                    drop(st);
                    if let Some(cb) = &self.ns_bind_cb {
                        cb(self, name, dest);
                    }
                }
            },
        }
    }

    /// Tell the peer that `ept` appeared or is going away.
    pub(crate) fn send_ns_message(&self, ept: &Endpoint, flags: NsFlags) -> Result<()> {
        let msg = RpmsgNsMessage::new(ept.name(), ept.addr(), flags);
        self.send_offchannel_raw(ept.addr(), RPMSG_NS_EPT_ADDR, &msg.to_bytes(), true)?;
        Ok(())
    }
}
