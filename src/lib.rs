// Module naming follows project convention (RPMsg = Remote Processor Messaging)
pub mod error;

#[allow(non_snake_case)]
pub mod Core {
    pub mod SharedMemory;
    pub use SharedMemory::{
        attach_shared_memory, create_shared_memory, HeapSharedMemory, RawHandle, SharedMemoryBackend,
    };
    pub mod futex;
    pub mod io;
    pub mod pool;
}

#[allow(non_snake_case)]
pub mod Virtio {
    pub mod device;
    pub mod loopback;
    pub mod queue;
    pub mod vring;
    pub use device::{Role, VirtioDevice};
    pub use loopback::{LoopbackDevice, LoopbackLink};
    pub use queue::Virtqueue;
}

#[allow(non_snake_case)]
pub mod RPMsg {
    pub mod Structs {
        pub mod Rpmsg_Structs;
        pub use Rpmsg_Structs::{NsFlags, RpmsgHeader, RpmsgNsMessage};
    }
    pub mod Buffer {
        pub mod Buffer;
        mod Buffer_impl;
        pub(crate) mod exchange;
        pub mod reclaimer;
        pub use Buffer::{BufferControl, HeldRxBuffer, RxBuffer, TxBuffer};
    }
    pub mod builder;
    pub mod endpoint;
    pub mod ns;
    pub mod transport;
}

#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub use error::{Result, RpmsgError};
pub use RPMsg::builder::{RpmsgVirtioConfig, TransportBuilder};
pub use RPMsg::endpoint::{Endpoint, EndpointCallback, EndpointUnbindCallback};
pub use RPMsg::transport::RpmsgVirtioDevice;
pub use RPMsg::Structs::Rpmsg_Structs::{RPMSG_ADDR_ANY, RPMSG_NS_EPT_ADDR, RPMSG_RESERVED_ADDRESSES};
