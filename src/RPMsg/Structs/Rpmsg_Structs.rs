// Wire structures exchanged through shared memory.
// Everything here is what the peer sees; transport bookkeeping lives in Buffer::BufferControl.

/// Any address: unresolved destination or "allocate one for me" as a source.
pub const RPMSG_ADDR_ANY: u32 = 0xFFFF_FFFF;
/// Well-known address of the name-service endpoint.
pub const RPMSG_NS_EPT_ADDR: u32 = 0x35;
/// Addresses below this are never handed out by the allocator.
pub const RPMSG_RESERVED_ADDRESSES: u32 = 1024;
/// Number of dynamically allocatable addresses.
pub const RPMSG_ADDR_BMP_SIZE: u32 = 128;
/// Fixed width of endpoint names on the wire, NUL padded.
pub const RPMSG_NAME_SIZE: usize = 32;

pub const RPMSG_HEADER_SIZE: usize = std::mem::size_of::<RpmsgHeader>();
pub const RPMSG_NS_MSG_SIZE: usize = std::mem::size_of::<RpmsgNsMessage>();

/// Header placed immediately before every payload.
///
/// Packed, host byte order on both cores (little-endian on every supported
/// platform, encoded explicitly as such).
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RpmsgHeader {
    pub src: u32,
    pub dst: u32,
    /// Transport-private; always written as zero
    pub reserved: u32,
    pub len: u16,
    pub flags: u16,
}

impl RpmsgHeader {
    pub fn new(src: u32, dst: u32, len: u16) -> Self {
        Self {
            src,
            dst,
            reserved: 0,
            len,
            flags: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; RPMSG_HEADER_SIZE] {
        let mut out = [0u8; RPMSG_HEADER_SIZE];
        out[0..4].copy_from_slice(&{ self.src }.to_le_bytes());
        out[4..8].copy_from_slice(&{ self.dst }.to_le_bytes());
        out[8..12].copy_from_slice(&{ self.reserved }.to_le_bytes());
        out[12..14].copy_from_slice(&{ self.len }.to_le_bytes());
        out[14..16].copy_from_slice(&{ self.flags }.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8; RPMSG_HEADER_SIZE]) -> Self {
        let u32_at = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        let u16_at = |o: usize| u16::from_le_bytes([raw[o], raw[o + 1]]);
        Self {
            src: u32_at(0),
            dst: u32_at(4),
            reserved: u32_at(8),
            len: u16_at(12),
            flags: u16_at(14),
        }
    }
}

/// Name-service announcement flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum NsFlags {
    Create = 0,
    Destroy = 1,
}

/// Payload sent to `RPMSG_NS_EPT_ADDR` when a named endpoint appears or goes away.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RpmsgNsMessage {
    pub name: [u8; RPMSG_NAME_SIZE],
    pub addr: u32,
    pub flags: u32,
}

impl RpmsgNsMessage {
    /// Names longer than `RPMSG_NAME_SIZE` are truncated.
    pub fn new(name: &str, addr: u32, flags: NsFlags) -> Self {
        let mut raw = [0u8; RPMSG_NAME_SIZE];
        let n = name.len().min(RPMSG_NAME_SIZE);
        raw[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self {
            name: raw,
            addr,
            flags: flags as u32,
        }
    }

    /// Name up to the first NUL; invalid UTF-8 is replaced lossily.
    pub fn name(&self) -> String {
        let raw = self.name;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(RPMSG_NAME_SIZE);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// Anything other than DESTROY is treated as CREATE.
    pub fn ns_flags(&self) -> NsFlags {
        if { self.flags } == NsFlags::Destroy as u32 {
            NsFlags::Destroy
        } else {
            NsFlags::Create
        }
    }

    pub fn to_bytes(&self) -> [u8; RPMSG_NS_MSG_SIZE] {
        let mut out = [0u8; RPMSG_NS_MSG_SIZE];
        out[..RPMSG_NAME_SIZE].copy_from_slice(&{ self.name });
        out[RPMSG_NAME_SIZE..RPMSG_NAME_SIZE + 4].copy_from_slice(&{ self.addr }.to_le_bytes());
        out[RPMSG_NAME_SIZE + 4..].copy_from_slice(&{ self.flags }.to_le_bytes());
        out
    }

    /// `None` unless `raw` is exactly one announcement long.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() != RPMSG_NS_MSG_SIZE {
            return None;
        }
        let mut name = [0u8; RPMSG_NAME_SIZE];
        name.copy_from_slice(&raw[..RPMSG_NAME_SIZE]);
        let word = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        Some(Self {
            name,
            addr: word(RPMSG_NAME_SIZE),
            flags: word(RPMSG_NAME_SIZE + 4),
        })
    }
}
