use super::*;
use std::fmt;

impl fmt::Debug for SharedMemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_shared_mem_pool(self, f)
    }
}
