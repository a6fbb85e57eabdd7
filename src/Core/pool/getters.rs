use super::*;

impl SharedMemPool {
    /// Offset of the first byte of the pool
    pub fn base(&self) -> usize {
        self.base
    }

    /// Total size the pool was installed with
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes not yet handed out
    pub fn available(&self) -> usize {
        self.available
    }

    /// Bytes handed out so far
    pub fn used(&self) -> usize {
        self.size - self.available
    }
}
