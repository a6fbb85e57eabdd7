// Bump allocator over the host's share of the shared-memory region.
// Buffers are never returned here; once carved they circulate through the virtqueues.

mod debug;
mod getters;

/// Fixed-size buffer source for the host role.
///
/// Offsets are relative to the start of the `IoRegion` the pool was carved from.
/// `available` only ever decreases.
pub struct SharedMemPool {
    base: usize,
    size: usize,
    available: usize,
}

impl SharedMemPool {
    /// Install `[base, base + size)` as the pool. A zero-sized region yields no pool.
    pub fn new(base: usize, size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        Some(Self {
            base,
            size,
            available: size,
        })
    }

    /// Carve `size` bytes off the remaining space.
    ///
    /// Returns the offset of the new buffer, or `None` for a zero request or
    /// when the pool cannot satisfy it.
    pub fn get_buffer(&mut self, size: usize) -> Option<usize> {
        if size == 0 || self.available < size {
            return None;
        }
        let offset = self.base + self.size - self.available;
        self.available -= size;
        Some(offset)
    }
}
