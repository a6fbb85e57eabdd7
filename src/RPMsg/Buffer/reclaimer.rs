// Free list of TX buffers that were obtained but never sent.

use super::Buffer::BufferControl;
use std::collections::VecDeque;

/// Index-based free list; consulted before the virtqueue or the pool.
#[derive(Debug, Default)]
pub struct Reclaimer {
    free: VecDeque<BufferControl>,
}

impl Reclaimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&mut self, ctrl: BufferControl) {
        self.free.push_back(ctrl);
    }

    pub fn acquire(&mut self) -> Option<BufferControl> {
        self.free.pop_front()
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
