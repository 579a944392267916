//! Memory arenas backing per-step scratch data.
//!
//! Both arenas live in a [`PhysicsContext`] owned by the world and are torn
//! down with it. Contents are exposed as typed slices of [`bytemuck::Pod`]
//! records, so solver and EPA data never go through raw pointers.

pub mod block;
pub mod stack;

pub use block::{Block, BlockAllocator};
pub use stack::{StackAllocator, StackBlock, StackView};

/// Storage unit of both arenas. Pod types with alignment up to 8 can be
/// viewed over it.
pub(crate) type Word = u64;

#[inline]
pub(crate) fn words_for(bytes: usize) -> usize {
    bytes.div_ceil(std::mem::size_of::<Word>())
}

/// Scratch memory threaded through one simulation step.
#[derive(Debug, Default)]
pub struct PhysicsContext {
    pub blocks: BlockAllocator,
    pub stack: StackAllocator,
}

impl PhysicsContext {
    pub fn new() -> Self {
        Self::default()
    }
}
