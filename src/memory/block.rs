//! Size-classed block allocator.
//!
//! Blocks come from per-class free lists. When a free list runs dry a whole
//! chunk worth of blocks ([`CHUNK_SIZE`] bytes) is allocated for that class at
//! once, so steady-state simulation recycles blocks without touching the
//! system allocator. Requests above [`MAX_BLOCK_SIZE`] go straight to the
//! heap and are released when freed.

use bytemuck::Pod;

use super::{words_for, Word};

/// Bytes allocated for a size class each time its free list is empty.
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Largest request served from the free lists.
pub const MAX_BLOCK_SIZE: usize = 640;
/// Number of size classes.
pub const BLOCK_SIZE_COUNT: usize = 14;

/// Block sizes in bytes, ascending.
pub const BLOCK_SIZES: [usize; BLOCK_SIZE_COUNT] = [
    16, 32, 64, 96, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640,
];

const fn build_size_map() -> [u8; MAX_BLOCK_SIZE + 1] {
    let mut map = [0u8; MAX_BLOCK_SIZE + 1];
    let mut class = 0;
    let mut size = 1;
    while size <= MAX_BLOCK_SIZE {
        if size > BLOCK_SIZES[class] {
            class += 1;
        }
        map[size] = class as u8;
        size += 1;
    }
    map
}

/// Request size in bytes -> size class.
const SIZE_MAP: [u8; MAX_BLOCK_SIZE + 1] = build_size_map();

/// An owned allocation handed out by [`BlockAllocator`].
///
/// Contents are not cleared when a block is recycled.
#[derive(Debug)]
pub struct Block {
    words: Box<[Word]>,
    class: Option<u8>,
}

impl Block {
    fn empty() -> Self {
        Self {
            words: Box::default(),
            class: None,
        }
    }

    /// Capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.words.len() * std::mem::size_of::<Word>()
    }

    /// Number of `T` values the block can hold.
    #[inline]
    pub fn capacity<T: Pod>(&self) -> usize {
        match std::mem::size_of::<T>() {
            0 => 0,
            elem => self.size() / elem,
        }
    }

    /// Whether the block came from the system allocator rather than a free list.
    #[inline]
    pub fn is_large(&self) -> bool {
        self.class.is_none() && !self.words.is_empty()
    }

    /// View the whole block as a slice of `T`.
    #[inline]
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        let count = self.capacity::<T>();
        let bytes: &[u8] = bytemuck::cast_slice(&self.words[..]);
        bytemuck::cast_slice(&bytes[..count * std::mem::size_of::<T>()])
    }

    /// View the whole block as a mutable slice of `T`.
    #[inline]
    pub fn as_mut_slice<T: Pod>(&mut self) -> &mut [T] {
        let count = self.capacity::<T>();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words[..]);
        bytemuck::cast_slice_mut(&mut bytes[..count * std::mem::size_of::<T>()])
    }
}

/// Free-list allocator over fixed size classes.
#[derive(Debug)]
pub struct BlockAllocator {
    free_lists: [Vec<Box<[Word]>>; BLOCK_SIZE_COUNT],
    chunk_count: usize,
    large_count: usize,
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self {
            free_lists: std::array::from_fn(|_| Vec::new()),
            chunk_count: 0,
            large_count: 0,
        }
    }

    /// Allocate at least `size` bytes.
    pub fn allocate(&mut self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }

        if size > MAX_BLOCK_SIZE {
            self.large_count += 1;
            tracing::debug!(size, "block allocator request above max class, using heap");
            return Block {
                words: vec![0; words_for(size)].into_boxed_slice(),
                class: None,
            };
        }

        let class = SIZE_MAP[size] as usize;
        if self.free_lists[class].is_empty() {
            self.carve_chunk(class);
        }
        let words = self.free_lists[class]
            .pop()
            .unwrap_or_else(|| vec![0; words_for(BLOCK_SIZES[class])].into_boxed_slice());
        Block {
            words,
            class: Some(class as u8),
        }
    }

    /// Allocate room for `count` values of `T`.
    #[inline]
    pub fn allocate_slice<T: Pod>(&mut self, count: usize) -> Block {
        self.allocate(count * std::mem::size_of::<T>())
    }

    /// Return a block to its free list. Heap-backed blocks are released.
    pub fn free(&mut self, block: Block) {
        match block.class {
            Some(class) => self.free_lists[class as usize].push(block.words),
            None => {
                if !block.words.is_empty() {
                    self.large_count -= 1;
                }
            }
        }
    }

    /// Replace `block` with one holding at least `count` values of `T`,
    /// copying the first `len` values across.
    pub fn grow<T: Pod>(&mut self, block: &mut Block, len: usize, count: usize) {
        let mut bigger = self.allocate_slice::<T>(count);
        bigger.as_mut_slice::<T>()[..len].copy_from_slice(&block.as_slice::<T>()[..len]);
        let old = std::mem::replace(block, bigger);
        self.free(old);
    }

    /// Drop every pooled block.
    pub fn clear(&mut self) {
        for list in &mut self.free_lists {
            list.clear();
        }
        self.chunk_count = 0;
    }

    /// Number of chunks carved so far.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of live heap-backed blocks.
    #[inline]
    pub fn large_count(&self) -> usize {
        self.large_count
    }

    /// Number of idle blocks in the free list serving `size` bytes.
    pub fn free_count(&self, size: usize) -> usize {
        if size == 0 || size > MAX_BLOCK_SIZE {
            return 0;
        }
        self.free_lists[SIZE_MAP[size] as usize].len()
    }

    fn carve_chunk(&mut self, class: usize) {
        let block_words = words_for(BLOCK_SIZES[class]);
        let block_count = CHUNK_SIZE / BLOCK_SIZES[class];
        let list = &mut self.free_lists[class];
        list.reserve(block_count);
        for _ in 0..block_count {
            list.push(vec![0; block_words].into_boxed_slice());
        }
        self.chunk_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_map_classes() {
        assert_eq!(SIZE_MAP[1], 0);
        assert_eq!(SIZE_MAP[16], 0);
        assert_eq!(SIZE_MAP[17], 1);
        assert_eq!(SIZE_MAP[640], (BLOCK_SIZE_COUNT - 1) as u8);
        for size in 1..=MAX_BLOCK_SIZE {
            assert!(BLOCK_SIZES[SIZE_MAP[size] as usize] >= size);
        }
    }

    #[test]
    fn test_allocate_rounds_up_to_class() {
        let mut allocator = BlockAllocator::new();
        let block = allocator.allocate(20);
        assert_eq!(block.size(), 32);
        assert!(!block.is_large());
        assert_eq!(allocator.chunk_count(), 1);
        allocator.free(block);
    }

    #[test]
    fn test_free_recycles_block() {
        let mut allocator = BlockAllocator::new();
        let block = allocator.allocate(64);
        let idle = allocator.free_count(64);
        allocator.free(block);
        assert_eq!(allocator.free_count(64), idle + 1);

        let again = allocator.allocate(64);
        assert_eq!(allocator.free_count(64), idle);
        assert_eq!(allocator.chunk_count(), 1);
        allocator.free(again);
    }

    #[test]
    fn test_large_request_uses_heap() {
        let mut allocator = BlockAllocator::new();
        let block = allocator.allocate(MAX_BLOCK_SIZE + 1);
        assert!(block.is_large());
        assert!(block.size() > MAX_BLOCK_SIZE);
        assert_eq!(allocator.large_count(), 1);
        assert_eq!(allocator.chunk_count(), 0);
        allocator.free(block);
        assert_eq!(allocator.large_count(), 0);
    }

    #[test]
    fn test_typed_slice_and_grow() {
        let mut allocator = BlockAllocator::new();
        let mut block = allocator.allocate_slice::<[f32; 3]>(4);
        assert!(block.capacity::<[f32; 3]>() >= 4);
        for (i, v) in block.as_mut_slice::<[f32; 3]>().iter_mut().take(4).enumerate() {
            *v = [i as f32; 3];
        }

        allocator.grow::<[f32; 3]>(&mut block, 4, 64);
        assert!(block.capacity::<[f32; 3]>() >= 64);
        let values = block.as_slice::<[f32; 3]>();
        for (i, v) in values.iter().take(4).enumerate() {
            assert_eq!(*v, [i as f32; 3]);
        }
        allocator.free(block);
    }

    #[test]
    fn test_zero_sized_request() {
        let mut allocator = BlockAllocator::new();
        let block = allocator.allocate(0);
        assert_eq!(block.size(), 0);
        assert!(!block.is_large());
        allocator.free(block);
        assert_eq!(allocator.large_count(), 0);
    }
}
