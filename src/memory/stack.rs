//! LIFO scratch allocator.
//!
//! A fixed region is carved from the bottom up; requests that do not fit
//! spill to the heap. Blocks must be freed in exact reverse order of
//! allocation: [`StackAllocator::free`] rejects anything else.
//!
//! Blocks are plain handles. To work on several blocks at once, open a
//! [`StackView`] and [`take`](StackView::take) each block as a typed slice.

use bytemuck::Pod;

use crate::error::{PhysicsError, Result};

use super::{words_for, Word};

/// Size of the fixed scratch region in bytes.
pub const STACK_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug)]
struct StackEntry {
    /// Offset into the region in words. Unused for heap entries.
    offset: usize,
    words: usize,
    elem_size: usize,
    serial: u64,
    heap: Option<Box<[Word]>>,
}

/// Handle to a live stack allocation of `len` elements.
///
/// Each allocation carries a serial, so a handle whose entry has already been
/// freed is rejected even if a newer block reuses its index.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "stack blocks must be freed in reverse allocation order"]
pub struct StackBlock {
    index: usize,
    len: usize,
    elem_size: usize,
    serial: u64,
}

impl StackBlock {
    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position in the allocation stack (0 = oldest live entry).
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Fixed-region LIFO allocator.
#[derive(Debug)]
pub struct StackAllocator {
    region: Box<[Word]>,
    capacity: usize,
    /// First free word of the region.
    top: usize,
    entries: Vec<StackEntry>,
    next_serial: u64,
    allocation: usize,
    max_allocation: usize,
}

impl Default for StackAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StackAllocator {
    /// Allocator with the standard [`STACK_SIZE`] region. The region itself is
    /// allocated on first use.
    pub fn new() -> Self {
        Self::with_capacity(STACK_SIZE)
    }

    /// Allocator with a custom region size in bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            region: Box::default(),
            capacity: words_for(bytes),
            top: 0,
            entries: Vec::new(),
            next_serial: 0,
            allocation: 0,
            max_allocation: 0,
        }
    }

    /// Allocate room for `count` values of `T`. Contents are unspecified.
    pub fn allocate<T: Pod>(&mut self, count: usize) -> StackBlock {
        let elem_size = std::mem::size_of::<T>();
        let words = words_for(count * elem_size);

        if self.region.is_empty() && self.capacity > 0 {
            self.region = vec![0; self.capacity].into_boxed_slice();
        }

        let heap = if self.top + words > self.capacity {
            tracing::warn!(
                bytes = words * std::mem::size_of::<Word>(),
                "stack allocator region exhausted, spilling to heap"
            );
            Some(vec![0; words].into_boxed_slice())
        } else {
            None
        };

        let offset = self.top;
        if heap.is_none() {
            self.top += words;
        }
        self.allocation += words * std::mem::size_of::<Word>();
        self.max_allocation = self.max_allocation.max(self.allocation);

        let index = self.entries.len();
        let serial = self.next_serial;
        self.next_serial += 1;
        self.entries.push(StackEntry {
            offset,
            words,
            elem_size,
            serial,
            heap,
        });

        StackBlock {
            index,
            len: count,
            elem_size,
            serial,
        }
    }

    /// Free the most recent allocation.
    ///
    /// Freeing a block below the top fails with [`PhysicsError::StackOrder`]
    /// and leaves it allocated, so the caller can free it later. A handle
    /// that was already freed fails with [`PhysicsError::StaleStackBlock`].
    pub fn free(&mut self, block: &StackBlock) -> Result<()> {
        if !self.is_live(block) {
            return Err(PhysicsError::StaleStackBlock(block.index));
        }
        let expected = self.entries.len() - 1;
        if block.index != expected {
            return Err(PhysicsError::StackOrder {
                expected,
                actual: block.index,
            });
        }

        if let Some(entry) = self.entries.pop() {
            if entry.heap.is_none() {
                self.top -= entry.words;
            }
            self.allocation -= entry.words * std::mem::size_of::<Word>();
        }
        Ok(())
    }

    /// Whether `block` still names a live allocation.
    pub fn is_live(&self, block: &StackBlock) -> bool {
        self.entries
            .get(block.index)
            .is_some_and(|entry| entry.serial == block.serial)
    }

    /// Typed access to a single block.
    pub fn slice_mut<T: Pod>(&mut self, block: &StackBlock) -> Result<&mut [T]> {
        let mut view = self.view();
        view.take(block)
    }

    /// Open a view that can hand out every live block at once.
    pub fn view(&mut self) -> StackView<'_> {
        let mut slots = Vec::with_capacity(self.entries.len());
        let mut rest: &mut [Word] = &mut self.region[..self.top];
        let mut cursor = 0;

        for entry in self.entries.iter_mut() {
            let slot = match entry.heap.as_mut() {
                Some(heap) => StackSlot {
                    words: Some(&mut heap[..]),
                    elem_size: entry.elem_size,
                    serial: entry.serial,
                },
                None => {
                    let (_, tail) = std::mem::take(&mut rest).split_at_mut(entry.offset - cursor);
                    let (head, tail) = tail.split_at_mut(entry.words);
                    rest = tail;
                    cursor = entry.offset + entry.words;
                    StackSlot {
                        words: Some(head),
                        elem_size: entry.elem_size,
                        serial: entry.serial,
                    }
                }
            };
            slots.push(slot);
        }

        StackView { slots }
    }

    /// Bytes currently allocated, including heap spills.
    #[inline]
    pub fn allocation(&self) -> usize {
        self.allocation
    }

    /// High-water mark of [`allocation`](Self::allocation).
    #[inline]
    pub fn max_allocation(&self) -> usize {
        self.max_allocation
    }

    /// Number of live blocks.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug)]
struct StackSlot<'a> {
    words: Option<&'a mut [Word]>,
    elem_size: usize,
    serial: u64,
}

/// Simultaneous mutable access to disjoint stack blocks.
///
/// Each block can be taken once per view.
#[derive(Debug)]
pub struct StackView<'a> {
    slots: Vec<StackSlot<'a>>,
}

impl<'a> StackView<'a> {
    /// Borrow `block` as a slice of `T` for the lifetime of the view.
    pub fn take<T: Pod>(&mut self, block: &StackBlock) -> Result<&'a mut [T]> {
        let elem_size = std::mem::size_of::<T>();
        if elem_size != block.elem_size {
            return Err(PhysicsError::StackLayout {
                index: block.index,
                expected: block.elem_size,
                actual: elem_size,
            });
        }

        let slot = self
            .slots
            .get_mut(block.index)
            .filter(|slot| slot.serial == block.serial)
            .ok_or(PhysicsError::StaleStackBlock(block.index))?;
        let words = slot
            .words
            .take()
            .ok_or(PhysicsError::StackBlockTaken(block.index))?;

        let bytes: &'a mut [u8] = bytemuck::cast_slice_mut(words);
        Ok(bytemuck::cast_slice_mut(&mut bytes[..block.len * elem_size]))
    }

    /// Number of blocks visible through this view.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Element size the block at `index` was allocated with.
    pub fn elem_size(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|slot| slot.elem_size)
    }
}
