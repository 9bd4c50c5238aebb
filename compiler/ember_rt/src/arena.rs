//! Block arena backing both per-thread variable stacks.
//!
//! Slots live in fixed-capacity blocks. Each block is a `Vec` whose capacity
//! is reserved when the block is created and never exceeded, so pushing a
//! slot never moves another one: a [`SlotId`] stays valid until its slot is
//! popped. The first block is allocated up front and kept for the life of the
//! arena; every other block is freed as soon as it empties.
//!
//! The arena is owned by a single thread and takes no locks. Popping is
//! strictly LIFO; out-of-order release is a caller bug caught by debug
//! assertions in the stacks built on top of this type.

/// Slot size used when no configuration is supplied.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Index of a slot in a [`SlotArena`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct SlotId(u32);

impl SlotId {
    #[inline]
    fn new(index: usize) -> Self {
        // 4 billion live slots on one thread is not a state we can reach
        // without exhausting memory first.
        SlotId(u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Position of the slot from the bottom of its stack.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed-block LIFO arena.
#[derive(Debug)]
pub struct SlotArena<T> {
    blocks: Vec<Vec<T>>,
    block_size: usize,
    len: usize,
}

impl<T> SlotArena<T> {
    /// Create an arena with [`DEFAULT_BLOCK_SIZE`]-slot blocks.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an arena whose blocks hold `block_size` slots (at least one).
    pub fn with_block_size(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        SlotArena {
            blocks: vec![Vec::with_capacity(block_size)],
            block_size,
            len: 0,
        }
    }

    /// Push a slot, opening a new block when the current one is full.
    pub fn instantiate(&mut self, value: T) -> SlotId {
        let block_size = self.block_size;
        let needs_block = self.blocks.last().map_or(true, |b| b.len() == block_size);
        if needs_block {
            self.blocks.push(Vec::with_capacity(block_size));
        }
        let id = SlotId::new(self.len);
        if let Some(block) = self.blocks.last_mut() {
            debug_assert!(block.len() < block.capacity(), "arena block would relocate");
            block.push(value);
        }
        self.len += 1;
        id
    }

    /// Pop the most recently instantiated slot.
    ///
    /// Returns `None` only on an empty arena.
    pub fn uninstantiate(&mut self) -> Option<T> {
        let block = self.blocks.last_mut()?;
        let value = block.pop()?;
        self.len -= 1;
        if block.is_empty() && self.blocks.len() > 1 {
            self.blocks.pop();
        }
        Some(value)
    }

    /// Handle of the top slot.
    #[inline]
    pub fn top(&self) -> Option<SlotId> {
        self.len.checked_sub(1).map(SlotId::new)
    }

    #[inline]
    fn locate(&self, id: SlotId) -> (usize, usize) {
        (id.index() / self.block_size, id.index() % self.block_size)
    }

    /// Borrow a live slot.
    #[inline]
    pub fn get(&self, id: SlotId) -> Option<&T> {
        let (block, offset) = self.locate(id);
        self.blocks.get(block)?.get(offset)
    }

    /// Mutably borrow a live slot.
    #[inline]
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        let (block, offset) = self.locate(id);
        self.blocks.get_mut(block)?.get_mut(offset)
    }

    /// Live slots from the top of the stack down.
    pub fn iter_rev(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        let block_size = self.block_size;
        self.blocks
            .iter()
            .enumerate()
            .rev()
            .flat_map(move |(b, block)| {
                let base = b * block_size;
                block
                    .iter()
                    .enumerate()
                    .rev()
                    .map(move |(offset, slot)| (SlotId::new(base + offset), slot))
            })
    }

    /// Number of live slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated blocks (never below one).
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
