/// Fixed-capacity ring buffer backed by an inline array.
///
/// `N` is the arena size; `limit` (at most `N`) is the active length chosen at
/// construction. Pushing into a full buffer overwrites the oldest entry.
/// Indexing is oldest-first and bounds checked.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T, const N: usize> {
    slots: [T; N],
    limit: usize,
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    /// Creates an empty buffer using the full arena.
    pub fn new() -> Self {
        Self::with_limit(N)
    }

    /// Creates an empty buffer holding at most `limit` values, clamped to
    /// `1..=N`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: [T::default(); N],
            limit: limit.clamp(1, N.max(1)),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.limit
    }

    /// Appends `value`, returning the entry it displaced when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() {
            Some(self.slots[self.head])
        } else {
            self.len += 1;
            None
        };
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.limit;
        evicted
    }

    /// Value at `index`, counted from the oldest entry.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let start = (self.head + self.limit - self.len) % self.limit;
        self.slots.get((start + index) % self.limit).copied()
    }

    pub fn latest(&self) -> Option<T> {
        self.len.checked_sub(1).and_then(|last| self.get(last))
    }

    pub fn oldest(&self) -> Option<T> {
        self.get(0)
    }

    /// Iterates from the oldest to the newest entry.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }

    /// Copies the live entries, oldest first, into `out` and returns how many
    /// were written.
    pub fn copy_into(&self, out: &mut [T]) -> usize {
        let mut written = 0;
        for (slot, value) in out.iter_mut().zip(self.iter()) {
            *slot = value;
            written += 1;
        }
        written
    }

    /// Fills every active slot with `value`, leaving the buffer full.
    pub fn fill(&mut self, value: T) {
        for slot in &mut self.slots[..self.limit] {
            *slot = value;
        }
        self.head = 0;
        self.len = self.limit;
    }

    /// Empties the buffer and zeroes its storage.
    pub fn clear(&mut self) {
        self.slots = [T::default(); N];
        self.head = 0;
        self.len = 0;
    }
}
