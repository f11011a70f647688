use crate::{Error, Result};

/// Rounds a requested item count up to the power-of-two capacity used by a [`Ring`].
///
/// Zero and one both become one. Fails if the next power of two does not fit in `usize`.
pub(crate) fn ring_capacity(requested: usize, what: &str) -> Result<usize> {
    requested
        .max(1)
        .checked_next_power_of_two()
        .ok_or_else(|| Error::InvalidConfiguration {
            problem: format!("{what} count {requested} cannot be rounded to a power of two"),
        })
}

/// A bounded circular free-list of `Copy` handles with power-of-two capacity.
///
/// The live region is `entries[start..end]` taken modulo the capacity, so the number of
/// available entries is `(end - start) & mask`. The entry at `end` is parked: it is owned by the
/// ring but cannot be popped until another entry is pushed behind it. This sacrifices one entry
/// to tell "empty" from "full" without a separate counter, so at most `capacity - 1` entries can
/// ever be taken out at once.
///
/// The entry array may be longer than the capacity. The extra `padding` entries are a scratch
/// area that [`contiguous()`][Self::contiguous] uses to present a wrapped run of entries as one
/// contiguous slice.
#[derive(Debug)]
pub(crate) struct Ring<T> {
    entries: Box<[T]>,

    /// `capacity - 1`, used instead of modulo arithmetic.
    mask: usize,

    start: usize,
    end: usize,
}

impl<T: Copy> Ring<T> {
    /// Creates a full ring, with entry `i` initialized to `fill(i)`.
    ///
    /// `capacity` must be a power of two, as produced by [`ring_capacity()`].
    pub(crate) fn new(
        capacity: usize,
        padding: usize,
        what: &'static str,
        mut fill: impl FnMut(usize) -> T,
    ) -> Result<Self> {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity {capacity} must be a power of two"
        );

        let mask = capacity.wrapping_sub(1);

        let total = capacity
            .checked_add(padding)
            .ok_or_else(|| Error::InvalidConfiguration {
                problem: format!("{what} ring of {capacity} entries cannot hold {padding} more"),
            })?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(total)
            .map_err(|_| Error::Allocation {
                what,
                bytes: total.saturating_mul(size_of::<T>()),
            })?;

        // The padding mirrors the head of the ring. Its contents only matter once `contiguous()`
        // has copied over them, this merely gives every entry a valid value.
        entries.extend((0..total).map(|index| fill(index & mask)));

        Ok(Self {
            entries: entries.into_boxed_slice(),
            mask,
            start: 0,
            end: mask,
        })
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.mask.wrapping_add(1)
    }

    #[must_use]
    pub(crate) fn mask(&self) -> usize {
        self.mask
    }

    /// Number of entries that can currently be taken from the ring.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.end.wrapping_sub(self.start) & self.mask
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Takes the oldest available entry.
    pub(crate) fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let value = self.entry(self.start);
        self.start = self.start.wrapping_add(1) & self.mask;

        Some(value)
    }

    /// Takes the newest available entry, leaving the oldest entries where they are.
    ///
    /// The parked entry at `end` moves down into the vacated position so it stays owned by
    /// the ring.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let last = self.end.wrapping_sub(1) & self.mask;
        let value = self.entry(last);
        let parked = self.entry(self.end);

        *self.entry_mut(last) = parked;
        self.end = last;

        Some(value)
    }

    /// Returns an entry to the ring.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the ring is already holding every entry, which means the
    /// caller returned something the ring never handed out.
    pub(crate) fn push(&mut self, value: T) {
        debug_assert!(
            self.len() < self.mask,
            "pushed an entry into a ring that was already full"
        );

        self.end = self.end.wrapping_add(1) & self.mask;
        *self.entry_mut(self.end) = value;
    }

    /// Returns the next `count` available entries as one contiguous slice, starting with the
    /// oldest. The entries stay in the ring.
    ///
    /// If the run wraps past the physical end of the ring, the wrapped part is first copied
    /// into the padding area so the slice does not need to be reordered.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `count` entries are available or `count` exceeds the padding.
    pub(crate) fn contiguous(&mut self, count: usize) -> &[T] {
        assert!(
            count <= self.len(),
            "asked for {count} contiguous entries but only {} are available",
            self.len()
        );

        let capacity = self.capacity();
        let run_end = self
            .start
            .checked_add(count)
            .expect("start is below capacity and count is below capacity, so this cannot overflow");

        assert!(
            run_end <= self.entries.len(),
            "ring padding is too small for a run of {count} entries"
        );

        if run_end > capacity {
            let wrapped = run_end.wrapping_sub(capacity);
            self.entries.copy_within(0..wrapped, capacity);
        }

        self.entries
            .get(self.start..run_end)
            .expect("guarded by the padding assertion above")
    }

    /// Iterates over every entry the ring owns: the available entries from oldest to newest,
    /// followed by the parked entry.
    #[cfg(test)]
    pub(crate) fn owned(&self) -> impl Iterator<Item = T> + '_ {
        (0..=self.len()).map(|offset| self.entry(self.start.wrapping_add(offset) & self.mask))
    }

    fn entry(&self, index: usize) -> T {
        *self
            .entries
            .get(index)
            .expect("ring indexes are always masked to the capacity")
    }

    fn entry_mut(&mut self, index: usize) -> &mut T {
        self.entries
            .get_mut(index)
            .expect("ring indexes are always masked to the capacity")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn identity_ring(capacity: usize, padding: usize) -> Ring<usize> {
        Ring::new(capacity, padding, "test", |index| index).unwrap()
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(ring_capacity(0, "test").unwrap(), 1);
        assert_eq!(ring_capacity(1, "test").unwrap(), 1);
        assert_eq!(ring_capacity(2, "test").unwrap(), 2);
        assert_eq!(ring_capacity(3, "test").unwrap(), 4);
        assert_eq!(ring_capacity(4, "test").unwrap(), 4);
        assert_eq!(ring_capacity(1000, "test").unwrap(), 1024);
    }

    #[test]
    fn capacity_overflow_is_error() {
        let result = ring_capacity(usize::MAX, "test");
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn starts_full_minus_one() {
        let ring = identity_ring(8, 0);

        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.mask(), 7);
        assert_eq!(ring.len(), 7);
        assert!(!ring.is_empty());
    }

    #[test]
    fn single_entry_ring_is_always_empty() {
        let mut ring = identity_ring(1, 0);

        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.pop_front(), None);
        assert_eq!(ring.pop_back(), None);
    }

    #[test]
    fn pops_in_order_until_empty() {
        let mut ring = identity_ring(4, 0);

        assert_eq!(ring.pop_front(), Some(0));
        assert_eq!(ring.pop_front(), Some(1));
        assert_eq!(ring.pop_front(), Some(2));
        assert_eq!(ring.pop_front(), None);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn push_unparks_previous_end() {
        let mut ring = identity_ring(4, 0);

        // Entry 3 is parked at `end` to begin with.
        assert_eq!(ring.pop_front(), Some(0));
        assert_eq!(ring.pop_front(), Some(1));
        assert_eq!(ring.pop_front(), Some(2));

        ring.push(0);
        assert_eq!(ring.len(), 1);

        // Pushing 0 parked it and released 3.
        assert_eq!(ring.pop_front(), Some(3));
        assert_eq!(ring.pop_front(), None);

        ring.push(1);
        assert_eq!(ring.pop_front(), Some(0));
    }

    #[test]
    fn indexes_wrap_many_times() {
        let mut ring = identity_ring(4, 0);

        for _ in 0..100 {
            let value = ring.pop_front().unwrap();
            ring.push(value);
            assert_eq!(ring.len(), 3);
        }

        let mut owned = ring.owned().collect::<Vec<_>>();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 1, 2, 3]);
    }

    #[test]
    fn pop_back_keeps_parked_entry() {
        let mut ring = identity_ring(4, 0);

        assert_eq!(ring.pop_back(), Some(2));
        assert_eq!(ring.len(), 2);

        let mut owned = ring.owned().collect::<Vec<_>>();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 1, 3]);

        ring.push(2);
        assert_eq!(ring.len(), 3);

        let mut owned = ring.owned().collect::<Vec<_>>();
        owned.sort_unstable();
        assert_eq!(owned, vec![0, 1, 2, 3]);
    }

    #[test]
    fn contiguous_without_wrap_is_plain_view() {
        let mut ring = identity_ring(8, 4);

        assert_eq!(ring.contiguous(4), &[0, 1, 2, 3]);

        // Looking does not consume.
        assert_eq!(ring.len(), 7);
    }

    #[test]
    fn contiguous_copies_wrapped_prefix_into_padding() {
        let mut ring = identity_ring(8, 4);

        for _ in 0..6 {
            let value = ring.pop_front().unwrap();
            ring.push(value);
        }

        // start is now 6, so a run of 4 covers physical 6, 7, 0, 1.
        let expected = [6, 7, 0, 1];
        assert_eq!(ring.contiguous(4), &expected);
        assert_eq!(ring.pop_front(), Some(6));
        assert_eq!(ring.pop_front(), Some(7));
        assert_eq!(ring.pop_front(), Some(0));
        assert_eq!(ring.pop_front(), Some(1));
    }

    #[test]
    #[should_panic]
    fn contiguous_beyond_available_panics() {
        let mut ring = identity_ring(4, 4);

        _ = ring.contiguous(4);
    }

    #[test]
    #[should_panic]
    fn contiguous_beyond_padding_panics() {
        let mut ring = identity_ring(8, 1);

        for _ in 0..6 {
            let value = ring.pop_front().unwrap();
            ring.push(value);
        }

        _ = ring.contiguous(4);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn push_into_full_ring_panics() {
        let mut ring = identity_ring(4, 0);

        ring.push(0);
    }
}
