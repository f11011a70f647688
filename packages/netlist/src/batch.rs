use std::io::{self, IoSliceMut, Read};
use std::num::NonZero;
use std::slice;
use std::sync::Arc;

use parking_lot::MutexGuard;
use smallvec::SmallVec;
use tracing::trace;

use crate::{DataPacket, Netlist, Result, SlotId, allocate_table};

/// Number of slots a vectored read can address without a heap allocation.
const INLINE_BUFFERS: usize = 16;

/// Preallocated working memory of the one batch that may be outstanding at a time.
#[derive(Debug)]
pub(crate) struct BatchScratch {
    slots: Box<[SlotId]>,
    committed: Box<[usize]>,
}

impl BatchScratch {
    pub(crate) fn new(width: NonZero<usize>) -> Result<Self> {
        Ok(Self {
            slots: allocate_table(width.get(), SlotId::new(0), "batch slot list")?,
            committed: allocate_table(width.get(), 0, "batch descriptor list")?,
        })
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [SlotId] {
        &mut self.slots
    }
}

/// A contiguous run of free storage slots, reserved for one producer to fill.
///
/// Returned by [`Netlist::acquire_batch()`]. The slots stay on the slot free-list while the
/// batch exists, but nothing else can claim them. Fill them via [`read_from()`][1] or the
/// mutable slot views, then [`commit()`][2] to turn them into [`DataPacket`]s. Dropping the
/// batch without committing leaves every slot free.
///
/// Only one batch can exist per netlist at a time.
///
/// [1]: Self::read_from
/// [2]: Self::commit
#[derive(Debug)]
pub struct Batch<'n> {
    netlist: &'n Netlist,
    scratch: MutexGuard<'n, BatchScratch>,
    reserved: bool,
}

impl<'n> Batch<'n> {
    pub(crate) fn new(netlist: &'n Netlist, scratch: MutexGuard<'n, BatchScratch>) -> Self {
        Self {
            netlist,
            scratch,
            reserved: true,
        }
    }

    /// Number of slots in the batch. Always the batch width of the netlist.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scratch.slots.len()
    }

    /// Always `false`. A batch has at least one slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scratch.slots.is_empty()
    }

    /// The reserved slots, in the order they will be committed.
    ///
    /// No slot appears twice, even if the run wrapped around the end of the slot free-list.
    #[must_use]
    pub fn slots(&self) -> &[SlotId] {
        &self.scratch.slots
    }

    /// The storage of the slot at `position` in the batch.
    ///
    /// # Panics
    ///
    /// Panics if `position` is not less than [`len()`][Self::len].
    #[must_use]
    pub fn slot_mut(&mut self, position: usize) -> &mut [u8] {
        let slot = *self
            .scratch
            .slots
            .get(position)
            .expect("batch slot position out of bounds");

        let storage = &self.netlist.shared.storage;

        // SAFETY: The slot is reserved for this batch, so nobody else reads or writes it until
        // the batch is committed or dropped, both of which require the `&mut self` we hold.
        unsafe { slice::from_raw_parts_mut(storage.slot_ptr(slot).as_ptr(), storage.slot_size()) }
    }

    /// The storage of every slot in the batch, in order.
    pub fn buffers_mut(&mut self) -> impl ExactSizeIterator<Item = &mut [u8]> {
        let storage = &self.netlist.shared.storage;
        let slot_size = storage.slot_size();

        self.scratch.slots.iter().map(move |&slot| {
            // SAFETY: As in `slot_mut()`. The slots of a batch are distinct, so the slices do
            // not overlap.
            unsafe { slice::from_raw_parts_mut(storage.slot_ptr(slot).as_ptr(), slot_size) }
        })
    }

    /// Fills the slots from `source` with a single vectored read.
    ///
    /// Returns the number of bytes read, which may be anything up to the combined size of the
    /// slots. Use [`commit_partial()`][1] to commit only the slots that received data.
    ///
    /// # Errors
    ///
    /// Forwards any error from the reader.
    ///
    /// [1]: Self::commit_partial
    pub fn read_from<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<usize> {
        let mut buffers = self
            .buffers_mut()
            .map(IoSliceMut::new)
            .collect::<SmallVec<[IoSliceMut<'_>; INLINE_BUFFERS]>>();

        let bytes = source.read_vectored(&mut buffers)?;

        trace!(bytes, "batch read");

        Ok(bytes)
    }

    /// Binds every slot of the batch to a fresh data packet and appends the packets to `packets`
    /// in slot order.
    ///
    /// Each packet covers its whole slot and holds the only reference to it.
    pub fn commit<E: Extend<DataPacket>>(self, packets: &mut E) {
        let count = self.len();
        self.commit_partial(count, packets);
    }

    /// Binds the first `count` slots of the batch to fresh data packets and appends them to
    /// `packets`. The remaining slots stay free.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds [`len()`][Self::len].
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Cursor;
    ///
    /// use netlist::Netlist;
    /// use new_zealand::nz;
    ///
    /// let netlist = Netlist::builder()
    ///     .slot_size(nz!(188_usize))
    ///     .batch_width(nz!(7_usize))
    ///     .build()?;
    ///
    /// // Only enough data for two transport stream packets.
    /// let mut source = Cursor::new(vec![0x47_u8; 2 * 188]);
    ///
    /// let mut batch = netlist.acquire_batch()?;
    /// let bytes = batch.read_from(&mut source)?;
    ///
    /// let mut packets = Vec::new();
    /// batch.commit_partial(bytes.div_ceil(netlist.slot_size()), &mut packets);
    ///
    /// assert_eq!(packets.len(), 2);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn commit_partial<E: Extend<DataPacket>>(mut self, count: usize, packets: &mut E) {
        assert!(
            count <= self.len(),
            "cannot commit {count} slots from a batch of {}",
            self.len()
        );

        let netlist = self.netlist;
        let shared = &netlist.shared;
        let BatchScratch { slots, committed } = &mut *self.scratch;

        let expected = slots.get(..count).expect("guarded by the assertion above");
        let committed = committed
            .get_mut(..count)
            .expect("guarded by the assertion above");

        shared.commit_batch(expected, committed);
        self.reserved = false;

        packets.extend(
            committed
                .iter()
                .map(|&index| DataPacket::new(Arc::clone(shared), index)),
        );
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if self.reserved {
            self.netlist.shared.cancel_batch();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::io::Cursor;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Batch<'static>: Sync);
    assert_not_impl_any!(Batch<'static>: Send);

    fn netlist() -> Netlist {
        Netlist::builder()
            .slot_count(8)
            .data_count(8)
            .unit_count(2)
            .slot_size(nz!(4_usize))
            .batch_width(nz!(3_usize))
            .build()
            .unwrap()
    }

    #[test]
    fn slots_are_distinct() {
        let netlist = netlist();

        let batch = netlist.acquire_batch().unwrap();
        let slots = batch.slots();

        assert_eq!(slots.len(), 3);
        assert_ne!(slots[0], slots[1]);
        assert_ne!(slots[1], slots[2]);
        assert_ne!(slots[0], slots[2]);
    }

    #[test]
    fn read_spans_slots_in_order() {
        let netlist = netlist();

        let mut batch = netlist.acquire_batch().unwrap();
        let mut source = Cursor::new(b"aaaabbbbcccc".to_vec());

        assert_eq!(batch.read_from(&mut source).unwrap(), 12);

        let mut packets = Vec::new();
        batch.commit(&mut packets);

        let payloads = packets.iter().map(|p| p.payload()).collect::<Vec<_>>();
        assert_eq!(payloads, vec![b"aaaa", b"bbbb", b"cccc"]);
    }

    #[test]
    fn slot_mut_writes_reach_packets() {
        let netlist = netlist();

        let mut batch = netlist.acquire_batch().unwrap();
        batch.slot_mut(2).copy_from_slice(b"last");

        for buffer in batch.buffers_mut().take(2) {
            buffer.fill(b'-');
        }

        let mut packets = Vec::new();
        batch.commit(&mut packets);

        assert_eq!(packets[0].payload(), b"----");
        assert_eq!(packets[2].payload(), b"last");
    }

    #[test]
    fn partial_commit_leaves_rest_free() {
        let netlist = netlist();

        let batch = netlist.acquire_batch().unwrap();
        let slots = batch.slots().to_vec();

        let mut packets = Vec::new();
        batch.commit_partial(1, &mut packets);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].slot(), slots[0]);
        assert_eq!(netlist.free_slots(), 6);
        assert_eq!(netlist.free_data(), 6);

        // The uncommitted slots lead the next batch.
        let next = netlist.acquire_batch().unwrap();
        assert_eq!(&next.slots()[..2], &slots[1..]);
    }

    #[test]
    fn zero_commit_is_same_as_drop() {
        let netlist = netlist();

        let batch = netlist.acquire_batch().unwrap();

        let mut packets = Vec::new();
        batch.commit_partial(0, &mut packets);

        assert!(packets.is_empty());
        assert_eq!(netlist.free_slots(), 7);
        assert_eq!(netlist.free_data(), 7);
    }

    #[test]
    #[should_panic]
    fn over_commit_panics() {
        let netlist = netlist();

        let batch = netlist.acquire_batch().unwrap();
        batch.commit_partial(4, &mut Vec::<DataPacket>::new());
    }

    #[test]
    #[should_panic]
    fn slot_mut_out_of_bounds_panics() {
        let netlist = netlist();

        let mut batch = netlist.acquire_batch().unwrap();
        _ = batch.slot_mut(3);
    }
}
