use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::{Error, Result, SlotId};

/// How a descriptor is attached to storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Binding {
    /// Never bound. Only possible for descriptors of a netlist without pre-binding that have not
    /// yet been handed out.
    Unbound,

    /// Bound to its own slot when the netlist was built. Does not count as a slot reference.
    Prebound(SlotId),

    /// Bound to a slot claimed from the slot free-list. Counts as one reference to the slot.
    Counted(SlotId),
}

/// A view into one storage slot: the payload bounds within the slot plus bookkeeping for
/// chaining the descriptor into a [`Unit`][crate::Unit].
///
/// You reach a descriptor through a [`DataPacket`][crate::DataPacket] (which dereferences to
/// it) or by iterating over the packets of a [`Unit`][crate::Unit].
pub struct Descriptor {
    /// First byte of the bound slot. Dangling while unbound.
    base: NonNull<u8>,
    slot_size: usize,
    binding: Binding,

    payload_start: usize,
    payload_end: usize,

    /// The next descriptor in the chain of the unit that owns this descriptor.
    next: Option<usize>,

    discard: bool,
}

// SAFETY: The base pointer refers to netlist storage, which is not tied to any thread. The
// netlist only hands the descriptor to one owner at a time.
unsafe impl Send for Descriptor {}
// SAFETY: Shared access only reads the payload bytes. Writing to them requires exclusive access
// to the owning `DataPacket` and that no other descriptor refers to the same slot.
unsafe impl Sync for Descriptor {}

impl Descriptor {
    pub(crate) fn unbound() -> Self {
        Self {
            base: NonNull::dangling(),
            slot_size: 0,
            binding: Binding::Unbound,
            payload_start: 0,
            payload_end: 0,
            next: None,
            discard: false,
        }
    }

    pub(crate) fn prebound(slot: SlotId, base: NonNull<u8>, slot_size: usize) -> Self {
        Self {
            base,
            slot_size,
            binding: Binding::Prebound(slot),
            payload_start: 0,
            payload_end: slot_size,
            next: None,
            discard: false,
        }
    }

    /// Binds the descriptor to a slot it holds a counted reference to, with the payload
    /// covering the first `payload_len` bytes.
    pub(crate) fn bind_counted(
        &mut self,
        slot: SlotId,
        base: NonNull<u8>,
        slot_size: usize,
        payload_len: usize,
    ) {
        debug_assert!(payload_len <= slot_size);

        self.base = base;
        self.slot_size = slot_size;
        self.binding = Binding::Counted(slot);
        self.payload_start = 0;
        self.payload_end = payload_len;
        self.next = None;
        self.discard = false;
    }

    /// Makes this descriptor a second view of the same slot as `other`, with the same bounds.
    pub(crate) fn bind_shared(&mut self, other: &Self) {
        self.base = other.base;
        self.slot_size = other.slot_size;
        self.binding = other.binding;
        self.payload_start = other.payload_start;
        self.payload_end = other.payload_end;
        self.next = None;
        self.discard = false;
    }

    /// Restores the payload bounds to the full slot extent and clears the link and discard flag.
    pub(crate) fn reset(&mut self) {
        self.payload_start = 0;
        self.payload_end = self.slot_size;
        self.next = None;
        self.discard = false;
    }

    pub(crate) fn binding(&self) -> Binding {
        self.binding
    }

    pub(crate) fn next(&self) -> Option<usize> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<usize>) {
        self.next = next;
    }

    pub(crate) fn set_payload_bounds(&mut self, start: usize, end: usize) {
        assert!(
            start <= end && end <= self.slot_size,
            "payload bounds {start}..{end} do not fit in a {} byte slot",
            self.slot_size
        );

        self.payload_start = start;
        self.payload_end = end;
    }

    pub(crate) fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
    }

    /// The slot this descriptor is a view into.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor was never bound. Descriptors are always bound before the netlist
    /// hands them out, so this indicates a bug in the netlist.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        match self.binding {
            Binding::Prebound(slot) | Binding::Counted(slot) => slot,
            Binding::Unbound => panic!("descriptor was handed out without being bound to a slot"),
        }
    }

    /// Offset of the first payload byte within the slot.
    #[must_use]
    pub fn payload_start(&self) -> usize {
        self.payload_start
    }

    /// Offset one past the last payload byte within the slot.
    #[must_use]
    pub fn payload_end(&self) -> usize {
        self.payload_end
    }

    /// Number of payload bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        // Cannot underflow: every setter keeps start <= end.
        self.payload_end.wrapping_sub(self.payload_start)
    }

    /// Whether the consumer has marked the payload as one to skip.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discard
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        if self.binding == Binding::Unbound {
            return &[];
        }

        // SAFETY: A bound descriptor points at a live slot of `slot_size` bytes and the bounds
        // are kept within the slot. Nobody writes to the slot while a shared reference to a
        // descriptor bound to it exists - see `DataPacket::payload_mut()`.
        unsafe {
            slice::from_raw_parts(
                self.base.add(self.payload_start).as_ptr(),
                self.payload_len(),
            )
        }
    }

    /// # Safety
    ///
    /// The caller must guarantee that no other reference to the bytes of the bound slot exists
    /// for the lifetime of the returned slice.
    pub(crate) unsafe fn payload_mut_unchecked(&mut self) -> &mut [u8] {
        if self.binding == Binding::Unbound {
            return &mut [];
        }

        // SAFETY: Bounds as in `payload()`, exclusivity is forwarded to our caller.
        unsafe {
            slice::from_raw_parts_mut(
                self.base.add(self.payload_start).as_ptr(),
                self.payload_len(),
            )
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("binding", &self.binding)
            .field("payload_start", &self.payload_start)
            .field("payload_end", &self.payload_end)
            .field("next", &self.next)
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

/// The fixed table of data-packet descriptors of a netlist.
///
/// The table itself does not know who owns which descriptor. Ownership of an index is held by
/// exactly one of: the data free-list, a `DataPacket`, or the chain of a `Unit`, and only that
/// owner may dereference the pointer returned by [`get()`][Self::get].
pub(crate) struct DescriptorTable {
    cells: Box<[UnsafeCell<Descriptor>]>,
}

// SAFETY: Each descriptor is only accessed by the single owner of its index, see type docs.
unsafe impl Sync for DescriptorTable {}

impl DescriptorTable {
    pub(crate) fn new(count: usize, mut init: impl FnMut(usize) -> Descriptor) -> Result<Self> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(count)
            .map_err(|_| Error::Allocation {
                what: "data descriptor table",
                bytes: count.saturating_mul(size_of::<Descriptor>()),
            })?;

        cells.extend((0..count).map(|index| UnsafeCell::new(init(index))));

        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    /// Pointer to one descriptor. Only the owner of the index may dereference it.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub(crate) fn get(&self, index: usize) -> NonNull<Descriptor> {
        let cell = self
            .cells
            .get(index)
            .expect("descriptor indexes are issued by the netlist and always in bounds");

        NonNull::new(cell.get()).expect("UnsafeCell never yields a null pointer")
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("len", &self.cells.len())
            .finish()
    }
}
