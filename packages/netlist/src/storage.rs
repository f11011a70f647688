use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Error, Result};

/// Identifies one fixed-size storage slot of a [`Netlist`][crate::Netlist].
///
/// Slot identifiers are only meaningful for the netlist that issued them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SlotId(usize);

impl SlotId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The position of the slot in the storage block, from zero up to the slot capacity.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// One contiguous heap block holding every storage slot of a netlist back to back.
///
/// The block is zeroed on allocation so every byte is always initialized. The storage itself
/// does not track who may read or write a slot - that is decided by the slot bookkeeping in the
/// netlist, and all access goes through raw pointers obtained from [`slot_ptr()`][1].
///
/// [1]: Self::slot_ptr
pub(crate) struct Storage {
    ptr: NonNull<u8>,
    layout: Layout,
    slot_size: NonZero<usize>,
    slot_count: usize,
}

// SAFETY: The storage is a plain byte block that is not tied to any thread. Access to the bytes
// is coordinated by the netlist, which only hands out a slot for writing to one owner at a time.
unsafe impl Send for Storage {}
// SAFETY: See above. Shared access only produces raw pointers, never references.
unsafe impl Sync for Storage {}

impl Storage {
    pub(crate) fn new(slot_count: usize, slot_size: NonZero<usize>) -> Result<Self> {
        assert!(slot_count > 0, "storage must have at least one slot");

        let bytes = slot_count
            .checked_mul(slot_size.get())
            .ok_or_else(|| Error::InvalidConfiguration {
                problem: format!("{slot_count} slots of {slot_size} bytes overflow usize"),
            })?;

        let layout = Layout::array::<u8>(bytes).map_err(|_| Error::InvalidConfiguration {
            problem: format!("{bytes} bytes of storage exceed the maximum allocation size"),
        })?;

        // SAFETY: The layout is not zero-sized because both the slot count and the slot size
        // are non-zero.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::Allocation {
            what: "storage",
            bytes,
        })?;

        Ok(Self {
            ptr,
            layout,
            slot_size,
            slot_count,
        })
    }

    #[must_use]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size.get()
    }

    /// Pointer to the first byte of a slot. The slot extends for `slot_size()` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of bounds.
    #[must_use]
    pub(crate) fn slot_ptr(&self, slot: SlotId) -> NonNull<u8> {
        assert!(
            slot.index() < self.slot_count,
            "{slot} is out of bounds in storage of {} slots",
            self.slot_count
        );

        // Cannot overflow: guarded by the bounds check and by the size check in `new()`.
        let offset = slot.index().wrapping_mul(self.slot_size.get());

        // SAFETY: The offset is inside the allocation, guarded by the bounds check above.
        unsafe { self.ptr.add(offset) }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slot_count)
            .finish_non_exhaustive()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: The pointer was allocated in `new()` with exactly this layout.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn slots_are_laid_out_back_to_back() {
        let storage = Storage::new(4, nz!(188_usize)).unwrap();

        let first = storage.slot_ptr(SlotId::new(0)).as_ptr() as usize;
        let third = storage.slot_ptr(SlotId::new(2)).as_ptr() as usize;

        assert_eq!(third - first, 2 * 188);
        assert_eq!(storage.slot_size(), 188);
    }

    #[test]
    fn storage_starts_zeroed() {
        let storage = Storage::new(2, nz!(16_usize)).unwrap();

        let ptr = storage.slot_ptr(SlotId::new(1));

        // SAFETY: The slot is 16 bytes long and nothing else is accessing it.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 16) };
        assert!(bytes.iter().all(|byte| *byte == 0));
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_slot_panics() {
        let storage = Storage::new(2, nz!(16_usize)).unwrap();

        _ = storage.slot_ptr(SlotId::new(2));
    }

    #[test]
    fn size_overflow_is_error() {
        let result = Storage::new(usize::MAX, nz!(2_usize));

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn slot_id_displays_index() {
        assert_eq!(SlotId::new(7).to_string(), "slot 7");
        assert_eq!(SlotId::new(7).index(), 7);
    }
}
