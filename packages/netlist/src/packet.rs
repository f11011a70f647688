use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr;
use std::sync::Arc;

use crate::{Binding, Descriptor, Result, Shared};

/// An owned data-packet descriptor: a view into one storage slot of a
/// [`Netlist`][crate::Netlist].
///
/// Dereferences to [`Descriptor`] for read access to the payload. Dropping the packet returns
/// the descriptor to the netlist and drops its reference to the slot.
///
/// A packet keeps the netlist alive, so packets may outlive every `Netlist` handle.
pub struct DataPacket {
    shared: Arc<Shared>,
    index: usize,
}

impl DataPacket {
    /// The caller transfers ownership of the descriptor at `index` to the new packet.
    pub(crate) fn new(shared: Arc<Shared>, index: usize) -> Self {
        Self { shared, index }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Gives up the handle without releasing the descriptor. The caller becomes its owner.
    pub(crate) fn into_parts(self) -> (Arc<Shared>, usize) {
        let this = ManuallyDrop::new(self);

        // SAFETY: `this` is never dropped or used again, so the Arc is moved out exactly once.
        let shared = unsafe { ptr::read(&raw const this.shared) };

        (shared, this.index)
    }

    fn descriptor_mut(&mut self) -> &mut Descriptor {
        // SAFETY: We own the descriptor at `index` and hold `&mut self`, so nobody else can
        // access it.
        unsafe { self.shared.descriptor(self.index).as_mut() }
    }

    /// Narrows (or widens) the payload to `start..end` within the slot.
    ///
    /// # Panics
    ///
    /// Panics if `start > end` or `end` is past the end of the slot.
    pub fn set_payload_bounds(&mut self, start: usize, end: usize) {
        self.descriptor_mut().set_payload_bounds(start, end);
    }

    /// Marks the payload as one that consumers should skip.
    pub fn set_discard(&mut self, discard: bool) {
        self.descriptor_mut().set_discard(discard);
    }

    /// Mutable access to the payload bytes.
    ///
    /// Returns `None` while another packet shares the same slot (see [`share()`][1]), because
    /// writing would be visible through that packet.
    ///
    /// [1]: Self::share
    #[must_use]
    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        let exclusive = match self.binding() {
            Binding::Counted(slot) => self.shared.refcount(slot) == 1,
            Binding::Prebound(_) | Binding::Unbound => true,
        };

        if !exclusive {
            return None;
        }

        // SAFETY: We are the only descriptor referring to the slot and we hold `&mut self`,
        // so no other reference to the bytes can exist. The reference count cannot rise while
        // we are borrowed mutably because only `share(&self)` raises it.
        Some(unsafe { self.descriptor_mut().payload_mut_unchecked() })
    }

    /// Allocates a second packet viewing the same slot with the same payload bounds.
    ///
    /// The slot stays allocated until both packets are released. Neither packet can write to
    /// the payload while the other exists.
    ///
    /// # Errors
    ///
    /// * [`Error::Exhausted`][crate::Error::Exhausted] if no data descriptor is free.
    /// * [`Error::BindingConflict`][crate::Error::BindingConflict] if the packet is pre-bound.
    ///   Pre-bound packets own their slot outright and cannot share it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    ///
    /// let netlist = Netlist::builder().slot_count(8).data_count(16).build()?;
    ///
    /// let mut packet = netlist.new_packet(4)?;
    /// packet.payload_mut().unwrap().copy_from_slice(b"PES!");
    ///
    /// let copy = packet.share()?;
    /// assert_eq!(copy.payload(), b"PES!");
    /// assert_eq!(netlist.slot_refcount(copy.slot()), 2);
    ///
    /// // Shared payloads are read-only.
    /// assert!(packet.payload_mut().is_none());
    /// # Ok::<(), netlist::Error>(())
    /// ```
    pub fn share(&self) -> Result<Self> {
        let index = self.shared.share(self)?;

        Ok(Self::new(Arc::clone(&self.shared), index))
    }
}

impl Deref for DataPacket {
    type Target = Descriptor;

    fn deref(&self) -> &Descriptor {
        // SAFETY: We own the descriptor at `index`. Mutation requires `&mut self`, which
        // cannot coexist with the returned shared reference.
        unsafe { self.shared.descriptor(self.index).as_ref() }
    }
}

impl Drop for DataPacket {
    fn drop(&mut self) {
        self.shared.release_packet(self.index);
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPacket")
            .field("index", &self.index)
            .field("descriptor", &**self)
            .finish_non_exhaustive()
    }
}
