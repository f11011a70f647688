use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::{
    Batch, BatchScratch, Binding, BindingMode, DataPacket, Descriptor, DescriptorTable, Error,
    NetlistBuilder, Result, Ring, RingKind, SlotId, Storage, Unit, ring_capacity,
};

/// A fixed-capacity pool of storage slots and packet descriptors for a streaming input.
///
/// The netlist allocates everything it will ever hand out when it is built:
///
/// * one contiguous block of equally sized storage slots,
/// * a table of data-packet descriptors, each a view into one slot,
/// * a set of stream-unit descriptors, each aggregating a chain of data-packet descriptors,
///
/// and keeps each kind on its own circular free-list. Every capacity is rounded up to a power of
/// two and one entry of every free-list is always held back, so a netlist built for `n` items
/// can hand out up to `n.next_power_of_two() - 1` of them at the same time.
///
/// # Producing packets
///
/// A producer fills storage in batches: [`acquire_batch()`][1] returns a [`Batch`] of free slots
/// to read into, and [`Batch::commit()`] binds each filled slot to a [`DataPacket`] with a slot
/// reference count of one. Packets can also be allocated one at a time with
/// [`new_packet()`][2], or, if every descriptor was pre-bound to its own slot when the netlist
/// was built, with [`new_ptr()`][3].
///
/// # Releasing packets
///
/// Dropping a [`DataPacket`] (or passing it to [`delete_packet()`][4]) returns its descriptor to
/// the free-list and drops its reference to the slot. The slot itself becomes free again once no
/// descriptor refers to it. A [`Unit`] releases its entire chain of packets when dropped.
///
/// # Thread safety
///
/// The netlist is a cloneable handle to shared state and may be used from any number of threads.
/// All free-list and reference count updates happen under one lock that is only held for the
/// bookkeeping itself, never across I/O or while waiting.
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
///     .slot_count(8)
///     .data_count(8)
///     .unit_count(2)
///     .slot_size(nz!(4_usize))
///     .batch_width(nz!(2_usize))
///     .build()?;
///
/// let mut source = Cursor::new(b"abcdefgh".to_vec());
///
/// let mut batch = netlist.acquire_batch()?;
/// batch.read_from(&mut source)?;
///
/// let mut packets = Vec::with_capacity(2);
/// batch.commit(&mut packets);
///
/// assert_eq!(packets[0].payload(), b"abcd");
/// assert_eq!(packets[1].payload(), b"efgh");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// [1]: Self::acquire_batch
/// [2]: Self::new_packet
/// [3]: Self::new_ptr
/// [4]: Self::delete_packet
#[derive(Clone)]
pub struct Netlist {
    pub(crate) shared: Arc<Shared>,
}

/// The state shared by a netlist and every descriptor handle it has issued.
pub(crate) struct Shared {
    pub(crate) storage: Storage,
    pub(crate) descriptors: DescriptorTable,

    state: Mutex<State>,

    /// Signaled whenever descriptors or slots are returned to their free-lists. Only the holder
    /// of `batch` ever waits on it.
    released: Condvar,

    /// Held by the one outstanding batch. Serializes batch producers.
    pub(crate) batch: Mutex<BatchScratch>,

    batch_width: NonZero<usize>,
    slot_capacity: usize,
    data_capacity: usize,
    unit_capacity: usize,
    prebound: bool,
}

/// Everything guarded by the netlist lock.
#[derive(Debug)]
struct State {
    slots: Ring<SlotId>,
    data: Ring<usize>,
    units: Ring<usize>,

    /// Number of live descriptors bound to each slot with a counted binding.
    refcounts: Box<[usize]>,

    /// Latched by the first allocation. Pre-bound and counted allocation cannot be mixed.
    mode: Option<BindingMode>,

    /// Number of slots at the head of the slot free-list, and number of data descriptors, that
    /// belong to the outstanding batch.
    reserved: usize,
}

impl State {
    fn latch(&mut self, mode: BindingMode) -> Result<()> {
        match self.mode {
            None => {
                trace!(%mode, "netlist binding mode latched");
                self.mode = Some(mode);
                Ok(())
            }
            Some(active) if active == mode => Ok(()),
            Some(active) => Err(Error::BindingConflict { active }),
        }
    }

    fn can_fill_batch(&self, width: usize) -> bool {
        self.slots.len() >= width && self.data.len() >= width
    }

    fn free_slots_unreserved(&self) -> usize {
        self.slots.len().saturating_sub(self.reserved)
    }

    fn free_data_unreserved(&self) -> usize {
        self.data.len().saturating_sub(self.reserved)
    }

    fn refcount_mut(&mut self, slot: SlotId) -> &mut usize {
        self.refcounts
            .get_mut(slot.index())
            .expect("slot identifiers are issued by the netlist and always in bounds")
    }

    fn add_reference(&mut self, slot: SlotId) {
        let count = self.refcount_mut(slot);

        *count = count
            .checked_add(1)
            .expect("a slot cannot have more references than there are descriptors");
    }

    /// Drops one reference to a slot, returning the slot to its free-list on the last one.
    fn drop_reference(&mut self, slot: SlotId) {
        let count = self
            .refcounts
            .get_mut(slot.index())
            .expect("slot identifiers are issued by the netlist and always in bounds");

        match count.checked_sub(1) {
            Some(0) => {
                *count = 0;
                self.slots.push(slot);
            }
            Some(remaining) => *count = remaining,
            None => {
                // The count stays clamped at zero. The slot is already in the free-list.
                warn!(%slot, "slot released more times than it was referenced");
            }
        }
    }
}

impl Shared {
    pub(crate) fn descriptor(&self, index: usize) -> NonNull<Descriptor> {
        self.descriptors.get(index)
    }

    pub(crate) fn slot_size(&self) -> usize {
        self.storage.slot_size()
    }

    pub(crate) fn refcount(&self, slot: SlotId) -> usize {
        let state = self.state.lock();

        *state
            .refcounts
            .get(slot.index())
            .expect("slot identifiers are issued by the netlist and always in bounds")
    }

    /// Binds the head of the slot free-list to fresh descriptors, one per expected slot, and
    /// writes the descriptor indexes into `committed`. Ends the batch reservation.
    pub(crate) fn commit_batch(&self, expected: &[SlotId], committed: &mut [usize]) {
        let slot_size = self.slot_size();
        let mut state = self.state.lock();

        assert!(
            expected.len() <= state.reserved,
            "committing {} slots from a batch of {}",
            expected.len(),
            state.reserved
        );

        for (expected_slot, committed_index) in expected.iter().zip(committed.iter_mut()) {
            let slot = state
                .slots
                .pop_front()
                .expect("batch slots are reserved so the slot free-list cannot be empty");
            debug_assert_eq!(slot, *expected_slot);

            let index = state
                .data
                .pop_front()
                .expect("batch descriptors are reserved so the data free-list cannot be empty");

            state.add_reference(slot);

            // SAFETY: We just took the index from the free-list, so we are its only owner.
            let descriptor = unsafe { self.descriptor(index).as_mut() };
            descriptor.bind_counted(slot, self.storage.slot_ptr(slot), slot_size, slot_size);

            *committed_index = index;
        }

        state.reserved = 0;

        trace!(count = expected.len(), "batch committed");
    }

    /// Ends a batch reservation without binding anything. The slots stay free.
    pub(crate) fn cancel_batch(&self) {
        let mut state = self.state.lock();
        state.reserved = 0;

        trace!("batch abandoned");
    }

    /// Allocates a second descriptor that views the same slot as `source`.
    pub(crate) fn share(&self, source: &Descriptor) -> Result<usize> {
        let Binding::Counted(slot) = source.binding() else {
            return Err(Error::BindingConflict {
                active: BindingMode::Prebound,
            });
        };

        let index = {
            let mut state = self.state.lock();

            if state.free_data_unreserved() == 0 {
                warn!("data descriptor free-list is empty, unable to share packet");
                return Err(Error::Exhausted {
                    ring: RingKind::Data,
                });
            }

            let index = state
                .data
                .pop_front()
                .expect("guarded by the emptiness check above");

            state.add_reference(slot);
            index
        };

        // SAFETY: We just took the index from the free-list, so we are its only owner.
        unsafe { self.descriptor(index).as_mut() }.bind_shared(source);

        Ok(index)
    }

    /// Returns one descriptor to the free-list.
    ///
    /// The caller must have owned the descriptor and gives up ownership.
    pub(crate) fn release_packet(&self, index: usize) {
        let mut state = self.state.lock();
        self.release_locked(&mut state, index);
        drop(state);

        self.released.notify_one();
    }

    /// Returns a unit descriptor and its whole chain of data descriptors to their free-lists in
    /// one lock acquisition.
    pub(crate) fn release_unit(&self, unit_index: usize, first: Option<usize>) {
        let mut state = self.state.lock();

        let mut cursor = first;
        let mut released: usize = 0;

        while let Some(index) = cursor {
            cursor = self.release_locked(&mut state, index);
            released = released.wrapping_add(1);
        }

        state.units.push(unit_index);
        drop(state);

        self.released.notify_one();

        trace!(released, "unit released");
    }

    /// Returns the next descriptor in the chain of the released one.
    fn release_locked(&self, state: &mut State, index: usize) -> Option<usize> {
        let (next, binding) = {
            // SAFETY: Our caller owned the index and is giving it up. We finish all access
            // before the index goes back to the free-list.
            let descriptor = unsafe { self.descriptor(index).as_mut() };

            let next = descriptor.next();
            descriptor.reset();

            (next, descriptor.binding())
        };

        state.data.push(index);

        if let Binding::Counted(slot) = binding {
            state.drop_reference(slot);
        }

        next
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!(
            slot_capacity = self.slot_capacity,
            slot_size = self.slot_size(),
            "netlist torn down"
        );
    }
}

impl Netlist {
    /// Builds a netlist with the default configuration, sized for an MPEG transport stream.
    ///
    /// See [`NetlistBuilder`] for the defaults and how to change them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage or any of the tables cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    ///
    /// let netlist = Netlist::new()?;
    ///
    /// assert_eq!(netlist.slot_size(), 188);
    /// assert!(netlist.is_prebound());
    /// # Ok::<(), netlist::Error>(())
    /// ```
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Starts building a new [`Netlist`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    /// use new_zealand::nz;
    ///
    /// let netlist = Netlist::builder()
    ///     .slot_count(1000)
    ///     .data_count(1000)
    ///     .unit_count(100)
    ///     .slot_size(nz!(2048_usize))
    ///     .batch_width(nz!(4_usize))
    ///     .build()?;
    ///
    /// assert_eq!(netlist.slot_capacity(), 1024);
    /// # Ok::<(), netlist::Error>(())
    /// ```
    pub fn builder() -> NetlistBuilder {
        NetlistBuilder::new()
    }

    pub(crate) fn new_inner(
        slot_count: usize,
        data_count: usize,
        unit_count: usize,
        slot_size: NonZero<usize>,
        batch_width: NonZero<usize>,
    ) -> Result<Self> {
        Self::allocate(slot_count, data_count, unit_count, slot_size, batch_width)
            .inspect_err(|error| error!(%error, "netlist initialization failed"))
    }

    fn allocate(
        slot_count: usize,
        data_count: usize,
        unit_count: usize,
        slot_size: NonZero<usize>,
        batch_width: NonZero<usize>,
    ) -> Result<Self> {
        let slot_capacity = ring_capacity(slot_count, "slot")?;
        let data_capacity = ring_capacity(data_count, "data descriptor")?;
        let unit_capacity = ring_capacity(unit_count, "unit descriptor")?;

        debug!(
            requested = slot_count,
            capacity = slot_capacity,
            "netlist slots"
        );
        debug!(
            requested = data_count,
            capacity = data_capacity,
            "netlist data descriptors"
        );
        debug!(
            requested = unit_count,
            capacity = unit_capacity,
            "netlist unit descriptors"
        );

        for (capacity, what) in [
            (slot_capacity, "slot"),
            (data_capacity, "data descriptor"),
        ] {
            // One entry of every free-list is always held back.
            let usable = capacity.wrapping_sub(1);

            if batch_width.get() > usable {
                return Err(Error::InvalidConfiguration {
                    problem: format!(
                        "batch width {batch_width} exceeds the {usable} usable entries of the \
                         {capacity} entry {what} free-list, so a batch could never be filled"
                    ),
                });
            }
        }

        let storage = Storage::new(slot_capacity, slot_size)?;

        // With exactly one descriptor per slot, every descriptor keeps its own slot for life.
        let prebound = slot_capacity == data_capacity;

        let descriptors = DescriptorTable::new(data_capacity, |index| {
            if prebound {
                let slot = SlotId::new(index);
                Descriptor::prebound(slot, storage.slot_ptr(slot), slot_size.get())
            } else {
                Descriptor::unbound()
            }
        })?;

        let slots = Ring::new(
            slot_capacity,
            batch_width.get(),
            "slot free-list",
            SlotId::new,
        )?;
        let data = Ring::new(data_capacity, 0, "data descriptor free-list", |index| index)?;
        let units = Ring::new(unit_capacity, 0, "unit descriptor free-list", |index| index)?;

        let refcounts = allocate_table(slot_capacity, 0, "slot reference counts")?;
        let scratch = BatchScratch::new(batch_width)?;

        Ok(Self {
            shared: Arc::new(Shared {
                storage,
                descriptors,
                state: Mutex::new(State {
                    slots,
                    data,
                    units,
                    refcounts,
                    mode: None,
                    reserved: 0,
                }),
                released: Condvar::new(),
                batch: Mutex::new(scratch),
                batch_width,
                slot_capacity,
                data_capacity,
                unit_capacity,
                prebound,
            }),
        })
    }

    /// Waits for `batch_width()` free slots and as many free data descriptors, then returns
    /// the slots as one contiguous [`Batch`] to read into.
    ///
    /// This blocks for as long as it takes downstream consumers to release enough packets.
    /// Only one batch can be outstanding at a time; a second caller waits for the first batch
    /// to be committed or dropped. Use [`acquire_batch_timeout()`][1] to bound the wait.
    ///
    /// The batch lock is not reentrant: calling this again on a thread that still holds a
    /// [`Batch`] from the same netlist waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindingConflict`] if the netlist is already serving pre-bound
    /// descriptors from [`new_ptr()`][2].
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    /// use new_zealand::nz;
    ///
    /// let netlist = Netlist::builder().batch_width(nz!(3_usize)).build()?;
    ///
    /// let mut batch = netlist.acquire_batch()?;
    /// assert_eq!(batch.len(), 3);
    ///
    /// batch.slot_mut(0)[..4].copy_from_slice(b"data");
    ///
    /// let mut packets = Vec::new();
    /// batch.commit(&mut packets);
    /// assert_eq!(&packets[0].payload()[..4], b"data");
    /// # Ok::<(), netlist::Error>(())
    /// ```
    ///
    /// [1]: Self::acquire_batch_timeout
    /// [2]: Self::new_ptr
    pub fn acquire_batch(&self) -> Result<Batch<'_>> {
        self.acquire_batch_until(None)
    }

    /// Like [`acquire_batch()`][1] but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the batch could not be filled in time, and
    /// [`Error::BindingConflict`] as described for [`acquire_batch()`][1].
    ///
    /// [1]: Self::acquire_batch
    pub fn acquire_batch_timeout(&self, timeout: Duration) -> Result<Batch<'_>> {
        // A deadline beyond the representable future is the same as no deadline.
        self.acquire_batch_until(Instant::now().checked_add(timeout))
    }

    fn acquire_batch_until(&self, deadline: Option<Instant>) -> Result<Batch<'_>> {
        let shared = &*self.shared;
        let width = shared.batch_width.get();

        let mut scratch = match deadline {
            Some(deadline) => shared
                .batch
                .try_lock_until(deadline)
                .ok_or(Error::Timeout)?,
            None => shared.batch.lock(),
        };

        let mut state = shared.state.lock();
        state.latch(BindingMode::Counted)?;

        if !state.can_fill_batch(width) {
            debug!(
                width,
                free_slots = state.slots.len(),
                free_data = state.data.len(),
                "waiting for free slots and data descriptors"
            );

            while !state.can_fill_batch(width) {
                match deadline {
                    Some(deadline) => {
                        if shared.released.wait_until(&mut state, deadline).timed_out()
                            && !state.can_fill_batch(width)
                        {
                            debug!(width, "gave up waiting for free slots");
                            return Err(Error::Timeout);
                        }
                    }
                    None => shared.released.wait(&mut state),
                }
            }

            debug!(width, "found free slots and data descriptors");
        }

        state.reserved = width;
        scratch.slots_mut().copy_from_slice(state.slots.contiguous(width));
        drop(state);

        Ok(Batch::new(self, scratch))
    }

    /// Takes a free data descriptor that is still bound to the slot it was given when the
    /// netlist was built, with the payload reset to the full slot.
    ///
    /// This is only available when the slot and data-descriptor capacities are equal, in which
    /// case every descriptor owns one slot outright and the slot free-list is not involved.
    ///
    /// # Errors
    ///
    /// * [`Error::NotPrebound`] if the netlist has no pre-bound descriptors.
    /// * [`Error::BindingConflict`] if the netlist is already serving counted packets from
    ///   [`acquire_batch()`][1] or [`new_packet()`][2].
    /// * [`Error::Exhausted`] if no data descriptor is free.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    /// use new_zealand::nz;
    ///
    /// let netlist = Netlist::builder()
    ///     .slot_count(4)
    ///     .data_count(4)
    ///     .batch_width(nz!(1_usize))
    ///     .build()?;
    ///
    /// let mut packet = netlist.new_ptr()?;
    /// packet.payload_mut().unwrap()[0] = 0x47;
    /// assert_eq!(packet.payload()[0], 0x47);
    /// # Ok::<(), netlist::Error>(())
    /// ```
    ///
    /// [1]: Self::acquire_batch
    /// [2]: Self::new_packet
    pub fn new_ptr(&self) -> Result<DataPacket> {
        let shared = &*self.shared;

        if !shared.prebound {
            return Err(Error::NotPrebound);
        }

        let index = {
            let mut state = shared.state.lock();
            state.latch(BindingMode::Prebound)?;

            let Some(index) = state.data.pop_front() else {
                warn!("data descriptor free-list is empty, unable to allocate packet");
                return Err(Error::Exhausted {
                    ring: RingKind::Data,
                });
            };

            index
        };

        let packet = DataPacket::new(Arc::clone(&self.shared), index);

        // SAFETY: We just took the index from the free-list, so we are its only owner.
        unsafe { shared.descriptor(index).as_mut() }.reset();

        Ok(packet)
    }

    /// Claims a free slot and binds it to a free data descriptor, with a payload of `size`
    /// bytes at the start of the slot.
    ///
    /// # Errors
    ///
    /// * [`Error::Oversized`] if `size` exceeds the slot size.
    /// * [`Error::BindingConflict`] if the netlist is already serving pre-bound descriptors from
    ///   [`new_ptr()`][1].
    /// * [`Error::Exhausted`] if no slot or no data descriptor is free.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    ///
    /// let netlist = Netlist::builder().slot_count(16).data_count(32).build()?;
    ///
    /// let packet = netlist.new_packet(100)?;
    /// assert_eq!(packet.payload_len(), 100);
    /// assert_eq!(netlist.slot_refcount(packet.slot()), 1);
    /// # Ok::<(), netlist::Error>(())
    /// ```
    ///
    /// [1]: Self::new_ptr
    pub fn new_packet(&self, size: usize) -> Result<DataPacket> {
        let shared = &*self.shared;
        let slot_size = shared.slot_size();

        if size > slot_size {
            error!(size, slot_size, "requested packet does not fit in a slot");
            return Err(Error::Oversized {
                requested: size,
                slot_size,
            });
        }

        let (slot, index) = {
            let mut state = shared.state.lock();
            state.latch(BindingMode::Counted)?;

            if state.free_slots_unreserved() == 0 {
                warn!("slot free-list is empty, unable to allocate packet");
                return Err(Error::Exhausted {
                    ring: RingKind::Slot,
                });
            }

            if state.free_data_unreserved() == 0 {
                warn!("data descriptor free-list is empty, unable to allocate packet");
                return Err(Error::Exhausted {
                    ring: RingKind::Data,
                });
            }

            // An outstanding batch owns the head of the slot free-list, so we take from the
            // tail instead.
            let slot = if state.reserved == 0 {
                state.slots.pop_front()
            } else {
                state.slots.pop_back()
            }
            .expect("guarded by the emptiness check above");

            let index = state
                .data
                .pop_front()
                .expect("guarded by the emptiness check above");

            state.add_reference(slot);

            (slot, index)
        };

        let packet = DataPacket::new(Arc::clone(&self.shared), index);

        // SAFETY: We just took the index from the free-list, so we are its only owner.
        unsafe { shared.descriptor(index).as_mut() }.bind_counted(
            slot,
            shared.storage.slot_ptr(slot),
            slot_size,
            size,
        );

        Ok(packet)
    }

    /// Takes a free unit descriptor, with an empty chain and zeroed timestamps and flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if no unit descriptor is free.
    ///
    /// # Example
    ///
    /// ```rust
    /// use netlist::Netlist;
    ///
    /// let netlist = Netlist::new()?;
    ///
    /// let mut unit = netlist.new_unit()?;
    /// assert!(unit.is_empty());
    ///
    /// unit.push(netlist.new_ptr()?);
    /// unit.push(netlist.new_ptr()?);
    /// assert_eq!(unit.len(), 2);
    ///
    /// // Releases both packets and the unit.
    /// netlist.delete_unit(unit);
    /// # Ok::<(), netlist::Error>(())
    /// ```
    pub fn new_unit(&self) -> Result<Unit> {
        let index = {
            let mut state = self.shared.state.lock();

            let Some(index) = state.units.pop_front() else {
                warn!("unit descriptor free-list is empty, unable to allocate unit");
                return Err(Error::Exhausted {
                    ring: RingKind::Unit,
                });
            };

            index
        };

        Ok(Unit::new(Arc::clone(&self.shared), index))
    }

    /// Returns a data packet to the netlist. Equivalent to dropping it.
    ///
    /// The descriptor goes back to its free-list with its payload reset to the full slot, and
    /// its slot goes back to the slot free-list if no other descriptor refers to it.
    #[expect(
        clippy::unused_self,
        reason = "kept for symmetry with the allocation methods"
    )]
    pub fn delete_packet(&self, packet: DataPacket) {
        drop(packet);
    }

    /// Returns a unit and every packet chained to it to the netlist. Equivalent to dropping it.
    #[expect(
        clippy::unused_self,
        reason = "kept for symmetry with the allocation methods"
    )]
    pub fn delete_unit(&self, unit: Unit) {
        drop(unit);
    }

    /// Number of storage slots, a power of two.
    #[must_use]
    pub fn slot_capacity(&self) -> usize {
        self.shared.slot_capacity
    }

    /// Number of data-packet descriptors, a power of two.
    #[must_use]
    pub fn data_capacity(&self) -> usize {
        self.shared.data_capacity
    }

    /// Number of unit descriptors, a power of two.
    #[must_use]
    pub fn unit_capacity(&self) -> usize {
        self.shared.unit_capacity
    }

    /// `slot_capacity() - 1`, the mask applied to slot free-list indexes.
    #[must_use]
    pub fn slot_mask(&self) -> usize {
        self.shared.state.lock().slots.mask()
    }

    /// `data_capacity() - 1`, the mask applied to data free-list indexes.
    #[must_use]
    pub fn data_mask(&self) -> usize {
        self.shared.state.lock().data.mask()
    }

    /// `unit_capacity() - 1`, the mask applied to unit free-list indexes.
    #[must_use]
    pub fn unit_mask(&self) -> usize {
        self.shared.state.lock().units.mask()
    }

    /// Size in bytes of every storage slot.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.shared.slot_size()
    }

    /// Number of slots in every [`Batch`].
    #[must_use]
    pub fn batch_width(&self) -> usize {
        self.shared.batch_width.get()
    }

    /// Whether every data descriptor was bound to its own slot when the netlist was built,
    /// which is what [`new_ptr()`][1] requires.
    ///
    /// [1]: Self::new_ptr
    #[must_use]
    pub fn is_prebound(&self) -> bool {
        self.shared.prebound
    }

    /// The allocation mode the netlist has been latched into, if any allocation has happened.
    #[must_use]
    pub fn binding_mode(&self) -> Option<BindingMode> {
        self.shared.state.lock().mode
    }

    /// Number of slots that can currently be taken from the slot free-list.
    ///
    /// Slots reserved by an outstanding batch are included until the batch is committed.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Number of data descriptors that can currently be taken from the data free-list.
    #[must_use]
    pub fn free_data(&self) -> usize {
        self.shared.state.lock().data.len()
    }

    /// Number of unit descriptors that can currently be taken from the unit free-list.
    #[must_use]
    pub fn free_units(&self) -> usize {
        self.shared.state.lock().units.len()
    }

    /// Number of live counted descriptors bound to a slot.
    ///
    /// Pre-bound descriptors never count as references, so this is always zero in a netlist
    /// serving [`new_ptr()`][1].
    ///
    /// # Panics
    ///
    /// Panics if the slot does not belong to this netlist.
    ///
    /// [1]: Self::new_ptr
    #[must_use]
    pub fn slot_refcount(&self, slot: SlotId) -> usize {
        self.shared.refcount(slot)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let state = self.shared.state.lock();
        let counted = state.mode != Some(BindingMode::Prebound);

        let mut slot_in_free_list = vec![false; self.slot_capacity()];

        for slot in state.slots.owned() {
            let seen = slot_in_free_list
                .get_mut(slot.index())
                .expect("slot identifiers are always in bounds");

            assert!(!*seen, "{slot} appears twice in the slot free-list");
            *seen = true;
        }

        if counted {
            for (index, (&count, &free)) in state
                .refcounts
                .iter()
                .zip(slot_in_free_list.iter())
                .enumerate()
            {
                assert!(
                    (count == 0) == free,
                    "slot {index} has {count} references but free-list membership is {free}"
                );
            }
        }

        let mut data_in_free_list = vec![false; self.data_capacity()];

        for index in state.data.owned() {
            let seen = data_in_free_list
                .get_mut(index)
                .expect("descriptor indexes are always in bounds");

            assert!(!*seen, "descriptor {index} appears twice in the data free-list");
            *seen = true;
        }

        let mut unit_in_free_list = vec![false; self.unit_capacity()];

        for index in state.units.owned() {
            let seen = unit_in_free_list
                .get_mut(index)
                .expect("unit indexes are always in bounds");

            assert!(!*seen, "unit {index} appears twice in the unit free-list");
            *seen = true;
        }
    }
}

impl fmt::Debug for Netlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netlist")
            .field("shared", &self.shared)
            .finish()
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("storage", &self.storage)
            .field("slot_capacity", &self.slot_capacity)
            .field("data_capacity", &self.data_capacity)
            .field("unit_capacity", &self.unit_capacity)
            .field("batch_width", &self.batch_width)
            .field("prebound", &self.prebound)
            .finish_non_exhaustive()
    }
}

/// Allocates a boxed table, reporting failure as an error instead of aborting.
pub(crate) fn allocate_table<T: Clone>(
    len: usize,
    value: T,
    what: &'static str,
) -> Result<Box<[T]>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(len)
        .map_err(|_| Error::Allocation {
            what,
            bytes: len.saturating_mul(size_of::<T>()),
        })?;

    table.resize(len, value);
    Ok(table.into_boxed_slice())
}
