use std::num::NonZero;

use new_zealand::nz;

use crate::{Netlist, Result};

/// Default number of storage slots.
pub const DEFAULT_SLOT_COUNT: usize = 16384;

/// Default number of data-packet descriptors.
pub const DEFAULT_DATA_COUNT: usize = 16384;

/// Default number of stream-unit descriptors.
pub const DEFAULT_UNIT_COUNT: usize = 8192;

/// Default slot size, one MPEG transport stream packet.
pub const DEFAULT_SLOT_SIZE: NonZero<usize> = nz!(188_usize);

/// Default number of slots per batch, as many transport stream packets as fit in one
/// 1316-byte UDP datagram.
pub const DEFAULT_BATCH_WIDTH: NonZero<usize> = nz!(7_usize);

/// Builder for creating an instance of [`Netlist`].
///
/// You only need to use this builder if you want to customize the netlist configuration.
/// The default configuration used by [`Netlist::new()`][1] suits an MPEG transport stream input.
///
/// Every count is rounded up to the next power of two. One entry of each free-list is always
/// held back, so a count of `n` lets up to `n.next_power_of_two() - 1` items be in use at once.
///
/// # Examples
///
/// ```
/// use netlist::Netlist;
/// use new_zealand::nz;
///
/// let netlist = Netlist::builder()
///     .slot_count(300)
///     .data_count(600)
///     .unit_count(30)
///     .slot_size(nz!(1316_usize))
///     .batch_width(nz!(1_usize))
///     .build()?;
///
/// assert_eq!(netlist.slot_capacity(), 512);
/// assert_eq!(netlist.data_capacity(), 1024);
/// assert_eq!(netlist.unit_capacity(), 32);
/// assert!(!netlist.is_prebound());
/// # Ok::<(), netlist::Error>(())
/// ```
///
/// [1]: Netlist::new
#[derive(Clone, Debug)]
#[must_use]
pub struct NetlistBuilder {
    slot_count: usize,
    data_count: usize,
    unit_count: usize,
    slot_size: NonZero<usize>,
    batch_width: NonZero<usize>,
}

impl NetlistBuilder {
    pub(crate) fn new() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            data_count: DEFAULT_DATA_COUNT,
            unit_count: DEFAULT_UNIT_COUNT,
            slot_size: DEFAULT_SLOT_SIZE,
            batch_width: DEFAULT_BATCH_WIDTH,
        }
    }

    /// Sets the requested number of storage slots.
    pub fn slot_count(mut self, count: usize) -> Self {
        self.slot_count = count;
        self
    }

    /// Sets the requested number of data-packet descriptors.
    ///
    /// If this rounds to the same capacity as the slot count, every descriptor is pre-bound to
    /// its own slot and the netlist can serve [`Netlist::new_ptr()`].
    pub fn data_count(mut self, count: usize) -> Self {
        self.data_count = count;
        self
    }

    /// Sets the requested number of stream-unit descriptors.
    pub fn unit_count(mut self, count: usize) -> Self {
        self.unit_count = count;
        self
    }

    /// Sets the size in bytes of every storage slot.
    pub fn slot_size(mut self, size: NonZero<usize>) -> Self {
        self.slot_size = size;
        self
    }

    /// Sets the number of slots handed out by [`Netlist::acquire_batch()`].
    ///
    /// Must not exceed the usable capacity of the slot and data-descriptor free-lists.
    pub fn batch_width(mut self, width: NonZero<usize>) -> Self {
        self.batch_width = width;
        self
    }

    /// Allocates the netlist with the specified configuration.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if a count cannot
    ///   be rounded to a power of two, the storage size overflows, or the batch width exceeds
    ///   the usable capacity of the slot or data-descriptor free-list.
    /// * [`Error::Allocation`][crate::Error::Allocation] if memory cannot be allocated. Anything
    ///   allocated before the failure is released first.
    pub fn build(self) -> Result<Netlist> {
        Netlist::new_inner(
            self.slot_count,
            self.data_count,
            self.unit_count,
            self.slot_size,
            self.batch_width,
        )
    }
}

impl Default for NetlistBuilder {
    fn default() -> Self {
        Self::new()
    }
}
