use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use crate::{DataPacket, Descriptor, Shared};

/// An owned stream-unit descriptor: one elementary stream unit (for example a PES packet)
/// assembled from a chain of data packets.
///
/// Packets pushed onto the unit become part of it and are released together with it. Dropping
/// the unit (or passing it to [`Netlist::delete_unit()`][crate::Netlist::delete_unit]) returns
/// every chained packet and the unit descriptor to the netlist under a single lock acquisition.
pub struct Unit {
    shared: Arc<Shared>,
    index: usize,

    first: Option<usize>,
    last: Option<usize>,
    len: usize,

    pts: i64,
    dts: i64,
    data_alignment: bool,
    discontinuity: bool,
}

impl Unit {
    pub(crate) fn new(shared: Arc<Shared>, index: usize) -> Self {
        Self {
            shared,
            index,
            first: None,
            last: None,
            len: 0,
            pts: 0,
            dts: 0,
            data_alignment: false,
            discontinuity: false,
        }
    }

    /// Appends a packet to the end of the chain.
    ///
    /// # Panics
    ///
    /// Panics if the packet belongs to a different netlist.
    pub fn push(&mut self, packet: DataPacket) {
        assert!(
            Arc::ptr_eq(packet.shared(), &self.shared),
            "a packet can only be chained to a unit of the netlist it came from"
        );

        let (_, index) = packet.into_parts();

        match self.last {
            Some(last) => {
                // SAFETY: The chain is owned by this unit and we hold `&mut self`.
                unsafe { self.shared.descriptor(last).as_mut() }.set_next(Some(index));
            }
            None => self.first = Some(index),
        }

        self.last = Some(index);
        self.len = self
            .len
            .checked_add(1)
            .expect("a chain cannot be longer than the descriptor table");
    }

    /// Iterates over the chained packets, first to last.
    #[must_use]
    pub fn packets(&self) -> Packets<'_> {
        Packets {
            shared: &self.shared,
            next: self.first,
            remaining: self.len,
        }
    }

    /// The first packet of the chain, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Descriptor> {
        self.packets().next()
    }

    /// Number of chained packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no packets are chained yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total payload bytes over the whole chain.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.packets().map(Descriptor::payload_len).sum()
    }

    /// Presentation timestamp.
    #[must_use]
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Sets the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Decoding timestamp.
    #[must_use]
    pub fn dts(&self) -> i64 {
        self.dts
    }

    /// Sets the decoding timestamp.
    pub fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
    }

    /// Whether the unit starts at an access unit boundary.
    #[must_use]
    pub fn data_alignment(&self) -> bool {
        self.data_alignment
    }

    /// Sets whether the unit starts at an access unit boundary.
    pub fn set_data_alignment(&mut self, data_alignment: bool) {
        self.data_alignment = data_alignment;
    }

    /// Whether data was lost before this unit.
    #[must_use]
    pub fn discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Sets whether data was lost before this unit.
    pub fn set_discontinuity(&mut self, discontinuity: bool) {
        self.discontinuity = discontinuity;
    }
}

impl Drop for Unit {
    fn drop(&mut self) {
        self.shared.release_unit(self.index, self.first);
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("index", &self.index)
            .field("len", &self.len)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("data_alignment", &self.data_alignment)
            .field("discontinuity", &self.discontinuity)
            .finish_non_exhaustive()
    }
}

/// Iterator over the packets chained to a [`Unit`], returned by [`Unit::packets()`].
#[derive(Debug)]
pub struct Packets<'a> {
    shared: &'a Shared,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Packets<'a> {
    type Item = &'a Descriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;

        // SAFETY: The chain belongs to the unit we borrow from, which cannot be modified while
        // the borrow lasts.
        let descriptor = unsafe { self.shared.descriptor(index).as_ref() };

        self.next = descriptor.next();
        self.remaining = self.remaining.saturating_sub(1);

        Some(descriptor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Packets<'_> {}

impl FusedIterator for Packets<'_> {}
