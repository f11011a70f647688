use std::fmt;

use thiserror::Error;

/// Errors that can occur when building or allocating from a [`Netlist`][crate::Netlist].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Memory for one of the netlist tables could not be allocated while building the netlist.
    ///
    /// Everything allocated before the failure has already been released.
    #[error("unable to allocate {bytes} bytes for the netlist {what}")]
    Allocation {
        /// Which part of the netlist could not be allocated.
        what: &'static str,

        /// How many bytes were requested.
        bytes: usize,
    },

    /// The builder was given a combination of parameters that can never work.
    #[error("invalid netlist configuration: {problem}")]
    InvalidConfiguration {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A non-blocking allocation found its free-list empty.
    ///
    /// This is recoverable - retry once downstream consumers have released some descriptors.
    #[error("the netlist {ring} free-list is empty")]
    Exhausted {
        /// The free-list that had nothing left to give.
        ring: RingKind,
    },

    /// A packet was requested with a payload larger than the fixed slot size of the netlist.
    #[error("requested payload of {requested} bytes does not fit in a {slot_size} byte slot")]
    Oversized {
        /// The requested payload size.
        requested: usize,

        /// The fixed slot size of the netlist.
        slot_size: usize,
    },

    /// A bounded wait for free slots ran out of time.
    #[error("timed out waiting for free slots")]
    Timeout,

    /// A pre-bound descriptor was requested from a netlist whose slot and data-descriptor
    /// capacities differ, so no descriptor has a slot of its own.
    #[error("data descriptors are not pre-bound to slots in this netlist")]
    NotPrebound,

    /// Pre-bound allocation and counted allocation were mixed in the same netlist.
    ///
    /// A pre-bound descriptor owns its slot outright, so the slot must never also be handed out
    /// through the slot free-list. The first allocation latches the netlist into one mode.
    #[error("the netlist is already serving {active} descriptors")]
    BindingConflict {
        /// The binding mode the netlist is latched into.
        active: BindingMode,
    },
}

/// A specialized `Result` type for netlist operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies one of the three free-lists of a netlist.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RingKind {
    /// Storage slots.
    Slot,

    /// Data-packet descriptors.
    Data,

    /// Stream-unit descriptors.
    Unit,
}

impl fmt::Display for RingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot => f.write_str("slot"),
            Self::Data => f.write_str("data descriptor"),
            Self::Unit => f.write_str("unit descriptor"),
        }
    }
}

/// How the data descriptors of a netlist obtain their storage.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum BindingMode {
    /// Descriptors keep the slot they were bound to when the netlist was built.
    Prebound,

    /// Descriptors claim a slot from the slot free-list and count as a reference to it.
    Counted,
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prebound => f.write_str("pre-bound"),
            Self::Counted => f.write_str("reference-counted"),
        }
    }
}
