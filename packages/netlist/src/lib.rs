#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Fixed-capacity, reference-counted packet buffer pool for streaming media input.
//!
//! This crate provides [`Netlist`], a pool that allocates all of its memory once and then
//! recycles it for as long as an input stream runs. It hands out three kinds of resources:
//!
//! - **Storage slots**: equally sized chunks of one contiguous byte block, filled by the input in
//!   batches via vectored reads.
//! - **Data packets** ([`DataPacket`]): views into one slot. Several packets may view the same
//!   slot; the slot is recycled when the last of them is released.
//! - **Stream units** ([`Unit`]): an ordered chain of data packets with timestamps, for example
//!   one PES packet assembled from several transport stream packets.
//!
//! Each kind lives on a circular free-list whose capacity is a power of two. Allocation never
//! touches the heap after the netlist is built.
//!
//! # Key features
//!
//! - **Batch input**: [`Netlist::acquire_batch()`] waits for a run of free slots and presents
//!   them as contiguous buffers for one vectored read, without any per-read allocation.
//! - **Shared slots**: [`DataPacket::share()`] lets two packets view the same bytes, with the
//!   slot kept alive by a reference count.
//! - **Pre-bound descriptors**: when there is exactly one descriptor per slot, every descriptor
//!   owns its slot for life and [`Netlist::new_ptr()`] skips slot bookkeeping entirely.
//! - **Scoped release**: packets and units return themselves to the netlist when dropped.
//! - **Thread safety**: the netlist is a cloneable handle that any thread may allocate from and
//!   release to. The producer waiting for slots sleeps until a consumer releases some.
//!
//! # Examples
//!
//! ## Reading a transport stream
//!
//! ```rust
//! use std::io::Cursor;
//!
//! use netlist::Netlist;
//!
//! // 188-byte slots, 7 per batch.
//! let netlist = Netlist::new()?;
//!
//! let mut source = Cursor::new(vec![0x47_u8; 7 * 188]);
//!
//! let mut batch = netlist.acquire_batch()?;
//! let bytes = batch.read_from(&mut source)?;
//! assert_eq!(bytes, 7 * 188);
//!
//! let mut packets = Vec::new();
//! batch.commit(&mut packets);
//!
//! for packet in &packets {
//!     assert_eq!(packet.payload()[0], 0x47);
//! }
//!
//! // Dropping the packets returns their slots.
//! drop(packets);
//! assert_eq!(netlist.free_slots(), netlist.slot_capacity() - 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Assembling a stream unit
//!
//! ```rust
//! use netlist::Netlist;
//! use new_zealand::nz;
//!
//! let netlist = Netlist::builder()
//!     .slot_count(64)
//!     .data_count(128)
//!     .unit_count(8)
//!     .slot_size(nz!(188_usize))
//!     .build()?;
//!
//! let mut unit = netlist.new_unit()?;
//! unit.set_pts(90_000);
//!
//! for _ in 0..3 {
//!     let mut packet = netlist.new_packet(188)?;
//!
//!     // Skip the 4-byte transport stream header.
//!     packet.set_payload_bounds(4, 188);
//!     unit.push(packet);
//! }
//!
//! assert_eq!(unit.payload_size(), 3 * 184);
//!
//! // Releases the unit and all three packets at once.
//! drop(unit);
//! assert_eq!(netlist.free_data(), netlist.data_capacity() - 1);
//! # Ok::<(), netlist::Error>(())
//! ```
//!
//! # Logging
//!
//! The netlist emits [`tracing`](https://docs.rs/tracing) events: sizing decisions and producer
//! waits at `debug` level, exhaustion at `warn` level and per-operation bookkeeping at `trace`
//! level. No subscriber is installed by this crate.

mod batch;
mod builder;
mod descriptor;
mod error;
mod netlist;
mod packet;
mod ring;
mod storage;
mod unit;

pub use batch::Batch;
pub(crate) use batch::BatchScratch;
pub use builder::*;
pub use descriptor::Descriptor;
pub(crate) use descriptor::{Binding, DescriptorTable};
pub use error::*;
pub use netlist::Netlist;
pub(crate) use netlist::{Shared, allocate_table};
pub use packet::DataPacket;
pub(crate) use ring::*;
pub use storage::SlotId;
pub(crate) use storage::Storage;
pub use unit::*;
