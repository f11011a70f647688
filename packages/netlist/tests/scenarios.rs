//! End-to-end scenarios exercising a netlist through its public API only.

#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "we do not need to worry about these things when writing test code"
)]

use std::collections::HashSet;
use std::io::Cursor;

use netlist::{DataPacket, Error, Netlist, RingKind, SlotId};
use new_zealand::nz;

const TS_PACKET: usize = 188;

fn transport_stream(packets: usize) -> Cursor<Vec<u8>> {
    let mut bytes = Vec::with_capacity(packets * TS_PACKET);

    for index in 0..packets {
        let mut packet = [0_u8; TS_PACKET];
        packet[0] = 0x47;
        packet[1] = u8::try_from(index).unwrap();
        bytes.extend_from_slice(&packet);
    }

    Cursor::new(bytes)
}

#[test]
fn batch_as_wide_as_whole_ring_is_rejected() {
    // Four slots leave three usable, so a batch of four could never be filled.
    let result = Netlist::builder()
        .slot_count(4)
        .data_count(4)
        .unit_count(2)
        .slot_size(nz!(188_usize))
        .batch_width(nz!(4_usize))
        .build();

    assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
}

#[test]
fn read_commit_release_and_unit_cycle() {
    let netlist = Netlist::builder()
        .slot_count(8)
        .data_count(8)
        .unit_count(2)
        .slot_size(nz!(188_usize))
        .batch_width(nz!(4_usize))
        .build()
        .unwrap();

    assert_eq!(netlist.slot_capacity(), 8);
    assert_eq!(netlist.slot_mask(), 7);
    assert!(netlist.is_prebound());

    let initial_slots = netlist.free_slots();
    let initial_units = netlist.free_units();
    assert_eq!(initial_slots, 7);
    assert_eq!(initial_units, 1);

    // All slots are free, so this does not wait.
    let mut batch = netlist.acquire_batch().unwrap();
    assert_eq!(batch.len(), 4);

    let bytes = batch.read_from(&mut transport_stream(4)).unwrap();
    assert_eq!(bytes, 4 * TS_PACKET);

    let mut packets = Vec::new();
    batch.commit(&mut packets);

    assert_eq!(packets.len(), 4);
    for (index, packet) in packets.iter().enumerate() {
        assert_eq!(packet.payload_len(), TS_PACKET);
        assert_eq!(packet.payload()[0], 0x47);
        assert_eq!(usize::from(packet.payload()[1]), index);
        assert_eq!(netlist.slot_refcount(packet.slot()), 1);
    }
    assert_eq!(netlist.free_slots(), initial_slots - 4);

    // Release two packets: their slots go back to the free-list.
    let released = packets.drain(..2).collect::<Vec<_>>();
    let released_slots = released.iter().map(|p| p.slot()).collect::<Vec<_>>();
    for packet in released {
        netlist.delete_packet(packet);
    }

    for slot in released_slots {
        assert_eq!(netlist.slot_refcount(slot), 0);
    }
    assert_eq!(netlist.free_slots(), initial_slots - 2);

    // Chain the other two into a unit and release it.
    let remaining_slots = packets.iter().map(|p| p.slot()).collect::<Vec<_>>();

    let mut unit = netlist.new_unit().unwrap();
    assert_eq!(netlist.free_units(), initial_units - 1);

    for packet in packets.drain(..) {
        unit.push(packet);
    }
    assert_eq!(unit.len(), 2);

    netlist.delete_unit(unit);

    for slot in remaining_slots {
        assert_eq!(netlist.slot_refcount(slot), 0);
    }
    assert_eq!(netlist.free_slots(), initial_slots);
    assert_eq!(netlist.free_units(), initial_units);
}

#[test]
fn exhaustion_does_not_block_later_calls() {
    let netlist = Netlist::builder()
        .slot_count(4)
        .data_count(4)
        .unit_count(2)
        .batch_width(nz!(1_usize))
        .build()
        .unwrap();

    let held = (0..3)
        .map(|_| netlist.new_ptr().unwrap())
        .collect::<Vec<_>>();

    for _ in 0..3 {
        assert!(matches!(
            netlist.new_ptr(),
            Err(Error::Exhausted {
                ring: RingKind::Data
            })
        ));
    }

    // Other operations still get the lock.
    let unit = netlist.new_unit().unwrap();
    assert!(matches!(
        netlist.new_unit(),
        Err(Error::Exhausted {
            ring: RingKind::Unit
        })
    ));
    drop(unit);

    drop(held);
    assert!(netlist.new_ptr().is_ok());
}

#[test]
fn counted_exhaustion_names_the_empty_ring() {
    let slots_short = Netlist::builder()
        .slot_count(2)
        .data_count(8)
        .batch_width(nz!(1_usize))
        .build()
        .unwrap();

    let _held = slots_short.new_packet(1).unwrap();
    assert!(matches!(
        slots_short.new_packet(1),
        Err(Error::Exhausted {
            ring: RingKind::Slot
        })
    ));

    let data_short = Netlist::builder()
        .slot_count(8)
        .data_count(2)
        .batch_width(nz!(1_usize))
        .build()
        .unwrap();

    let _held = data_short.new_packet(1).unwrap();
    assert!(matches!(
        data_short.new_packet(1),
        Err(Error::Exhausted {
            ring: RingKind::Data
        })
    ));
}

#[test]
fn oversized_packet_is_rejected() {
    let netlist = Netlist::builder()
        .slot_count(8)
        .data_count(16)
        .slot_size(nz!(188_usize))
        .build()
        .unwrap();

    let result = netlist.new_packet(189);

    assert!(matches!(
        result,
        Err(Error::Oversized {
            requested: 189,
            slot_size: 188
        })
    ));

    // Nothing was taken.
    assert_eq!(netlist.free_slots(), 7);
    assert_eq!(netlist.free_data(), 15);
    assert!(netlist.new_packet(188).is_ok());
}

#[test]
fn capacity_is_smallest_power_of_two_at_or_above_request() {
    for requested in [0_usize, 1, 2, 3, 5, 8, 9, 100, 127, 128, 129, 4095] {
        let netlist = Netlist::builder()
            .slot_count(requested)
            .data_count(requested)
            .unit_count(requested)
            .slot_size(nz!(1_usize))
            .batch_width(nz!(1_usize))
            .build();

        let expected = requested.max(1).next_power_of_two();

        if expected < 2 {
            // A single-entry ring has no usable entries, so not even a batch of one fits.
            assert!(matches!(netlist, Err(Error::InvalidConfiguration { .. })));
            continue;
        }

        let netlist = netlist.unwrap();

        assert_eq!(netlist.slot_capacity(), expected);
        assert_eq!(netlist.data_capacity(), expected);
        assert_eq!(netlist.unit_capacity(), expected);
        assert_eq!(netlist.slot_mask(), expected - 1);
        assert_eq!(netlist.data_mask(), expected - 1);
        assert_eq!(netlist.unit_mask(), expected - 1);
        assert_eq!(netlist.free_slots(), expected - 1);
    }
}

#[test]
fn acquire_release_round_trip_restores_occupancy() {
    let netlist = Netlist::builder()
        .slot_count(16)
        .data_count(32)
        .batch_width(nz!(4_usize))
        .build()
        .unwrap();

    for size in [0, 1, 100, 188] {
        let slots_before = netlist.free_slots();
        let data_before = netlist.free_data();

        let packet = netlist.new_packet(size).unwrap();
        assert_eq!(packet.payload_len(), size);
        netlist.delete_packet(packet);

        assert_eq!(netlist.free_slots(), slots_before);
        assert_eq!(netlist.free_data(), data_before);
    }
}

#[test]
fn unit_release_returns_every_descriptor_and_reference() {
    let netlist = Netlist::builder()
        .slot_count(16)
        .data_count(32)
        .unit_count(4)
        .batch_width(nz!(2_usize))
        .build()
        .unwrap();

    let mut unit = netlist.new_unit().unwrap();

    // Two slots, the first viewed by three descriptors.
    let first = netlist.new_packet(188).unwrap();
    let copies = [first.share().unwrap(), first.share().unwrap()];
    let second = netlist.new_packet(188).unwrap();

    let first_slot = first.slot();
    let second_slot = second.slot();

    unit.push(first);
    for copy in copies {
        unit.push(copy);
    }
    unit.push(second);

    assert_eq!(unit.first().unwrap().slot(), first_slot);

    assert_eq!(netlist.slot_refcount(first_slot), 3);
    assert_eq!(netlist.slot_refcount(second_slot), 1);

    let data_before = netlist.free_data();
    let units_before = netlist.free_units();
    let chain = unit.len();

    netlist.delete_unit(unit);

    assert_eq!(netlist.free_data(), data_before + chain);
    assert_eq!(netlist.free_units(), units_before + 1);
    assert_eq!(netlist.slot_refcount(first_slot), 0);
    assert_eq!(netlist.slot_refcount(second_slot), 0);
}

#[test]
fn empty_unit_release_only_returns_the_unit() {
    let netlist = Netlist::builder()
        .slot_count(8)
        .data_count(8)
        .unit_count(4)
        .batch_width(nz!(1_usize))
        .build()
        .unwrap();

    let data_before = netlist.free_data();

    let unit = netlist.new_unit().unwrap();
    assert_eq!(netlist.free_units(), 2);

    netlist.delete_unit(unit);

    assert_eq!(netlist.free_units(), 3);
    assert_eq!(netlist.free_data(), data_before);
}

#[test]
fn batches_never_overlap_live_packets() {
    let netlist = Netlist::builder()
        .slot_count(16)
        .data_count(32)
        .batch_width(nz!(3_usize))
        .build()
        .unwrap();

    let mut live: Vec<DataPacket> = Vec::new();

    for round in 0..40 {
        let batch = netlist.acquire_batch().unwrap();
        assert_eq!(batch.len(), 3);

        let live_slots = live.iter().map(|p| p.slot()).collect::<HashSet<SlotId>>();
        let batch_slots = batch.slots().iter().copied().collect::<HashSet<_>>();

        assert_eq!(batch_slots.len(), 3, "batch slots must be distinct");
        assert!(live_slots.is_disjoint(&batch_slots));

        batch.commit(&mut live);

        // Keep a sliding window of live packets so the ring wraps many times.
        while live.len() > 9 {
            live.remove(round % 3);
        }
    }

    drop(live);
    assert_eq!(netlist.free_slots(), 15);
}

#[test]
fn prebound_and_counted_allocation_do_not_mix() {
    let netlist = Netlist::builder()
        .slot_count(8)
        .data_count(8)
        .batch_width(nz!(2_usize))
        .build()
        .unwrap();

    let packet = netlist.new_packet(1).unwrap();

    assert!(matches!(
        netlist.new_ptr(),
        Err(Error::BindingConflict { .. })
    ));

    drop(packet);

    let not_prebound = Netlist::builder()
        .slot_count(8)
        .data_count(16)
        .batch_width(nz!(2_usize))
        .build()
        .unwrap();

    assert!(matches!(not_prebound.new_ptr(), Err(Error::NotPrebound)));
}
