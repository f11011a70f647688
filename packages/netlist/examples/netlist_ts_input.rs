//! A transport stream input loop built on a netlist:
//!
//! * A reader thread fills slots in batches straight from the input.
//! * The main thread sorts the packets by PID and assembles one unit per PID.
//! * Releasing a unit hands its slots back to the reader.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Cursor;
use std::sync::mpsc;
use std::thread;

use netlist::{DataPacket, Netlist, Unit};
use new_zealand::nz;

const TS_PACKET: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const HEADER: usize = 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let netlist = Netlist::builder()
        .slot_count(64)
        .data_count(128)
        .unit_count(8)
        .slot_size(nz!(188_usize))
        .batch_width(nz!(7_usize))
        .build()?;

    println!("{netlist:?}");

    let input = synthetic_stream(3 * 7 * 10);
    let (sender, receiver) = mpsc::channel::<DataPacket>();

    let reader = thread::spawn({
        let netlist = netlist.clone();

        move || -> std::io::Result<()> {
            let mut source = Cursor::new(input);

            loop {
                // Blocks while the demultiplexer still holds every slot.
                let Ok(mut batch) = netlist.acquire_batch() else {
                    return Ok(());
                };

                let bytes = batch.read_from(&mut source)?;
                if bytes == 0 {
                    return Ok(());
                }

                let mut packets = Vec::with_capacity(batch.len());
                batch.commit_partial(bytes.div_ceil(TS_PACKET), &mut packets);

                for packet in packets {
                    if sender.send(packet).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    });

    let mut units: HashMap<u16, Unit> = HashMap::new();

    for mut packet in receiver {
        let header = packet.payload();
        if header.first() != Some(&SYNC_BYTE) {
            packet.set_discard(true);
            continue;
        }

        let pid = u16::from_be_bytes([header[1] & 0x1F, header[2]]);
        packet.set_payload_bounds(HEADER, TS_PACKET);

        let unit = match units.entry(pid) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(netlist.new_unit()?),
        };
        unit.push(packet);

        // Every 7 packets make a complete unit in this synthetic stream.
        if unit.len() == 7 {
            let unit = units.remove(&pid).expect("just inserted");
            println!(
                "PID {pid:#06x}: unit of {} packets, {} payload bytes",
                unit.len(),
                unit.payload_size()
            );

            // Releases all 7 packets and their slots.
            drop(unit);
        }
    }

    reader.join().expect("reader thread panicked")?;

    println!(
        "Done. Free slots: {}, free data descriptors: {}, free units: {}",
        netlist.free_slots(),
        netlist.free_data(),
        netlist.free_units()
    );

    Ok(())
}

/// Transport stream packets for three PIDs, seven consecutive packets per PID at a time.
fn synthetic_stream(packets: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(packets * TS_PACKET);

    for index in 0..packets {
        let pid: u16 = match (index / 7) % 3 {
            0 => 0x100,
            1 => 0x101,
            _ => 0x200,
        };

        let [pid_high, pid_low] = pid.to_be_bytes();

        let mut packet = [0xFF_u8; TS_PACKET];
        packet[0] = SYNC_BYTE;
        packet[1] = pid_high;
        packet[2] = pid_low;
        packet[3] = 0x10;

        bytes.extend_from_slice(&packet);
    }

    bytes
}
