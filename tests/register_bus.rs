mod common;

use common::{power_up, run_ms, seconds, set_measurement, FakeIrq, Host, Rig};
use pmc_firmware::config::{FIRMWARE_ID, FIRMWARE_VERSION, PERSISTENT_LEN};
use pmc_firmware::drivers::sampler::Measurement;
use pmc_firmware::protocol::registers::{
    Slot, CONTROL_BASE, READ_WRITE_START, SLOT_COUNT, STORE_IDLE, STORE_RELOAD,
};
use pmc_firmware::protocol::{BusEvent, BusResponse};
use pmc_firmware::{SharedState, Supervisor};

fn control(slot: Slot) -> u16 {
    CONTROL_BASE + slot as u16
}

#[test]
fn every_persistent_byte_reads_back() {
    let shared = SharedState::new();
    let host = Host::new(&shared);
    for pointer in 0..PERSISTENT_LEN as u16 {
        let value = (pointer as u8).wrapping_mul(7) ^ 0x5A;
        host.write(pointer, &[value]);
        assert_eq!(host.read_u8(pointer), value, "pointer {}", pointer);
    }
}

#[test]
fn control_slots_honour_the_read_only_boundary() {
    let shared = SharedState::new();
    let host = Host::new(&shared);
    let before = host.read(CONTROL_BASE, SLOT_COUNT);

    for index in 0..SLOT_COUNT as u16 {
        host.write(CONTROL_BASE + index, &[0xA5]);
        let got = host.read_u8(CONTROL_BASE + index);
        if index < READ_WRITE_START as u16 {
            assert_eq!(got, before[index as usize], "slot {} is read-only", index);
        } else {
            assert_eq!(got, 0xA5, "slot {}", index);
        }
    }
}

#[test]
fn region_boundary_routing() {
    let shared = SharedState::new();
    let host = Host::new(&shared);

    host.write(4095, &[0xAB]);
    let stored = shared.persistent.masked(&FakeIrq::new(), |a| a.read(4095));
    assert_eq!(stored, 0xAB);

    // 4096 is the identity slot
    host.write(4096, &[0xCD]);
    assert_eq!(host.read_u8(4096), FIRMWARE_ID);
    // Sequential read walks from the last persistent byte into the slots
    assert_eq!(host.read(4095, 3), [0xAB, FIRMWARE_ID, FIRMWARE_VERSION]);
}

#[test]
fn control_pointer_masks_to_32_slots() {
    let shared = SharedState::new();
    let host = Host::new(&shared);
    host.write(control(Slot::Brightness), &[77]);
    assert_eq!(host.read_u8(control(Slot::Brightness) + 32), 77);
    assert_eq!(host.read_u8(0xFFFF), host.read_u8(CONTROL_BASE + 31));
}

#[test]
fn measurement_read_comes_from_one_snapshot() {
    let shared = SharedState::new();
    let host = Host::new(&shared);
    set_measurement(&shared, Measurement::BatteryVoltage, 0x0FFF);

    host.write(control(Slot::BatteryVoltage), &[]);
    let first = host.event(BusEvent::Start { read: true });
    // The sampler publishes a new value between the two bytes
    set_measurement(&shared, Measurement::BatteryVoltage, 0x1000);
    let second = host.event(BusEvent::Transmitted { acked: true });
    host.event(BusEvent::Transmitted { acked: false });

    assert_eq!(first, BusResponse::Transmit(0x0F));
    assert_eq!(second, BusResponse::Transmit(0xFF));

    let fresh = host.read(control(Slot::BatteryVoltage), 2);
    assert_eq!(fresh, [0x10, 0x00]);
}

#[test]
fn clock_is_not_republished_under_an_open_read() {
    let rig = Rig::new();
    let shared = SharedState::new();
    let mut sv = Supervisor::new(&shared, rig.parts());
    sv.power_on(0);
    power_up(&rig, &mut sv, &shared);

    let host = Host::new(&shared);
    host.write(control(Slot::Time), &0x0000_00FFu32.to_be_bytes());
    run_ms(&mut sv, &shared, 2);
    assert_eq!(host.read_u32(control(Slot::Time)), 0xFF);

    host.write(control(Slot::Time), &[]);
    let mut bytes = Vec::new();
    match host.event(BusEvent::Start { read: true }) {
        BusResponse::Transmit(b) => bytes.push(b),
        other => panic!("{:?}", other),
    }
    // The counter rolls into the next byte while the host is mid-read
    seconds(&shared, 1);
    run_ms(&mut sv, &shared, 3);
    for i in 0..3 {
        match host.event(BusEvent::Transmitted { acked: true }) {
            BusResponse::Transmit(b) => bytes.push(b),
            other => panic!("byte {}: {:?}", i, other),
        }
    }
    host.event(BusEvent::Transmitted { acked: false });
    assert_eq!(bytes, [0, 0, 0, 0xFF]);

    run_ms(&mut sv, &shared, 2);
    assert_eq!(host.read_u32(control(Slot::Time)), 0x100);
}

#[test]
fn committed_time_counts_on() {
    let rig = Rig::new();
    let shared = SharedState::new();
    let mut sv = Supervisor::new(&shared, rig.parts());
    sv.power_on(0);
    power_up(&rig, &mut sv, &shared);

    let host = Host::new(&shared);
    let start = 1_700_000_000u32;
    host.write(control(Slot::Time), &start.to_be_bytes());
    run_ms(&mut sv, &shared, 2);
    seconds(&shared, 5);
    run_ms(&mut sv, &shared, 2);

    let published = host.read_u32(control(Slot::Time));
    assert!(
        (start + 4..=start + 6).contains(&published),
        "published {}",
        published
    );
}

#[test]
fn partial_time_write_does_not_commit() {
    let rig = Rig::new();
    let shared = SharedState::new();
    let mut sv = Supervisor::new(&shared, rig.parts());
    sv.power_on(0);
    power_up(&rig, &mut sv, &shared);

    let host = Host::new(&shared);
    // Three high bytes only; the low byte is the commit
    host.write(control(Slot::Time), &[0x12, 0x34, 0x56]);
    run_ms(&mut sv, &shared, 2);
    assert_eq!(host.read_u32(control(Slot::Time)), 0);
}

#[test]
fn reload_twice_equals_reload_once() {
    let rig = Rig::new();
    for (i, cell) in rig.eeprom.borrow_mut().iter_mut().take(1024).enumerate() {
        *cell = (i % 251) as u8;
    }
    let shared = SharedState::new();
    let mut sv = Supervisor::new(&shared, rig.parts());
    sv.power_on(0);
    power_up(&rig, &mut sv, &shared);

    let host = Host::new(&shared);
    // Scribble over the mirrored slice and past it
    host.write(10, &[0xEE; 16]);
    host.write(2000, &[0x42]);

    host.write(control(Slot::StoreControl), &[STORE_RELOAD]);
    run_ms(&mut sv, &shared, 1);
    let once = host.read(0, 1024);
    assert_eq!(host.read_u8(control(Slot::StoreControl)), STORE_IDLE);

    host.write(control(Slot::StoreControl), &[STORE_RELOAD]);
    run_ms(&mut sv, &shared, 1);
    let twice = host.read(0, 1024);

    assert_eq!(once, twice);
    assert_eq!(once[10], 10);
    assert_eq!(host.read_u8(2000), 0x42);
}
