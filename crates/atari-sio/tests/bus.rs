//! Bus-level tests with a device that answers on DATA IN.

use std::any::Any;

use atari_sio::{
    SioBus, SioDevice, SioPort, STANDARD_CYCLES_PER_BIT, TRANSMIT_LATENCY, sio_checksum,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Replies to every non-command byte with its complement, and to a
/// complete command frame with ACK ('A').
#[derive(Default)]
struct Echo {
    frame: Vec<u8>,
    command: bool,
}

impl Echo {
    fn send(port: &mut SioPort<'_>, byte: u8, cycles_per_bit: u32) {
        let start = port.now() + TRANSMIT_LATENCY;
        port.add_transmit_bit(start, false);
        for bit in 0..8 {
            port.add_transmit_bit(start + cycles_per_bit * (bit + 1), byte & (1 << bit) != 0);
        }
        port.add_transmit_bit(start + cycles_per_bit * 9, true);
    }
}

impl SioDevice for Echo {
    fn on_command_state_changed(&mut self, _port: &mut SioPort<'_>, asserted: bool) {
        self.command = asserted;
        if asserted {
            self.frame.clear();
        }
    }

    fn on_begin_receive_byte(&mut self, _port: &mut SioPort<'_>, _byte: u8, _command: bool, _cpb: u32) {}

    fn on_receive_byte(&mut self, port: &mut SioPort<'_>, byte: u8, command: bool, cpb: u32) {
        if command {
            self.frame.push(byte);
            if self.frame.len() == 5 && sio_checksum(&self.frame[..4]) == self.frame[4] {
                Self::send(port, b'A', cpb);
            }
        } else {
            Self::send(port, !byte, cpb);
        }
    }

    fn on_truncate_byte(&mut self, _port: &mut SioPort<'_>) {}

    fn sync(&mut self, _port: &mut SioPort<'_>) {}

    fn on_master_event(&mut self, _port: &mut SioPort<'_>, _id: u32) {}

    fn cold_reset(&mut self, _port: &mut SioPort<'_>) {
        self.frame.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn data_bytes_are_answered() {
    init_logging();
    let mut bus = SioBus::default();
    bus.add_device(Box::new(Echo::default()));
    bus.set_receive_cycles_per_bit(STANDARD_CYCLES_PER_BIT);

    bus.send_byte(0x5A, STANDARD_CYCLES_PER_BIT);
    bus.send_byte(0x00, STANDARD_CYCLES_PER_BIT);
    bus.run_for(10_000);

    let bytes: Vec<u8> = bus.received().iter().map(|r| r.byte).collect();
    assert_eq!(bytes, vec![0xA5, 0xFF]);
    // First reply starts one byte time plus the latency after the send.
    assert_eq!(bus.received()[0].tick, 930 + TRANSMIT_LATENCY);
}

#[test]
fn command_frame_is_acknowledged() {
    init_logging();
    let mut bus = SioBus::default();
    let id = bus.add_device(Box::new(Echo::default()));

    bus.queue_command_frame(0x50, 0x3F, 0x00, 0x00, STANDARD_CYCLES_PER_BIT);
    bus.run_for(20_000);

    let bytes: Vec<u8> = bus.take_received().iter().map(|r| r.byte).collect();
    assert_eq!(bytes, vec![b'A']);
    assert!(!bus.command());
    assert_eq!(bus.device::<Echo>(id).map(|e| e.frame.len()), Some(5));
    assert!(bus.received().is_empty());
}

#[test]
fn two_devices_share_the_line() {
    init_logging();
    let mut bus = SioBus::default();
    bus.add_device(Box::new(Echo::default()));
    let quiet = bus.add_device(Box::new(Echo::default()));
    bus.set_receive_cycles_per_bit(STANDARD_CYCLES_PER_BIT);

    // Both answer identically, so the wired-AND line carries one clean byte.
    bus.send_byte(0x0F, STANDARD_CYCLES_PER_BIT);
    bus.run_for(5_000);
    assert_eq!(bus.received().len(), 1);
    assert_eq!(bus.received()[0].byte, 0xF0);
    assert!(bus.device::<Echo>(quiet).is_some());
}
