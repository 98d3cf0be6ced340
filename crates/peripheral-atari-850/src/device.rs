use std::any::Any;

use atari_sio::{
    DeviceTimeBase, NTSC_MASTER_CLOCK, SignalChange, SignalRecord, SioDevice, SioPort,
    TRANSMIT_LATENCY, TransmitBit,
};
use emu_core::{
    Clock, EventHandle, Observable, Scheduler, Value, round_to_int, tick_delta, tick_lt,
};
use mos_6502::{CoProc6502, CpuVariant};
use mos_riot_6532::Riot6532;

use crate::baud::BAUD_RATES;
use crate::board::{
    Board, HANDLER_RIOT1, HANDLER_RIOT2, LANE_1A, LANE_2A, LANE_2B, UartShifter, pins,
    receive_pin,
};
use crate::ports::{ParallelPrinter, SerialPort, SerialStatus, TerminalState};
use crate::snapshot::{Atari850State, SnapshotError, UartState};
use crate::{DEVICE_CLOCK, FirmwareStatus, ROM_SIZE};

/// Master events: serial receive recheck for ports 1-4, then resume.
const EVENT_RECEIVE: u32 = 1;
const EVENT_RESUME: u32 = 8;

/// Highest baud setting; settings above 0 select rate index `setting - 1`.
pub const MAX_BAUD_SETTING: u8 = 16;

/// The Atari 850 Interface Module.
///
/// Attach it with [`atari_sio::SioBus::add_device`] and reach it afterwards
/// through [`atari_sio::SioBus::with_device`] to plug in serial devices or a
/// printer.
pub struct Atari850 {
    board: Board,
    coproc: CoProc6502,
    scheduler: Scheduler,
    time_base: DeviceTimeBase,
    receive_events: [Option<EventHandle>; 4],
    resume_event: Option<EventHandle>,
    breakpoint: Option<u16>,
    firmware_usable: bool,
}

impl Default for Atari850 {
    fn default() -> Self {
        Self::new()
    }
}

impl Atari850 {
    /// An 850 on an NTSC master clock, with no firmware loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::with_master_clock(NTSC_MASTER_CLOCK)
    }

    #[must_use]
    pub fn with_master_clock(master: Clock) -> Self {
        let scheduler = Scheduler::new(DEVICE_CLOCK);
        let time_base = DeviceTimeBase::new(&master, scheduler.clock());

        let mut coproc = CoProc6502::new(CpuVariant::Nmos, ROM_SIZE);
        coproc.map_mut().memory_mut().fill(0xFF);

        // 13-bit decode: A12 selects ROM, A8 picks the RIOT, A7 splits
        // registers from RAM.
        let map = coproc.map_mut();
        map.clear();
        map.set_handlers(0x00, 1, HANDLER_RIOT2);
        map.set_handlers(0x01, 1, HANDLER_RIOT1);
        map.mirror(0x02, 0x0E, 0x00);
        map.set_read_memory(0x10, 0x10, 0);
        map.mirror(0x20, 0xE0, 0x00);

        Self {
            board: Board::new(master.ticks_per_second()),
            coproc,
            scheduler,
            time_base,
            receive_events: [None; 4],
            resume_event: None,
            breakpoint: None,
            firmware_usable: false,
        }
    }

    // --- Firmware ---

    /// Install a ROM image. `None` or a wrongly sized image leaves a dummy
    /// ROM of 0xFF bytes (padded where the image was short) and reports the
    /// firmware as missing. Returns true if the ROM contents changed.
    pub fn load_firmware(&mut self, image: Option<&[u8]>) -> bool {
        let mut rom = [0xFF; ROM_SIZE];
        let usable = match image {
            Some(bytes) => {
                let len = bytes.len().min(ROM_SIZE);
                rom[..len].copy_from_slice(&bytes[..len]);
                if bytes.len() != ROM_SIZE {
                    log::warn!(
                        "850 firmware is {} bytes, expected {ROM_SIZE}",
                        bytes.len()
                    );
                }
                bytes.len() == ROM_SIZE
            }
            None => {
                log::warn!("850 firmware missing; running a blank ROM");
                false
            }
        };

        let memory = self.coproc.map_mut().memory_mut();
        let changed = memory[..ROM_SIZE] != rom[..];
        memory[..ROM_SIZE].copy_from_slice(&rom);
        self.firmware_usable = usable;
        changed
    }

    #[must_use]
    pub fn firmware_status(&self) -> FirmwareStatus {
        if self.firmware_usable {
            FirmwareStatus::Ok
        } else {
            FirmwareStatus::Missing
        }
    }

    // --- Settings ---

    /// Set the baud setting of serial port `index` (0-3). Zero follows the
    /// computer's rate; anything else locks the port to rate index
    /// `setting - 1`. Values above [`MAX_BAUD_SETTING`] are clamped.
    pub fn set_baud_setting(&mut self, index: usize, setting: u8) {
        let Some(slot) = self.board.baud_settings.get_mut(index) else {
            return;
        };
        let setting = setting.min(MAX_BAUD_SETTING);
        *slot = setting;
        if setting != 0 {
            self.board.baud_indices[index] = setting - 1;
        }
    }

    #[must_use]
    pub fn baud_setting(&self, index: usize) -> u8 {
        self.board.baud_settings.get(index).copied().unwrap_or(0)
    }

    /// Baud rate serial port `index` is currently shifting at.
    #[must_use]
    pub fn baud_rate(&self, index: usize) -> u32 {
        self.board
            .baud_indices
            .get(index)
            .map_or(0, |&i| BAUD_RATES[usize::from(i)])
    }

    // --- Attachments ---

    /// Plug a serial device into port `index` (0-3), returning whatever was
    /// there before.
    pub fn attach_serial_port(
        &mut self,
        port: &mut SioPort<'_>,
        index: usize,
        device: Box<dyn SerialPort>,
    ) -> Option<Box<dyn SerialPort>> {
        if index >= 4 {
            return Some(device);
        }
        let previous = self.detach_serial_port(port, index);

        self.board.serial[index] = Some(device);
        if index < 3 {
            self.serial_status_changed(port, index);
        }
        self.board.update_control(index);
        self.serial_read_ready(port, index);
        previous
    }

    /// Unplug the serial device on port `index`. Its input lines float high.
    pub fn detach_serial_port(
        &mut self,
        port: &mut SioPort<'_>,
        index: usize,
    ) -> Option<Box<dyn SerialPort>> {
        let device = self.board.serial.get_mut(index)?.take()?;

        let change = detached_lines(index);
        let tick = self.drive_time(port.now());
        self.board.add_signal(&mut self.scheduler, tick, change, true);

        port.unset_event(&mut self.receive_events[index]);
        Some(device)
    }

    /// Borrow the serial device on port `index`.
    pub fn serial_port_mut(&mut self, index: usize) -> Option<&mut (dyn SerialPort + 'static)> {
        self.board.serial.get_mut(index)?.as_deref_mut()
    }

    /// The device on port `index` changed its modem status lines.
    pub fn serial_status_changed(&mut self, port: &mut SioPort<'_>, index: usize) {
        let Some(status) = self
            .board
            .serial
            .get(index)
            .and_then(Option::as_ref)
            .map(|d| d.status())
        else {
            return;
        };

        let Some(change) = status_lines(index, status) else {
            return;
        };
        let tick = self.drive_time(port.now());
        self.board.add_signal(&mut self.scheduler, tick, change, false);
    }

    /// The device on port `index` may have a byte for the 850. Does
    /// nothing while a previous byte is still shifting in.
    pub fn serial_read_ready(&mut self, port: &mut SioPort<'_>, index: usize) {
        if index >= 4 || port.master.is_pending(self.receive_events[index]) {
            return;
        }
        let Some(device) = self.board.serial[index].as_mut() else {
            return;
        };
        let Some((baud, byte)) = device.read() else {
            return;
        };
        if baud == 0 {
            log::debug!("850 port {}: dropped ${byte:02X} with no baud rate", index + 1);
            return;
        }

        let device_cycles_per_bit = self.scheduler.clock().ticks_per_second() / f64::from(baud);
        let (lane, mask) = receive_pin(index);

        let base = self.drive_time(port.now());
        self.board
            .add_signal(&mut self.scheduler, base, pins(lane, 0x00, mask), true);

        let mut pattern = u32::from(byte) | 0x100;
        for bit in 1..=9 {
            let edge = base.wrapping_add(round_to_int(device_cycles_per_bit * f64::from(bit)) as u32);
            let value = if pattern & 1 != 0 { mask } else { 0 };
            pattern >>= 1;
            self.board
                .add_signal(&mut self.scheduler, edge, pins(lane, value, mask), false);
        }

        let byte_time = round_to_int(self.board.master_rate / f64::from(baud) * 10.0);
        port.set_event(
            (byte_time.max(1)) as u32,
            EVENT_RECEIVE + index as u32,
            &mut self.receive_events[index],
        );
    }

    /// Plug in a printer. /FAULT (RIOT #2 PA6) goes low.
    pub fn attach_printer(
        &mut self,
        printer: Box<dyn ParallelPrinter>,
    ) -> Option<Box<dyn ParallelPrinter>> {
        self.board.riot2.set_input_a(0x00, 0x40);
        self.board.printer.replace(printer)
    }

    pub fn detach_printer(&mut self) -> Option<Box<dyn ParallelPrinter>> {
        self.board.riot2.set_input_a(0x40, 0x40);
        self.board.printer.take()
    }

    // --- Inspection ---

    /// Control lines the 850 drives on serial port `index`.
    #[must_use]
    pub fn terminal_state(&self, index: usize) -> TerminalState {
        self.board.terminal_state(index)
    }

    #[must_use]
    pub fn coproc(&self) -> &CoProc6502 {
        &self.coproc
    }

    pub fn coproc_mut(&mut self) -> &mut CoProc6502 {
        &mut self.coproc
    }

    #[must_use]
    pub fn device_scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn riot1(&self) -> &Riot6532 {
        &self.board.riot1
    }

    #[must_use]
    pub fn riot2(&self) -> &Riot6532 {
        &self.board.riot2
    }

    /// Read the 6507's address space without side effects.
    #[must_use]
    pub fn debug_read(&self, address: u16) -> u8 {
        self.coproc.debug_read(&self.board, &self.scheduler, address)
    }

    /// Breakpoint address the co-processor stopped on since the last call.
    pub fn take_breakpoint_hit(&mut self) -> Option<u16> {
        self.breakpoint.take()
    }

    // --- Snapshots ---

    /// Capture the device. Ticks are stored relative to the device and
    /// master clocks, so the state loads into a device at any time.
    #[must_use]
    pub fn save_state(&self, port: &SioPort<'_>) -> Atari850State {
        let now = self.scheduler.tick();
        let signals = self
            .board
            .signals
            .pending()
            .iter()
            .map(|r| SignalRecord {
                tick: r.tick.wrapping_sub(now),
                change: r.change,
            })
            .collect();

        let shifters = self.board.shifters.map(|s| UartState {
            cycles_per_bit: s.cycles_per_bit,
            elapsed: now.wrapping_sub(s.start_base),
            shift: s.shift,
            bits_shifted: s.bits_shifted,
            last_bit: s.last_bit,
        });

        let receive_pending = self.receive_events.map(|handle| {
            port.master
                .is_pending(handle)
                .then(|| port.master.ticks_to_event(handle))
        });

        let master_now = port.now();
        let transmit_bits: Vec<TransmitBit> = port
            .transmit
            .pending()
            .map(|b| TransmitBit {
                tick: b.tick.wrapping_sub(master_now),
                level: b.level,
            })
            .collect();
        let transmit_level = transmit_bits
            .first()
            .map_or(port.transmit.last_level(), |b| !b.level);

        let mut time_base = self.time_base;
        time_base.accumulate(master_now);

        Atari850State {
            cpu: self.coproc.cpu().clone(),
            riot1: self.board.riot1.save_state(&self.scheduler),
            riot2: self.board.riot2.save_state(&self.scheduler),
            signals,
            shifters,
            baud_settings: self.board.baud_settings,
            baud_indices: self.board.baud_indices,
            last_pokey_cycles_per_bit: self.board.last_pokey_cycles_per_bit,
            last_sio_data_in: self.board.last_sio_data_in,
            device_lag: time_base.device_limit().wrapping_sub(now),
            fraction: time_base.fraction(),
            receive_pending,
            transmit_bits,
            transmit_level,
        }
    }

    /// Restore a state from [`save_state`](Self::save_state). The state is
    /// checked in full first; on error the device is untouched.
    pub fn load_state(
        &mut self,
        port: &mut SioPort<'_>,
        state: &Atari850State,
    ) -> Result<(), SnapshotError> {
        validate(state)?;

        let mut riot1 = self.board.riot1.clone();
        let mut riot2 = self.board.riot2.clone();
        riot1.load_state(&mut self.scheduler, &state.riot1)?;
        riot2.load_state(&mut self.scheduler, &state.riot2)?;
        self.board.riot1 = riot1;
        self.board.riot2 = riot2;

        let now = self.scheduler.tick();
        self.coproc.restore_cpu(state.cpu.clone());

        let records: Vec<SignalRecord> = state
            .signals
            .iter()
            .map(|r| SignalRecord {
                tick: now.wrapping_add(r.tick),
                change: r.change,
            })
            .collect();
        self.board.clear_signals(&mut self.scheduler);
        self.board.signals.restore(&records);
        self.board.arm_signals(&mut self.scheduler);

        for (shifter, saved) in self.board.shifters.iter_mut().zip(&state.shifters) {
            *shifter = UartShifter {
                cycles_per_bit: saved.cycles_per_bit,
                start_base: now.wrapping_sub(saved.elapsed),
                shift: saved.shift,
                bits_shifted: saved.bits_shifted,
                last_bit: saved.last_bit,
            };
        }
        self.board.rearm_shifters(&mut self.scheduler);

        self.board.baud_settings = state.baud_settings;
        self.board.baud_indices = state.baud_indices;
        self.board.last_pokey_cycles_per_bit = state.last_pokey_cycles_per_bit;
        self.board.last_sio_data_in = state.last_sio_data_in;
        self.board.transmit_bits.clear();

        let master_now = port.now();
        let transmit: Vec<TransmitBit> = state
            .transmit_bits
            .iter()
            .map(|b| TransmitBit {
                tick: master_now.wrapping_add(b.tick),
                level: b.level,
            })
            .collect();
        port.transmit.restore(port.master, state.transmit_level, &transmit);

        self.time_base
            .restore(master_now, now.wrapping_add(state.device_lag), state.fraction);

        for (index, pending) in state.receive_pending.iter().enumerate() {
            match pending {
                Some(delta) => port.set_event(
                    (*delta).max(1),
                    EVENT_RECEIVE + index as u32,
                    &mut self.receive_events[index],
                ),
                None => port.unset_event(&mut self.receive_events[index]),
            }
        }
        port.unset_event(&mut self.resume_event);
        self.breakpoint = None;

        log::debug!("850 state loaded at device tick {now}");
        Ok(())
    }

    // --- Internal helpers ---

    /// Device tick for an input edge at master tick `master_now`, never
    /// behind the device's own clock.
    fn drive_time(&self, master_now: u32) -> u32 {
        let tick = self.time_base.master_to_device(master_now);
        let now = self.scheduler.tick();
        if tick_lt(tick, now) { now } else { tick }
    }

    /// Hand DATA IN edges recorded during the last run to the bus.
    fn flush_transmit(&mut self, port: &mut SioPort<'_>) {
        for (tick, level) in self.board.transmit_bits.drain(..) {
            let master = self
                .time_base
                .device_to_master(tick)
                .wrapping_add(TRANSMIT_LATENCY);
            port.add_transmit_bit(master, level);
        }
    }

    /// Drive the external input lines to match what is plugged in.
    fn reassert_lines(&mut self, command: bool) {
        // PA6 on RIOT #1 is grounded; DATA OUT idles at mark (inverted).
        let mut change = pins(LANE_1A, if command { 0x80 } else { 0x00 }, 0xC0)
            .with_lane(LANE_2A, 0x00, 0x01)
            .with_lane(
                LANE_2A,
                if self.board.printer.is_some() { 0x00 } else { 0x40 },
                0x40,
            );

        for index in 0..4 {
            change.merge(detached_lines(index));
            if let Some(device) = self.board.serial[index].as_ref() {
                if let Some(status) = status_lines(index, device.status()) {
                    change.merge(status);
                }
            }
        }
        self.board.apply(change);
    }
}

/// Input levels of serial port `index` with nothing plugged in.
fn detached_lines(index: usize) -> SignalChange {
    match index {
        0 => pins(LANE_1A, 0xFF, 0x33),
        1 => pins(LANE_1A, 0xFF, 0x04).with_lane(LANE_2B, 0xFF, 0x80),
        2 => pins(LANE_1A, 0xFF, 0x08).with_lane(LANE_2A, 0xFF, 0x80),
        _ => pins(LANE_2B, 0xFF, 0x01),
    }
}

/// Modem status inputs of serial port `index`. Port 4 has none.
fn status_lines(index: usize, status: SerialStatus) -> Option<SignalChange> {
    let dsr = if status.data_set_ready { 0x00 } else { 0xFF };
    match index {
        0 => Some(pins(LANE_1A, status_bits(status), 0x32)),
        1 => Some(pins(LANE_1A, dsr, 0x04)),
        2 => Some(pins(LANE_1A, dsr, 0x08)),
        _ => None,
    }
}

/// RIOT #1 PA1/PA4/PA5 levels for serial port 1's DSR/CD/CTS (inverted).
fn status_bits(status: SerialStatus) -> u8 {
    let mut bits = 0;
    if !status.data_set_ready {
        bits |= 0x02;
    }
    if !status.carrier_detect {
        bits |= 0x10;
    }
    if !status.clear_to_send {
        bits |= 0x20;
    }
    bits
}

/// Co-processor registers under `cpu.`, RIOT pins and the device clock.
impl Observable for Atari850 {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(reg) = path.strip_prefix("cpu.") {
            return self.coproc.cpu().query(reg);
        }
        match path {
            "tick" => Some(self.scheduler.tick().into()),
            "firmware" => Some(self.firmware_usable.into()),
            "riot1.pa" => Some(self.board.riot1.input_a().into()),
            "riot1.pb" => Some(self.board.riot1.input_b().into()),
            "riot1.irq" => Some(self.board.riot1.irq().into()),
            "riot2.pa" => Some(self.board.riot2.input_a().into()),
            "riot2.pb" => Some(self.board.riot2.input_b().into()),
            "riot2.irq" => Some(self.board.riot2.irq().into()),
            "sio.data_in" => Some(self.board.last_sio_data_in.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cpu.pc", "cpu.a", "cpu.x", "cpu.y", "cpu.s", "cpu.p", "cpu.flags.c", "cpu.flags.z",
            "cpu.flags.i", "cpu.flags.d", "cpu.flags.v", "cpu.flags.n", "cpu.cycle",
            "cpu.halted", "cpu.irq", "tick", "firmware", "riot1.pa", "riot1.pb", "riot1.irq",
            "riot2.pa", "riot2.pb", "riot2.irq", "sio.data_in",
        ]
    }
}

fn validate(state: &Atari850State) -> Result<(), SnapshotError> {
    for riot in [&state.riot1, &state.riot2] {
        if riot.ram.len() != mos_riot_6532::RAM_SIZE {
            return Err(mos_riot_6532::RiotError::RamSize(riot.ram.len()).into());
        }
    }
    if state.signals.iter().any(|r| r.tick >= 0x8000_0000) {
        return Err(SnapshotError::Shape { field: "signals" });
    }
    if state
        .signals
        .windows(2)
        .any(|w| tick_delta(w[0].tick, w[1].tick) < 0)
    {
        return Err(SnapshotError::Shape { field: "signals" });
    }
    if state.shifters.iter().any(|s| s.bits_shifted > 10) {
        return Err(SnapshotError::Shape { field: "shifters" });
    }
    if state.baud_indices.iter().any(|&i| usize::from(i) >= BAUD_RATES.len()) {
        return Err(SnapshotError::Shape { field: "baud_indices" });
    }
    if state.baud_settings.iter().any(|&s| s > MAX_BAUD_SETTING) {
        return Err(SnapshotError::Shape { field: "baud_settings" });
    }
    if state
        .transmit_bits
        .iter()
        .any(|b| b.tick == 0 || b.tick >= 0x8000_0000)
    {
        return Err(SnapshotError::Shape { field: "transmit_bits" });
    }
    if state
        .transmit_bits
        .windows(2)
        .any(|w| w[0].level == w[1].level || tick_delta(w[0].tick, w[1].tick) <= 0)
    {
        return Err(SnapshotError::Shape { field: "transmit_bits" });
    }
    if state.device_lag >= 0x8000_0000 {
        return Err(SnapshotError::Shape { field: "device_lag" });
    }
    Ok(())
}

impl SioDevice for Atari850 {
    fn on_command_state_changed(&mut self, port: &mut SioPort<'_>, asserted: bool) {
        // COMMAND -> RIOT #1 PA7
        let tick = self.drive_time(port.now());
        let value = if asserted { 0x80 } else { 0x00 };
        self.board
            .add_signal(&mut self.scheduler, tick, pins(LANE_1A, value, 0x80), true);
    }

    fn on_begin_receive_byte(
        &mut self,
        port: &mut SioPort<'_>,
        byte: u8,
        _command: bool,
        cycles_per_bit: u32,
    ) {
        self.board.last_pokey_cycles_per_bit = cycles_per_bit;
        let device_cycles_per_bit = self.time_base.device_cycles_per_bit(cycles_per_bit);

        // Inverted DATA OUT -> RIOT #2 PA0: start bit now, then eight data
        // bits and the stop bit, each truncating anything queued after it.
        let start = self.drive_time(port.now());
        self.board
            .add_signal(&mut self.scheduler, start, pins(LANE_2A, 0x01, 0x01), true);

        let mut pattern = u32::from(!byte);
        for bit in 1..=9 {
            let edge = start.wrapping_add(round_to_int(device_cycles_per_bit * f64::from(bit)) as u32);
            let value = (pattern & 1) as u8;
            pattern >>= 1;
            self.board
                .add_signal(&mut self.scheduler, edge, pins(LANE_2A, value, 0x01), true);
        }
    }

    fn on_truncate_byte(&mut self, port: &mut SioPort<'_>) {
        let tick = self.drive_time(port.now());
        self.board
            .add_signal(&mut self.scheduler, tick, pins(LANE_2A, 0x00, 0x01), true);
    }

    fn sync(&mut self, port: &mut SioPort<'_>) {
        let limit = self.time_base.accumulate(port.now());

        let mut completed = true;
        if tick_lt(self.scheduler.tick(), limit) {
            self.scheduler.set_stop_tick(limit);
            completed = self.coproc.run(&mut self.board, &mut self.scheduler);
        }

        if !completed {
            if self.coproc.breakpoint_hit() {
                self.breakpoint = Some(self.coproc.cpu().regs.pc);
            }
            port.set_event(1, EVENT_RESUME, &mut self.resume_event);
        }

        self.flush_transmit(port);
    }

    fn on_master_event(&mut self, port: &mut SioPort<'_>, id: u32) {
        match id {
            EVENT_RESUME => {
                self.resume_event = None;
                self.sync(port);
            }
            _ if (EVENT_RECEIVE..EVENT_RECEIVE + 4).contains(&id) => {
                let index = (id - EVENT_RECEIVE) as usize;
                self.receive_events[index] = None;
                self.serial_read_ready(port, index);
            }
            _ => log::warn!("850: unknown master event {id}"),
        }
    }

    fn cold_reset(&mut self, port: &mut SioPort<'_>) {
        port.transmit.reset(port.master);
        // 300 baud is 5966 master cycles per bit.
        port.transmit.set_max_cycles_per_bit(7000);

        self.board.clear_signals(&mut self.scheduler);
        self.board.reset_shifters(&mut self.scheduler);
        for event in &mut self.receive_events {
            port.unset_event(event);
        }
        port.unset_event(&mut self.resume_event);
        self.breakpoint = None;

        self.board.last_sio_data_in = true;
        self.board.transmit_bits.clear();

        self.coproc.cold_reset();
        self.board.riot1.reset(&mut self.scheduler);
        self.board.riot2.reset(&mut self.scheduler);
        self.board.update_sio_data_in(&self.scheduler);
        self.board.riot1.ram_mut().fill(0xFF);
        self.board.riot2.ram_mut().fill(0xFF);

        self.time_base.reset(port.now(), self.scheduler.tick());
        self.reassert_lines(port.command);

        log::debug!("850 cold reset at master tick {}", port.now());
        self.warm_reset(port);
    }

    fn warm_reset(&mut self, port: &mut SioPort<'_>) {
        // The computer's transmission is cut short.
        self.on_truncate_byte(port);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atari_sio::{SerialBitTransmitQueue, TRANSMIT_EVENT};
    use emu_core::EventTarget;

    fn with_port<R>(f: impl FnOnce(&mut SioPort<'_>) -> R) -> R {
        let mut master = Scheduler::new(NTSC_MASTER_CLOCK);
        let mut transmit = SerialBitTransmitQueue::new(EventTarget(0), TRANSMIT_EVENT);
        let mut port = SioPort {
            master: &mut master,
            transmit: &mut transmit,
            target: EventTarget(0),
            command: false,
        };
        f(&mut port)
    }

    #[test]
    fn blank_rom_without_firmware() {
        let mut dev = Atari850::new();
        assert_eq!(dev.firmware_status(), FirmwareStatus::Missing);
        assert!(!dev.load_firmware(None));
        assert_eq!(dev.debug_read(0x1FFC), 0xFF);

        let mut rom = vec![0xEA; ROM_SIZE];
        rom[0xFFC] = 0x00;
        rom[0xFFD] = 0x10;
        assert!(dev.load_firmware(Some(&rom)));
        assert_eq!(dev.firmware_status(), FirmwareStatus::Ok);
        assert_eq!(dev.debug_read(0x1FFD), 0x10);
        // A12 set anywhere above the 8K window reaches the ROM.
        assert_eq!(dev.debug_read(0xFFFD), 0x10);
        assert!(!dev.load_firmware(Some(&rom)));
    }

    #[test]
    fn short_image_is_padded_and_missing() {
        let mut dev = Atari850::new();
        dev.load_firmware(Some(&[0x4C, 0x00, 0x10]));
        assert_eq!(dev.firmware_status(), FirmwareStatus::Missing);
        assert_eq!(dev.debug_read(0x1000), 0x4C);
        assert_eq!(dev.debug_read(0x1003), 0xFF);
    }

    #[test]
    fn ram_mirrors_through_the_low_page_pair() {
        let mut dev = Atari850::new();
        with_port(|port| dev.cold_reset(port));
        assert_eq!(dev.debug_read(0x0080), 0xFF);
        dev.board.riot2.ram_mut()[3] = 0x12;
        dev.board.riot1.ram_mut()[3] = 0x34;
        assert_eq!(dev.debug_read(0x0083), 0x12);
        assert_eq!(dev.debug_read(0x0E83), 0x12);
        assert_eq!(dev.debug_read(0x0103), 0x34);
        assert_eq!(dev.debug_read(0x2103), 0x34);
    }

    #[test]
    fn baud_settings_lock_the_rate() {
        let mut dev = Atari850::new();
        assert_eq!(dev.baud_rate(0), 300);
        dev.set_baud_setting(0, 15);
        assert_eq!(dev.baud_setting(0), 15);
        assert_eq!(dev.baud_rate(0), 9600);
        dev.set_baud_setting(1, 200);
        assert_eq!(dev.baud_setting(1), MAX_BAUD_SETTING);
        assert_eq!(dev.baud_rate(1), 9600);
        dev.set_baud_setting(9, 3);
        assert_eq!(dev.baud_setting(9), 0);
    }

    #[test]
    fn cold_reset_drives_detached_lines() {
        let mut dev = Atari850::new();
        with_port(|port| {
            port.command = true;
            dev.cold_reset(port);
        });
        let riot1 = dev.riot1().input_a();
        assert_eq!(riot1 & 0xC0, 0x80);
        assert_eq!(riot1 & 0x3F, 0x3F);
        assert_eq!(dev.riot2().input_a() & 0xC1, 0xC0);
        assert_eq!(dev.riot2().input_b() & 0x81, 0x81);
    }

    #[test]
    fn data_out_edges_follow_the_byte() {
        let mut dev = Atari850::new();
        with_port(|port| {
            dev.cold_reset(port);
            dev.on_begin_receive_byte(port, 0x0F, false, 93);
        });
        // The start bit lands at once; then the inverted bits of $0F
        // (0,0,0,0,1,1,1,1) and the inverted stop bit.
        assert_eq!(dev.riot2().input_a() & 1, 1);
        let levels: Vec<u8> = dev
            .board
            .signals
            .pending()
            .iter()
            .map(|r| r.change.lane(LANE_2A).0 & 1)
            .collect();
        assert_eq!(levels, vec![0, 0, 0, 0, 1, 1, 1, 1, 0]);

        let last = dev.board.signals.pending()[8].tick;
        let per_bit = f64::from(last) / 9.0;
        assert!((per_bit - 57.6).abs() < 0.2, "{per_bit}");
    }

    #[test]
    fn queued_data_in_edges_survive_save_and_load() {
        let mut dev = Atari850::new();
        with_port(|port| {
            dev.cold_reset(port);
            port.master.advance(1_000);
            port.add_transmit_bit(1_300, false);
            port.add_transmit_bit(1_400, true);

            let state = dev.save_state(port);
            let ticks: Vec<(u32, bool)> =
                state.transmit_bits.iter().map(|b| (b.tick, b.level)).collect();
            assert_eq!(ticks, vec![(300, false), (400, true)]);
            assert!(state.transmit_level);

            dev.cold_reset(port);
            assert!(port.transmit.is_empty());
            port.master.advance(50);
            dev.load_state(port, &state).expect("state loads");
            let restored: Vec<u32> = port.transmit.pending().map(|b| b.tick).collect();
            assert_eq!(restored, vec![1_350, 1_450]);
            assert!(port.transmit.last_level());
        });
    }

    #[test]
    fn repeated_transmit_levels_are_rejected() {
        let mut dev = Atari850::new();
        with_port(|port| {
            dev.cold_reset(port);
            port.add_transmit_bit(200, false);
            let mut state = dev.save_state(port);
            state.transmit_bits.push(TransmitBit {
                tick: 500,
                level: false,
            });
            assert_eq!(
                dev.load_state(port, &state).err(),
                Some(SnapshotError::Shape {
                    field: "transmit_bits"
                })
            );
            assert_eq!(port.transmit.next_tick(), Some(200));
        });
    }

    #[test]
    fn debugger_queries_reach_cpu_and_riots() {
        let mut dev = Atari850::new();
        let mut rom = vec![0xEA; ROM_SIZE];
        rom[0xFFC] = 0x00;
        rom[0xFFD] = 0x10;
        dev.load_firmware(Some(&rom));
        with_port(|port| dev.cold_reset(port));

        for path in dev.query_paths() {
            assert!(dev.query(path).is_some(), "{path}");
        }
        assert_eq!(dev.query("firmware"), Some(Value::Bool(true)));
        assert_eq!(dev.query("cpu.s"), dev.coproc().cpu().query("s"));
        assert_eq!(
            dev.query("riot2.pa"),
            Some(Value::U8(dev.riot2().input_a()))
        );
        assert_eq!(dev.query("riot1.irq"), Some(Value::Bool(false)));
        assert_eq!(dev.query("sio.data_in"), Some(Value::Bool(true)));
        assert_eq!(dev.query("cpu.bogus"), None);
        assert_eq!(dev.query("riot3.pa"), None);
    }
}
