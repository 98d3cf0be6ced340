//! 6502 / 65C02 CPU core.
//!
//! Each `tick()` performs exactly one bus access. Instructions are decoded
//! from the opcode's `aaabbbcc` bit fields: the `cc` column picks the
//! instruction group, `aaa` the operation and `bbb` the addressing mode.
//! Operand fetch for the regular groups runs through one shared addressing
//! driver; irregular instructions (stack, flow control) have their own
//! cycle sequences.

use emu_core::{Bus, Cpu, Observable, Value};

use crate::flags::{C, D, I, N, V, Z};
use crate::{Registers, Status};

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Marks the decimal-mode penalty cycle on the 65C02.
const EXTRA_CYCLE: u8 = 0xFF;

/// Which silicon is being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CpuVariant {
    /// NMOS 6502/6507 with the stable undocumented opcodes.
    #[default]
    Nmos,
    /// CMOS 65C02 with the Rockwell bit instructions and WDC WAI/STP.
    Cmos65C02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum State {
    FetchOpcode,
    Execute,
    /// WAI: idle until an interrupt line is active.
    Waiting,
    /// JAM/STP.
    Stopped,
}

/// Operand addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Imm,
    Zp,
    Zpx,
    Zpy,
    Abs,
    Abx,
    Aby,
    /// (zp,X)
    Izx,
    /// (zp),Y
    Izy,
    /// (zp), 65C02 only
    Izp,
}

impl Mode {
    /// Addressing mode of the `bbb` field for the `cc = 01` and `cc = 11`
    /// columns.
    pub(crate) const fn alu(bbb: u8) -> Self {
        match bbb {
            0 => Self::Izx,
            1 => Self::Zp,
            2 => Self::Imm,
            3 => Self::Abs,
            4 => Self::Izy,
            5 => Self::Zpx,
            6 => Self::Aby,
            _ => Self::Abx,
        }
    }
}

/// MOS 6502 family CPU.
///
/// The whole core, including the position inside the current instruction,
/// is plain data so that it can be cloned or serialized for snapshots.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mos6502 {
    pub regs: Registers,
    pub(crate) variant: CpuVariant,
    state: State,
    pub(crate) opcode: u8,
    /// Cycle within the current instruction (0 = opcode fetch).
    pub(crate) cycle: u8,
    /// Progress through the data phase once the address is resolved.
    pub(crate) stage: u8,
    pub(crate) addr: u16,
    pub(crate) data: u8,
    pub(crate) pointer: u8,
    /// High byte of the un-indexed base address.
    pub(crate) base_hi: u8,
    pub(crate) page_cross: bool,
    /// Set by decimal ADC/SBC on the 65C02 to add a cycle at the end.
    pub(crate) extra_cycle: bool,
    /// Vector to load for an interrupt or reset in progress.
    interrupt_vector: Option<u16>,
    /// Stack cycles of the reset sequence read instead of write.
    resetting: bool,
    nmi_pending: bool,
    irq_line: bool,
    total_cycles: u64,
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6502 {
    /// NMOS CPU ready to fetch at PC = 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_variant(CpuVariant::Nmos)
    }

    #[must_use]
    pub fn with_variant(variant: CpuVariant) -> Self {
        Self {
            regs: Registers::new(),
            variant,
            state: State::FetchOpcode,
            opcode: 0,
            cycle: 0,
            stage: 0,
            addr: 0,
            data: 0,
            pointer: 0,
            base_hi: 0,
            page_cross: false,
            extra_cycle: false,
            interrupt_vector: None,
            resetting: false,
            nmi_pending: false,
            irq_line: false,
            total_cycles: 0,
        }
    }

    #[must_use]
    pub fn variant(&self) -> CpuVariant {
        self.variant
    }

    pub fn set_variant(&mut self, variant: CpuVariant) {
        self.variant = variant;
    }

    /// True when the next tick fetches an opcode.
    #[must_use]
    pub fn is_instruction_complete(&self) -> bool {
        matches!(self.state, State::FetchOpcode)
    }

    /// Cycles executed since creation.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Opcode of the instruction being executed (or last executed).
    #[must_use]
    pub fn current_opcode(&self) -> u8 {
        self.opcode
    }

    pub(crate) fn is_cmos(&self) -> bool {
        self.variant == CpuVariant::Cmos65C02
    }

    fn execute_cycle<B: Bus>(&mut self, bus: &mut B) {
        self.total_cycles += 1;

        match self.state {
            State::FetchOpcode => {
                if self.nmi_pending {
                    self.nmi_pending = false;
                    self.begin_interrupt(bus, NMI_VECTOR);
                    return;
                }
                if self.irq_line && !self.regs.p.is_set(I) {
                    self.begin_interrupt(bus, IRQ_VECTOR);
                    return;
                }

                self.opcode = self.fetch(bus);
                self.cycle = 1;
                self.stage = 0;
                if !(self.is_cmos() && Self::is_single_cycle_nop(self.opcode)) {
                    self.state = State::Execute;
                }
            }
            State::Execute => self.execute_instruction(bus),
            State::Waiting => {
                let _ = bus.read(self.regs.pc);
                if self.irq_line || self.nmi_pending {
                    self.state = State::FetchOpcode;
                }
            }
            State::Stopped => {
                let _ = bus.read(self.regs.pc);
            }
        }
    }

    /// Start the seven-cycle interrupt sequence. This cycle is the first of
    /// the two dummy reads.
    fn begin_interrupt<B: Bus>(&mut self, bus: &mut B, vector: u16) {
        let _ = bus.read(self.regs.pc);
        self.opcode = 0x00;
        self.cycle = 1;
        self.stage = 0;
        self.interrupt_vector = Some(vector);
        self.state = State::Execute;
    }

    /// Read the byte at PC and step past it.
    pub(crate) fn fetch<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    /// Return to opcode fetch, unless the 65C02 decimal penalty is owed.
    pub(crate) fn finish(&mut self) {
        if self.extra_cycle {
            self.extra_cycle = false;
            self.cycle = EXTRA_CYCLE;
            return;
        }
        self.state = State::FetchOpcode;
        self.cycle = 0;
    }

    pub(crate) fn halt(&mut self) {
        self.state = State::Stopped;
    }

    pub(crate) fn wait_for_interrupt(&mut self) {
        self.state = State::Waiting;
    }

    fn execute_instruction<B: Bus>(&mut self, bus: &mut B) {
        if self.cycle == EXTRA_CYCLE {
            let _ = bus.read(self.regs.pc);
            self.finish();
            return;
        }

        if self.is_cmos() && self.execute_cmos(bus) {
            return;
        }

        match self.opcode & 0x03 {
            0x00 => self.execute_control(bus),
            0x01 => self.execute_alu(bus),
            0x02 => self.execute_rmw(bus),
            _ => self.execute_undocumented(bus),
        }
    }

    /// `cc = 00`: flow control, stack, flags, index register loads/stores.
    fn execute_control<B: Bus>(&mut self, bus: &mut B) {
        match self.opcode {
            0x00 => self.op_brk(bus),
            0x20 => self.op_jsr(bus),
            0x40 => self.op_rti(bus),
            0x60 => self.op_rts(bus),
            0x4C => self.op_jmp_abs(bus),
            0x6C => self.op_jmp_ind(bus),

            0x08 => self.op_push(bus, |cpu| cpu.regs.p.to_byte_brk()),
            0x48 => self.op_push(bus, |cpu| cpu.regs.a),
            0x28 => self.op_pull(bus, |cpu, v| cpu.regs.p = Status::from_byte(v)),
            0x68 => self.op_pull(bus, |cpu, v| {
                cpu.regs.a = v;
                cpu.regs.p.update_nz(v);
            }),

            0x10 => self.op_branch(bus, !self.regs.p.is_set(N)),
            0x30 => self.op_branch(bus, self.regs.p.is_set(N)),
            0x50 => self.op_branch(bus, !self.regs.p.is_set(V)),
            0x70 => self.op_branch(bus, self.regs.p.is_set(V)),
            0x90 => self.op_branch(bus, !self.regs.p.is_set(C)),
            0xB0 => self.op_branch(bus, self.regs.p.is_set(C)),
            0xD0 => self.op_branch(bus, !self.regs.p.is_set(Z)),
            0xF0 => self.op_branch(bus, self.regs.p.is_set(Z)),

            0x18 => self.op_implied(bus, |cpu| cpu.regs.p.clear(C)),
            0x38 => self.op_implied(bus, |cpu| cpu.regs.p.set(C)),
            0x58 => self.op_implied(bus, |cpu| cpu.regs.p.clear(I)),
            0x78 => self.op_implied(bus, |cpu| cpu.regs.p.set(I)),
            0xB8 => self.op_implied(bus, |cpu| cpu.regs.p.clear(V)),
            0xD8 => self.op_implied(bus, |cpu| cpu.regs.p.clear(D)),
            0xF8 => self.op_implied(bus, |cpu| cpu.regs.p.set(D)),
            0x88 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_sub(1);
                cpu.regs.p.update_nz(cpu.regs.y);
            }),
            0xC8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_add(1);
                cpu.regs.p.update_nz(cpu.regs.y);
            }),
            0xE8 => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_add(1);
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            0x98 => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.y;
                cpu.regs.p.update_nz(cpu.regs.a);
            }),
            0xA8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.a;
                cpu.regs.p.update_nz(cpu.regs.y);
            }),

            0x24 => self.read_op(bus, Mode::Zp, Self::do_bit),
            0x2C => self.read_op(bus, Mode::Abs, Self::do_bit),
            0x84 => self.write_op(bus, Mode::Zp, |cpu| cpu.regs.y),
            0x8C => self.write_op(bus, Mode::Abs, |cpu| cpu.regs.y),
            0x94 => self.write_op(bus, Mode::Zpx, |cpu| cpu.regs.y),
            0x9C => self.write_op(bus, Mode::Abx, Self::value_shy),
            0xA0 => self.read_op(bus, Mode::Imm, Self::do_ldy),
            0xA4 => self.read_op(bus, Mode::Zp, Self::do_ldy),
            0xAC => self.read_op(bus, Mode::Abs, Self::do_ldy),
            0xB4 => self.read_op(bus, Mode::Zpx, Self::do_ldy),
            0xBC => self.read_op(bus, Mode::Abx, Self::do_ldy),
            0xC0 => self.read_op(bus, Mode::Imm, Self::do_cpy),
            0xC4 => self.read_op(bus, Mode::Zp, Self::do_cpy),
            0xCC => self.read_op(bus, Mode::Abs, Self::do_cpy),
            0xE0 => self.read_op(bus, Mode::Imm, Self::do_cpx),
            0xE4 => self.read_op(bus, Mode::Zp, Self::do_cpx),
            0xEC => self.read_op(bus, Mode::Abs, Self::do_cpx),

            // Undocumented NOPs that still perform their operand reads.
            0x80 => self.read_op(bus, Mode::Imm, Self::do_nop),
            0x04 | 0x44 | 0x64 => self.read_op(bus, Mode::Zp, Self::do_nop),
            0x0C => self.read_op(bus, Mode::Abs, Self::do_nop),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => self.read_op(bus, Mode::Zpx, Self::do_nop),
            _ => self.read_op(bus, Mode::Abx, Self::do_nop),
        }
    }

    /// `cc = 01`: the eight accumulator operations.
    fn execute_alu<B: Bus>(&mut self, bus: &mut B) {
        let mode = Mode::alu((self.opcode >> 2) & 7);
        match self.opcode >> 5 {
            0 => self.read_op(bus, mode, Self::do_ora),
            1 => self.read_op(bus, mode, Self::do_and),
            2 => self.read_op(bus, mode, Self::do_eor),
            3 => self.read_op(bus, mode, Self::do_adc),
            4 if mode == Mode::Imm => self.read_op(bus, mode, Self::do_nop),
            4 => self.write_op(bus, mode, |cpu| cpu.regs.a),
            5 => self.read_op(bus, mode, Self::do_lda),
            6 => self.read_op(bus, mode, Self::do_cmp),
            _ => self.read_op(bus, mode, Self::do_sbc),
        }
    }

    /// `cc = 10`: shifts, increments and the X register.
    fn execute_rmw<B: Bus>(&mut self, bus: &mut B) {
        let aaa = self.opcode >> 5;
        let bbb = (self.opcode >> 2) & 7;
        let shift: fn(&mut Self, u8) -> u8 = match aaa {
            0 => Self::do_asl,
            1 => Self::do_rol,
            2 => Self::do_lsr,
            3 => Self::do_ror,
            6 => Self::do_dec,
            _ => Self::do_inc,
        };

        match (aaa, bbb) {
            (5, 0) => self.read_op(bus, Mode::Imm, Self::do_ldx),
            (4 | 6 | 7, 0) => self.read_op(bus, Mode::Imm, Self::do_nop),
            (_, 0 | 4) => {
                let _ = bus.read(self.regs.pc);
                self.halt();
            }

            (4, 1) => self.write_op(bus, Mode::Zp, |cpu| cpu.regs.x),
            (4, 3) => self.write_op(bus, Mode::Abs, |cpu| cpu.regs.x),
            (4, 5) => self.write_op(bus, Mode::Zpy, |cpu| cpu.regs.x),
            (4, 7) => self.write_op(bus, Mode::Aby, Self::value_shx),
            (5, 1) => self.read_op(bus, Mode::Zp, Self::do_ldx),
            (5, 3) => self.read_op(bus, Mode::Abs, Self::do_ldx),
            (5, 5) => self.read_op(bus, Mode::Zpy, Self::do_ldx),
            (5, 7) => self.read_op(bus, Mode::Aby, Self::do_ldx),

            (0..=3, 2) => self.op_implied(bus, move |cpu| {
                let a = cpu.regs.a;
                cpu.regs.a = shift(cpu, a);
            }),
            (4, 2) => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.x;
                cpu.regs.p.update_nz(cpu.regs.a);
            }),
            (5, 2) => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.a;
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            (6, 2) => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_sub(1);
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            (_, 2) => self.op_implied(bus, |_| {}),

            (4, 6) => self.op_implied(bus, |cpu| cpu.regs.s = cpu.regs.x),
            (5, 6) => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.s;
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            (_, 6) => self.op_implied(bus, |_| {}),

            (_, 1) => self.rmw_op(bus, Mode::Zp, shift, true),
            (_, 3) => self.rmw_op(bus, Mode::Abs, shift, true),
            (_, 5) => self.rmw_op(bus, Mode::Zpx, shift, true),
            // The 65C02 skips the fix-up cycle for shifts that stay in page.
            _ => self.rmw_op(bus, Mode::Abx, shift, !(self.is_cmos() && aaa < 4)),
        }
    }

    // ========================================================================
    // Addressing driver
    // ========================================================================

    /// Run one cycle of effective address calculation.
    ///
    /// Returns `true`, without touching the bus, once the address is in
    /// `self.addr`; the caller then does its data access in the same cycle.
    /// Indexed modes only spend the fix-up cycle on a page crossing unless
    /// `fix_always` is set, as it is for writes and read-modify-writes.
    pub(crate) fn address_cycle<B: Bus>(&mut self, bus: &mut B, mode: Mode, fix_always: bool) -> bool {
        match (mode, self.cycle) {
            (Mode::Imm, _) => true,

            (Mode::Zp, 1) => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
                false
            }
            (Mode::Zpx | Mode::Zpy, 1) | (Mode::Izx | Mode::Izy | Mode::Izp, 1) => {
                self.pointer = self.fetch(bus);
                self.cycle = 2;
                false
            }
            (Mode::Zpx | Mode::Zpy, 2) => {
                let _ = bus.read(u16::from(self.pointer));
                let index = if mode == Mode::Zpx { self.regs.x } else { self.regs.y };
                self.addr = u16::from(self.pointer.wrapping_add(index));
                self.cycle = 3;
                false
            }

            (Mode::Abs | Mode::Abx | Mode::Aby, 1) => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
                false
            }
            (Mode::Abs, 2) => {
                self.addr |= u16::from(self.fetch(bus)) << 8;
                self.cycle = 3;
                false
            }
            (Mode::Abx | Mode::Aby, 2) => {
                self.base_hi = self.fetch(bus);
                let index = if mode == Mode::Abx { self.regs.x } else { self.regs.y };
                self.index_low(index);
                self.cycle = 3;
                false
            }
            (Mode::Abx | Mode::Aby, 3) if self.page_cross || fix_always => {
                self.fix_up_cycle(bus);
                self.cycle = 4;
                false
            }

            (Mode::Izx, 2) => {
                let _ = bus.read(u16::from(self.pointer));
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
                false
            }
            (Mode::Izx, 3) | (Mode::Izy | Mode::Izp, 2) => {
                self.addr = u16::from(bus.read(u16::from(self.pointer)));
                self.cycle += 1;
                false
            }
            (Mode::Izx, 4) | (Mode::Izp, 3) => {
                self.addr |= u16::from(bus.read(u16::from(self.pointer.wrapping_add(1)))) << 8;
                self.cycle += 1;
                false
            }
            (Mode::Izy, 3) => {
                self.base_hi = bus.read(u16::from(self.pointer.wrapping_add(1)));
                self.index_low(self.regs.y);
                self.cycle = 4;
                false
            }
            (Mode::Izy, 4) if self.page_cross || fix_always => {
                self.fix_up_cycle(bus);
                self.cycle = 5;
                false
            }

            _ => true,
        }
    }

    /// Add an index to the low byte of `addr` (high byte from `base_hi`),
    /// noting whether the high byte still needs a carry.
    fn index_low(&mut self, index: u8) {
        let (lo, carry) = (self.addr as u8).overflowing_add(index);
        self.addr = u16::from(lo) | (u16::from(self.base_hi) << 8);
        self.page_cross = carry;
    }

    /// The extra indexed cycle: NMOS reads the un-carried address, the
    /// 65C02 re-reads the last operand byte instead.
    fn fix_up_cycle<B: Bus>(&mut self, bus: &mut B) {
        if self.is_cmos() && self.page_cross {
            let _ = bus.read(self.regs.pc.wrapping_sub(1));
        } else {
            let _ = bus.read(self.addr);
        }
        if self.page_cross {
            self.addr = self.addr.wrapping_add(0x100);
        }
    }

    pub(crate) fn read_op<B: Bus>(&mut self, bus: &mut B, mode: Mode, op: fn(&mut Self, u8)) {
        if mode == Mode::Imm {
            let value = self.fetch(bus);
            op(self, value);
            self.finish();
        } else if self.address_cycle(bus, mode, false) {
            let value = bus.read(self.addr);
            op(self, value);
            self.finish();
        }
    }

    pub(crate) fn write_op<B: Bus>(&mut self, bus: &mut B, mode: Mode, value: fn(&Self) -> u8) {
        if self.address_cycle(bus, mode, true) {
            bus.write(self.addr, value(self));
            self.finish();
        }
    }

    /// Read, modify, write back. NMOS writes the unmodified value during
    /// the modify cycle; the 65C02 reads it again instead.
    pub(crate) fn rmw_op<B: Bus>(
        &mut self,
        bus: &mut B,
        mode: Mode,
        op: fn(&mut Self, u8) -> u8,
        fix_always: bool,
    ) {
        if !self.address_cycle(bus, mode, fix_always) {
            return;
        }
        match self.stage {
            0 => {
                self.data = bus.read(self.addr);
                self.stage = 1;
            }
            1 => {
                if self.is_cmos() {
                    let _ = bus.read(self.addr);
                } else {
                    bus.write(self.addr, self.data);
                }
                self.data = op(self, self.data);
                self.stage = 2;
            }
            _ => {
                bus.write(self.addr, self.data);
                self.finish();
            }
        }
    }

    // ========================================================================
    // ALU
    // ========================================================================

    pub(crate) fn do_nop(&mut self, _value: u8) {}

    pub(crate) fn do_lda(&mut self, value: u8) {
        self.regs.a = value;
        self.regs.p.update_nz(value);
    }

    pub(crate) fn do_ldx(&mut self, value: u8) {
        self.regs.x = value;
        self.regs.p.update_nz(value);
    }

    fn do_ldy(&mut self, value: u8) {
        self.regs.y = value;
        self.regs.p.update_nz(value);
    }

    pub(crate) fn do_ora(&mut self, value: u8) {
        self.regs.a |= value;
        self.regs.p.update_nz(self.regs.a);
    }

    pub(crate) fn do_and(&mut self, value: u8) {
        self.regs.a &= value;
        self.regs.p.update_nz(self.regs.a);
    }

    pub(crate) fn do_eor(&mut self, value: u8) {
        self.regs.a ^= value;
        self.regs.p.update_nz(self.regs.a);
    }

    pub(crate) fn do_adc(&mut self, value: u8) {
        if !self.regs.p.is_set(D) {
            self.adc_binary(value);
            return;
        }

        let a = self.regs.a;
        let carry_in = u8::from(self.regs.p.is_set(C));

        let mut lo = (a & 0x0F) + (value & 0x0F) + carry_in;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (value >> 4) + u8::from(lo > 0x0F);

        // NMOS: Z from the binary sum, N and V from the intermediate high nibble.
        let binary = a.wrapping_add(value).wrapping_add(carry_in);
        self.regs.p.set_if(Z, binary == 0);
        self.regs.p.set_if(N, hi & 0x08 != 0);
        let intermediate = (hi << 4) | (lo & 0x0F);
        self.regs
            .p
            .set_if(V, (a ^ intermediate) & (value ^ intermediate) & 0x80 != 0);

        if hi > 9 {
            hi += 6;
        }
        self.regs.p.set_if(C, hi > 0x0F);
        self.regs.a = (hi << 4) | (lo & 0x0F);

        if self.is_cmos() {
            self.regs.p.update_nz(self.regs.a);
            self.extra_cycle = true;
        }
    }

    fn adc_binary(&mut self, value: u8) {
        let a = self.regs.a;
        let sum = u16::from(a) + u16::from(value) + u16::from(self.regs.p.is_set(C));
        let result = sum as u8;
        self.regs.p.set_if(C, sum > 0xFF);
        self.regs
            .p
            .set_if(V, (a ^ result) & (value ^ result) & 0x80 != 0);
        self.regs.a = result;
        self.regs.p.update_nz(result);
    }

    pub(crate) fn do_sbc(&mut self, value: u8) {
        if !self.regs.p.is_set(D) {
            self.adc_binary(!value);
            return;
        }

        let a = self.regs.a;
        let borrow = i16::from(!self.regs.p.is_set(C));

        // Flags follow the binary subtraction on NMOS.
        let binary = i16::from(a) - i16::from(value) - borrow;
        self.regs.p.set_if(C, binary >= 0);
        self.regs.p.set_if(Z, binary as u8 == 0);
        self.regs.p.set_if(N, binary & 0x80 != 0);
        self.regs.p.set_if(
            V,
            (i16::from(a) ^ binary) & (i16::from(a) ^ i16::from(value)) & 0x80 != 0,
        );

        let mut lo = i16::from(a & 0x0F) - i16::from(value & 0x0F) - borrow;
        let mut hi = i16::from(a >> 4) - i16::from(value >> 4);
        if lo < 0 {
            lo -= 6;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 6;
        }
        self.regs.a = ((hi << 4) as u8) | ((lo & 0x0F) as u8);

        if self.is_cmos() {
            self.regs.p.update_nz(self.regs.a);
            self.extra_cycle = true;
        }
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.regs.p.set_if(C, register >= value);
        self.regs.p.update_nz(register.wrapping_sub(value));
    }

    pub(crate) fn do_cmp(&mut self, value: u8) {
        self.compare(self.regs.a, value);
    }

    pub(crate) fn do_cpx(&mut self, value: u8) {
        self.compare(self.regs.x, value);
    }

    fn do_cpy(&mut self, value: u8) {
        self.compare(self.regs.y, value);
    }

    pub(crate) fn do_bit(&mut self, value: u8) {
        self.regs.p.set_if(Z, self.regs.a & value == 0);
        self.regs.p.set_if(N, value & 0x80 != 0);
        self.regs.p.set_if(V, value & 0x40 != 0);
    }

    pub(crate) fn do_asl(&mut self, value: u8) -> u8 {
        self.regs.p.set_if(C, value & 0x80 != 0);
        let result = value << 1;
        self.regs.p.update_nz(result);
        result
    }

    pub(crate) fn do_lsr(&mut self, value: u8) -> u8 {
        self.regs.p.set_if(C, value & 0x01 != 0);
        let result = value >> 1;
        self.regs.p.update_nz(result);
        result
    }

    pub(crate) fn do_rol(&mut self, value: u8) -> u8 {
        let result = (value << 1) | u8::from(self.regs.p.is_set(C));
        self.regs.p.set_if(C, value & 0x80 != 0);
        self.regs.p.update_nz(result);
        result
    }

    pub(crate) fn do_ror(&mut self, value: u8) -> u8 {
        let result = (value >> 1) | if self.regs.p.is_set(C) { 0x80 } else { 0 };
        self.regs.p.set_if(C, value & 0x01 != 0);
        self.regs.p.update_nz(result);
        result
    }

    pub(crate) fn do_inc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.regs.p.update_nz(result);
        result
    }

    pub(crate) fn do_dec(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.regs.p.update_nz(result);
        result
    }

    /// SHY abs,X: Y AND (high byte of base + 1).
    fn value_shy(&self) -> u8 {
        self.regs.y & self.base_hi.wrapping_add(1)
    }

    /// SHX abs,Y: X AND (high byte of base + 1).
    fn value_shx(&self) -> u8 {
        self.regs.x & self.base_hi.wrapping_add(1)
    }

    // ========================================================================
    // Irregular instructions
    // ========================================================================

    /// BRK, and the shared IRQ/NMI/reset sequence when a vector is pending.
    fn op_brk<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            0 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 1;
            }
            1 => {
                let _ = bus.read(self.regs.pc);
                if self.interrupt_vector.is_none() {
                    // Signature byte.
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                }
                self.cycle = 2;
            }
            2 | 3 | 4 => {
                let addr = self.regs.push();
                if self.resetting {
                    let _ = bus.read(addr);
                } else {
                    let value = match self.cycle {
                        2 => (self.regs.pc >> 8) as u8,
                        3 => self.regs.pc as u8,
                        _ if self.interrupt_vector.is_some() => self.regs.p.to_byte_irq(),
                        _ => self.regs.p.to_byte_brk(),
                    };
                    bus.write(addr, value);
                }
                if self.cycle == 4 && self.interrupt_vector != Some(RESET_VECTOR) && self.nmi_pending {
                    // An NMI arriving during the pushes takes over the vector fetch.
                    self.nmi_pending = false;
                    self.interrupt_vector = Some(NMI_VECTOR);
                }
                self.cycle += 1;
            }
            5 => {
                let vector = self.interrupt_vector.unwrap_or(IRQ_VECTOR);
                self.data = bus.read(vector);
                self.regs.p.set(I);
                if self.is_cmos() {
                    self.regs.p.clear(D);
                }
                self.cycle = 6;
            }
            _ => {
                let vector = self.interrupt_vector.take().unwrap_or(IRQ_VECTOR);
                let hi = bus.read(vector.wrapping_add(1));
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.resetting = false;
                self.finish();
            }
        }
    }

    fn op_rti<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                self.regs.p = Status::from_byte(bus.read(addr));
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.pop();
                self.addr = u16::from(bus.read(addr));
                self.cycle = 5;
            }
            _ => {
                let addr = self.regs.pop();
                self.addr |= u16::from(bus.read(addr)) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
        }
    }

    fn op_rts<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                self.addr = u16::from(bus.read(addr));
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.pop();
                self.addr |= u16::from(bus.read(addr)) << 8;
                self.cycle = 5;
            }
            _ => {
                let _ = bus.read(self.addr);
                self.regs.pc = self.addr.wrapping_add(1);
                self.finish();
            }
        }
    }

    fn op_jsr<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 5;
            }
            _ => {
                self.addr |= u16::from(bus.read(self.regs.pc)) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
        }
    }

    fn op_jmp_abs<B: Bus>(&mut self, bus: &mut B) {
        if self.cycle == 1 {
            self.addr = u16::from(self.fetch(bus));
            self.cycle = 2;
        } else {
            self.addr |= u16::from(bus.read(self.regs.pc)) << 8;
            self.regs.pc = self.addr;
            self.finish();
        }
    }

    /// JMP (ind). NMOS wraps the pointer within its page; the 65C02 fixes
    /// that at the cost of one more cycle.
    pub(crate) fn op_jmp_ind<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.fetch(bus)) << 8;
                self.cycle = if self.is_cmos() { 3 } else { 4 };
            }
            3 => {
                let _ = bus.read(self.regs.pc.wrapping_sub(1));
                self.cycle = 4;
            }
            4 => {
                self.data = bus.read(self.addr);
                self.cycle = 5;
            }
            _ => {
                let hi_addr = if self.is_cmos() {
                    self.addr.wrapping_add(1)
                } else {
                    (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0x00FF)
                };
                let hi = bus.read(hi_addr);
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
        }
    }

    /// Relative branch: 2 cycles, +1 taken, +1 more across a page.
    pub(crate) fn op_branch<B: Bus>(&mut self, bus: &mut B, taken: bool) {
        match self.cycle {
            1 => {
                self.data = self.fetch(bus);
                if taken {
                    self.cycle = 2;
                } else {
                    self.finish();
                }
            }
            _ => self.branch_tail(bus),
        }
    }

    /// Cycles after the offset fetch of a taken branch. Reused by BBR/BBS.
    pub(crate) fn branch_tail<B: Bus>(&mut self, bus: &mut B) {
        if self.stage == 0 {
            let _ = bus.read(self.regs.pc);
            let target = self.regs.pc.wrapping_add(self.data as i8 as u16);
            if (target ^ self.regs.pc) & 0xFF00 == 0 {
                self.regs.pc = target;
                self.finish();
            } else {
                self.addr = target;
                self.stage = 1;
            }
        } else {
            let _ = bus.read((self.regs.pc & 0xFF00) | (self.addr & 0x00FF));
            self.regs.pc = self.addr;
            self.finish();
        }
    }

    pub(crate) fn op_push<B: Bus>(&mut self, bus: &mut B, value: fn(&Self) -> u8) {
        if self.cycle == 1 {
            let _ = bus.read(self.regs.pc);
            self.cycle = 2;
        } else {
            let addr = self.regs.push();
            bus.write(addr, value(self));
            self.finish();
        }
    }

    pub(crate) fn op_pull<B: Bus>(&mut self, bus: &mut B, apply: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            _ => {
                let addr = self.regs.pop();
                let value = bus.read(addr);
                apply(self, value);
                self.finish();
            }
        }
    }

    /// Single-byte, two-cycle instruction.
    pub(crate) fn op_implied<B: Bus, F: FnOnce(&mut Self)>(&mut self, bus: &mut B, f: F) {
        let _ = bus.read(self.regs.pc);
        f(self);
        self.finish();
    }
}

impl Cpu for Mos6502 {
    type Registers = Registers;

    fn tick<B: Bus>(&mut self, bus: &mut B) {
        self.execute_cycle(bus);
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn is_instruction_boundary(&self) -> bool {
        self.is_instruction_complete()
    }

    fn registers(&self) -> Self::Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.state == State::Stopped
    }

    fn set_irq(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Start the reset sequence. The next seven ticks perform three
    /// read-only stack cycles and load PC from $FFFC.
    fn reset(&mut self) {
        self.regs.s = 0x00;
        self.regs.p.set(I);
        if self.is_cmos() {
            self.regs.p.clear(D);
        }
        self.opcode = 0x00;
        self.cycle = 0;
        self.stage = 0;
        self.extra_cycle = false;
        self.interrupt_vector = Some(RESET_VECTOR);
        self.resetting = true;
        self.nmi_pending = false;
        self.state = State::Execute;
    }
}

impl Observable for Mos6502 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "pc" => Some(self.regs.pc.into()),
            "a" => Some(self.regs.a.into()),
            "x" => Some(self.regs.x.into()),
            "y" => Some(self.regs.y.into()),
            "s" | "sp" => Some(self.regs.s.into()),
            "p" | "status" => Some(self.regs.p.0.into()),
            "flags.c" => Some(self.regs.p.is_set(C).into()),
            "flags.z" => Some(self.regs.p.is_set(Z).into()),
            "flags.i" => Some(self.regs.p.is_set(I).into()),
            "flags.d" => Some(self.regs.p.is_set(D).into()),
            "flags.v" => Some(self.regs.p.is_set(V).into()),
            "flags.n" => Some(self.regs.p.is_set(N).into()),
            "cycle" => Some(Value::U64(self.total_cycles)),
            "halted" => Some(self.is_halted().into()),
            "irq" => Some(self.irq_line.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "pc", "a", "x", "y", "s", "p", "flags.c", "flags.z", "flags.i", "flags.d", "flags.v",
            "flags.n", "cycle", "halted", "irq",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::SimpleBus;

    fn run(cpu: &mut Mos6502, bus: &mut SimpleBus, ticks: usize) {
        for _ in 0..ticks {
            cpu.tick(bus);
        }
    }

    #[test]
    fn lda_immediate_takes_two_cycles() {
        let mut cpu = Mos6502::new();
        let mut bus = SimpleBus::new();
        bus.load(0x0000, &[0xA9, 0x42]);

        run(&mut cpu, &mut bus, 2);

        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.regs.pc, 0x0002);
        assert!(cpu.is_instruction_complete());
    }

    #[test]
    fn reset_loads_vector_after_seven_cycles() {
        let mut cpu = Mos6502::new();
        let mut bus = SimpleBus::new();
        bus.load(0xFFFC, &[0x00, 0x10]);

        cpu.reset();
        run(&mut cpu, &mut bus, 6);
        assert!(!cpu.is_instruction_complete());
        run(&mut cpu, &mut bus, 1);

        assert_eq!(cpu.regs.pc, 0x1000);
        assert_eq!(cpu.regs.s, 0xFD);
        // Stack cycles of reset are reads.
        assert_eq!(bus.peek(0x0100), 0);
    }

    #[test]
    fn irq_pushes_status_without_break() {
        let mut cpu = Mos6502::new();
        let mut bus = SimpleBus::new();
        bus.load(0xFFFE, &[0x00, 0x30]);
        bus.load(0x0200, &[0xEA]);
        cpu.regs.pc = 0x0200;
        cpu.regs.s = 0xFF;
        cpu.regs.p = Status::from_byte(0);

        cpu.set_irq(true);
        run(&mut cpu, &mut bus, 7);

        assert_eq!(cpu.regs.pc, 0x3000);
        assert_eq!(bus.peek(0x01FF), 0x02);
        assert_eq!(bus.peek(0x01FE), 0x00);
        assert_eq!(bus.peek(0x01FD) & 0x30, 0x20);
        assert!(cpu.regs.p.is_set(I));
    }

    #[test]
    fn jam_halts() {
        let mut cpu = Mos6502::new();
        let mut bus = SimpleBus::new();
        bus.load(0x0000, &[0x02]);
        run(&mut cpu, &mut bus, 4);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc, 0x0001);
    }

    #[test]
    fn observable_paths_resolve() {
        let cpu = Mos6502::new();
        for path in cpu.query_paths() {
            assert!(cpu.query(path).is_some(), "{path}");
        }
        assert_eq!(cpu.query("s"), Some(Value::U8(0xFD)));
    }
}
