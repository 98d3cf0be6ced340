//! 65C02 additions and changes.
//!
//! Only opcodes whose behaviour differs from the NMOS part are decoded
//! here. Every undocumented NMOS slot becomes a NOP of fixed length, the
//! `x7`/`xF` columns hold the Rockwell bit instructions.

use emu_core::Bus;

use crate::cpu::{Mode, Mos6502};
use crate::flags::Z;

impl Mos6502 {
    /// Execute one cycle of a 65C02-specific opcode. Returns `false` when
    /// the opcode behaves as on the NMOS part.
    pub(crate) fn execute_cmos<B: Bus>(&mut self, bus: &mut B) -> bool {
        let op = self.opcode;
        match op {
            0x04 => self.rmw_op(bus, Mode::Zp, Self::do_tsb, true),
            0x0C => self.rmw_op(bus, Mode::Abs, Self::do_tsb, true),
            0x14 => self.rmw_op(bus, Mode::Zp, Self::do_trb, true),
            0x1C => self.rmw_op(bus, Mode::Abs, Self::do_trb, true),

            0x1A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.a.wrapping_add(1);
                cpu.regs.p.update_nz(cpu.regs.a);
            }),
            0x3A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.a.wrapping_sub(1);
                cpu.regs.p.update_nz(cpu.regs.a);
            }),

            0x34 => self.read_op(bus, Mode::Zpx, Self::do_bit),
            0x3C => self.read_op(bus, Mode::Abx, Self::do_bit),
            0x89 => self.read_op(bus, Mode::Imm, Self::do_bit_imm),

            0x5A => self.op_push(bus, |cpu| cpu.regs.y),
            0xDA => self.op_push(bus, |cpu| cpu.regs.x),
            0x7A => self.op_pull(bus, |cpu, v| {
                cpu.regs.y = v;
                cpu.regs.p.update_nz(v);
            }),
            0xFA => self.op_pull(bus, |cpu, v| {
                cpu.regs.x = v;
                cpu.regs.p.update_nz(v);
            }),

            0x64 => self.write_op(bus, Mode::Zp, |_| 0),
            0x74 => self.write_op(bus, Mode::Zpx, |_| 0),
            0x9C => self.write_op(bus, Mode::Abs, |_| 0),
            0x9E => self.write_op(bus, Mode::Abx, |_| 0),

            0x6C => self.op_jmp_ind(bus),
            0x7C => self.op_jmp_abx_ind(bus),
            0x80 => self.op_branch(bus, true),

            // (zp) column of the accumulator group.
            0x12 => self.read_op(bus, Mode::Izp, Self::do_ora),
            0x32 => self.read_op(bus, Mode::Izp, Self::do_and),
            0x52 => self.read_op(bus, Mode::Izp, Self::do_eor),
            0x72 => self.read_op(bus, Mode::Izp, Self::do_adc),
            0x92 => self.write_op(bus, Mode::Izp, |cpu| cpu.regs.a),
            0xB2 => self.read_op(bus, Mode::Izp, Self::do_lda),
            0xD2 => self.read_op(bus, Mode::Izp, Self::do_cmp),
            0xF2 => self.read_op(bus, Mode::Izp, Self::do_sbc),

            0xCB => {
                let _ = bus.read(self.regs.pc);
                self.wait_for_interrupt();
            }
            0xDB => {
                let _ = bus.read(self.regs.pc);
                self.halt();
            }

            _ if op & 0x0F == 0x07 => self.op_rmb_smb(bus),
            _ if op & 0x0F == 0x0F => self.op_bbr_bbs(bus),

            // Unused slots: NOPs with fixed length and timing.
            0x02 | 0x22 | 0x42 | 0x62 | 0x82 | 0xC2 | 0xE2 => self.read_op(bus, Mode::Imm, Self::do_nop),
            0x44 => self.read_op(bus, Mode::Zp, Self::do_nop),
            0x54 | 0xD4 | 0xF4 => self.read_op(bus, Mode::Zpx, Self::do_nop),
            0xDC | 0xFC => self.read_op(bus, Mode::Abs, Self::do_nop),
            0x5C => self.op_nop_5c(bus),

            _ => return false,
        }
        true
    }

    fn do_tsb(&mut self, value: u8) -> u8 {
        self.regs.p.set_if(Z, self.regs.a & value == 0);
        value | self.regs.a
    }

    fn do_trb(&mut self, value: u8) -> u8 {
        self.regs.p.set_if(Z, self.regs.a & value == 0);
        value & !self.regs.a
    }

    /// BIT # only affects Z.
    fn do_bit_imm(&mut self, value: u8) {
        self.regs.p.set_if(Z, self.regs.a & value == 0);
    }

    /// Unused `x3`/`xB` slots finish in their opcode fetch cycle.
    pub(crate) const fn is_single_cycle_nop(op: u8) -> bool {
        op & 0x03 == 0x03 && op & 0x07 != 0x07 && op != 0xCB && op != 0xDB
    }

    /// $5C: three bytes, eight cycles.
    fn op_nop_5c<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.fetch(bus)) << 8;
                self.cycle = 3;
            }
            3..=6 => {
                let _ = bus.read(0xFF00 | (self.addr & 0x00FF));
                self.cycle += 1;
            }
            _ => {
                let _ = bus.read(0xFF00 | (self.addr & 0x00FF));
                self.finish();
            }
        }
    }

    /// JMP (abs,X): six cycles.
    fn op_jmp_abx_ind<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.fetch(bus)) << 8;
                self.cycle = 3;
            }
            3 => {
                let _ = bus.read(self.regs.pc.wrapping_sub(1));
                self.addr = self.addr.wrapping_add(u16::from(self.regs.x));
                self.cycle = 4;
            }
            4 => {
                self.data = bus.read(self.addr);
                self.cycle = 5;
            }
            _ => {
                let hi = bus.read(self.addr.wrapping_add(1));
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
        }
    }

    /// RMBn / SMBn zp: five cycles.
    fn op_rmb_smb<B: Bus>(&mut self, bus: &mut B) {
        let mask = 1u8 << ((self.opcode >> 4) & 7);
        let set = self.opcode & 0x80 != 0;
        if !self.address_cycle(bus, Mode::Zp, true) {
            return;
        }
        match self.stage {
            0 => {
                self.data = bus.read(self.addr);
                self.stage = 1;
            }
            1 => {
                let _ = bus.read(self.addr);
                self.data = if set { self.data | mask } else { self.data & !mask };
                self.stage = 2;
            }
            _ => {
                bus.write(self.addr, self.data);
                self.finish();
            }
        }
    }

    /// BBRn / BBSn zp,rel: five cycles, +1 taken, +1 across a page.
    fn op_bbr_bbs<B: Bus>(&mut self, bus: &mut B) {
        let mask = 1u8 << ((self.opcode >> 4) & 7);
        let want_set = self.opcode & 0x80 != 0;
        match self.cycle {
            1 => {
                self.addr = u16::from(self.fetch(bus));
                self.cycle = 2;
            }
            2 => {
                self.pointer = bus.read(self.addr);
                self.cycle = 3;
            }
            3 => {
                let _ = bus.read(self.addr);
                self.cycle = 4;
            }
            4 => {
                self.data = self.fetch(bus);
                if (self.pointer & mask != 0) == want_set {
                    self.cycle = 5;
                } else {
                    self.finish();
                }
            }
            _ => self.branch_tail(bus),
        }
    }
}
