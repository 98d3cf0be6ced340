//! NMOS `cc = 11` column: the undocumented combined operations.
//!
//! Read-modify-write combinations take the same cycle counts as the
//! documented RMW instructions, including the fix-up cycle on every
//! indexed form.

use emu_core::Bus;

use crate::cpu::{Mode, Mos6502};
use crate::flags::{C, D, V};

/// Constant ORed into A by the unstable XAA/LXA pair.
const MAGIC: u8 = 0xEE;

impl Mos6502 {
    pub(crate) fn execute_undocumented<B: Bus>(&mut self, bus: &mut B) {
        let aaa = self.opcode >> 5;
        let bbb = (self.opcode >> 2) & 7;

        if bbb == 2 {
            let op: fn(&mut Self, u8) = match aaa {
                0 | 1 => Self::do_anc,
                2 => Self::do_alr,
                3 => Self::do_arr,
                4 => Self::do_xaa,
                5 => Self::do_lxa,
                6 => Self::do_sbx,
                _ => Self::do_sbc,
            };
            self.read_op(bus, Mode::Imm, op);
            return;
        }

        match (aaa, bbb) {
            (4, 4) | (4, 7) => {
                let mode = if bbb == 4 { Mode::Izy } else { Mode::Aby };
                self.write_op(bus, mode, Self::value_sha);
            }
            (4, 6) => self.op_tas(bus),
            (4, _) => {
                let mode = if bbb == 5 { Mode::Zpy } else { Mode::alu(bbb) };
                self.write_op(bus, mode, |cpu| cpu.regs.a & cpu.regs.x);
            }
            (5, 6) => self.read_op(bus, Mode::Aby, Self::do_las),
            (5, _) => {
                let mode = match bbb {
                    5 => Mode::Zpy,
                    7 => Mode::Aby,
                    _ => Mode::alu(bbb),
                };
                self.read_op(bus, mode, Self::do_lax);
            }
            _ => {
                let op: fn(&mut Self, u8) -> u8 = match aaa {
                    0 => Self::do_slo,
                    1 => Self::do_rla,
                    2 => Self::do_sre,
                    3 => Self::do_rra,
                    6 => Self::do_dcp,
                    _ => Self::do_isc,
                };
                self.rmw_op(bus, Mode::alu(bbb), op, true);
            }
        }
    }

    fn do_slo(&mut self, value: u8) -> u8 {
        let result = self.do_asl(value);
        self.do_ora(result);
        result
    }

    fn do_rla(&mut self, value: u8) -> u8 {
        let result = self.do_rol(value);
        self.do_and(result);
        result
    }

    fn do_sre(&mut self, value: u8) -> u8 {
        let result = self.do_lsr(value);
        self.do_eor(result);
        result
    }

    fn do_rra(&mut self, value: u8) -> u8 {
        let result = self.do_ror(value);
        self.do_adc(result);
        result
    }

    fn do_dcp(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.do_cmp(result);
        result
    }

    fn do_isc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.do_sbc(result);
        result
    }

    fn do_lax(&mut self, value: u8) {
        self.do_lda(value);
        self.regs.x = value;
    }

    fn do_las(&mut self, value: u8) {
        let result = value & self.regs.s;
        self.regs.s = result;
        self.regs.x = result;
        self.do_lda(result);
    }

    fn do_anc(&mut self, value: u8) {
        self.do_and(value);
        self.regs.p.set_if(C, self.regs.a & 0x80 != 0);
    }

    fn do_alr(&mut self, value: u8) {
        let masked = self.regs.a & value;
        self.regs.a = self.do_lsr(masked);
    }

    fn do_arr(&mut self, value: u8) {
        let masked = self.regs.a & value;
        let carry_in = if self.regs.p.is_set(C) { 0x80 } else { 0 };
        let result = (masked >> 1) | carry_in;
        self.regs.p.update_nz(result);

        if self.regs.p.is_set(D) {
            self.regs.p.set_if(V, (result ^ masked) & 0x40 != 0);
            let mut fixed = result;
            if (masked & 0x0F) + (masked & 0x01) > 5 {
                fixed = (fixed & 0xF0) | (fixed.wrapping_add(6) & 0x0F);
            }
            let high_adjust = u16::from(masked & 0xF0) + u16::from(masked & 0x10) > 0x50;
            self.regs.p.set_if(C, high_adjust);
            if high_adjust {
                fixed = fixed.wrapping_add(0x60);
            }
            self.regs.a = fixed;
        } else {
            self.regs.p.set_if(C, result & 0x40 != 0);
            self.regs.p.set_if(V, ((result >> 6) ^ (result >> 5)) & 1 != 0);
            self.regs.a = result;
        }
    }

    fn do_xaa(&mut self, value: u8) {
        let result = (self.regs.a | MAGIC) & self.regs.x & value;
        self.do_lda(result);
    }

    fn do_lxa(&mut self, value: u8) {
        let result = (self.regs.a | MAGIC) & value;
        self.do_lax(result);
    }

    fn do_sbx(&mut self, value: u8) {
        let ax = self.regs.a & self.regs.x;
        self.regs.p.set_if(C, ax >= value);
        self.regs.x = ax.wrapping_sub(value);
        self.regs.p.update_nz(self.regs.x);
    }

    /// SHA: A AND X AND (high byte of base + 1).
    fn value_sha(&self) -> u8 {
        self.regs.a & self.regs.x & self.base_hi.wrapping_add(1)
    }

    /// TAS abs,Y: S = A AND X, then store S AND (high byte of base + 1).
    fn op_tas<B: Bus>(&mut self, bus: &mut B) {
        if self.address_cycle(bus, Mode::Aby, true) {
            self.regs.s = self.regs.a & self.regs.x;
            bus.write(self.addr, self.regs.s & self.base_hi.wrapping_add(1));
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Mos6502;
    use crate::flags::{C, Z};
    use emu_core::{Cpu, SimpleBus};

    fn run_instruction(cpu: &mut Mos6502, bus: &mut SimpleBus) -> u32 {
        cpu.tick(bus);
        let mut cycles = 1;
        while !cpu.is_instruction_complete() {
            cpu.tick(bus);
            cycles += 1;
        }
        cycles
    }

    fn setup(program: &[u8]) -> (Mos6502, SimpleBus) {
        let mut cpu = Mos6502::new();
        let mut bus = SimpleBus::new();
        bus.load(0x0200, program);
        cpu.regs.pc = 0x0200;
        (cpu, bus)
    }

    #[test]
    fn lax_loads_both_registers() {
        let (mut cpu, mut bus) = setup(&[0xA7, 0x10]);
        bus.load(0x0010, &[0x80]);
        assert_eq!(run_instruction(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.regs.a, 0x80);
        assert_eq!(cpu.regs.x, 0x80);
    }

    #[test]
    fn sax_stores_a_and_x() {
        let (mut cpu, mut bus) = setup(&[0x87, 0x10]);
        cpu.regs.a = 0xF0;
        cpu.regs.x = 0x3C;
        assert_eq!(run_instruction(&mut cpu, &mut bus), 3);
        assert_eq!(bus.peek(0x0010), 0x30);
    }

    #[test]
    fn dcp_decrements_and_compares() {
        let (mut cpu, mut bus) = setup(&[0xC7, 0x10]);
        bus.load(0x0010, &[0x43]);
        cpu.regs.a = 0x42;
        assert_eq!(run_instruction(&mut cpu, &mut bus), 5);
        assert_eq!(bus.peek(0x0010), 0x42);
        assert!(cpu.regs.p.is_set(Z));
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn slo_abs_y_always_takes_fix_up_cycle() {
        let (mut cpu, mut bus) = setup(&[0x1B, 0x00, 0x30]);
        bus.load(0x3000, &[0x81]);
        cpu.regs.a = 0x01;
        assert_eq!(run_instruction(&mut cpu, &mut bus), 7);
        assert_eq!(bus.peek(0x3000), 0x02);
        assert_eq!(cpu.regs.a, 0x03);
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn sbx_subtracts_from_a_and_x() {
        let (mut cpu, mut bus) = setup(&[0xCB, 0x05]);
        cpu.regs.a = 0x0F;
        cpu.regs.x = 0xFF;
        assert_eq!(run_instruction(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.regs.x, 0x0A);
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn anc_copies_bit7_to_carry() {
        let (mut cpu, mut bus) = setup(&[0x0B, 0x80]);
        cpu.regs.a = 0xFF;
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.p.is_set(C));
    }
}
