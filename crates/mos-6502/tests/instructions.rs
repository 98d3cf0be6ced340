//! Instruction behaviour and cycle counts.

use emu_core::{Bus, Cpu, SimpleBus};
use mos_6502::{CpuVariant, Mos6502, flags};

/// Run one complete instruction and return its cycle count.
fn run_instruction(cpu: &mut Mos6502, bus: &mut SimpleBus) -> u32 {
    cpu.tick(bus);
    let mut cycles = 1;
    while !cpu.is_instruction_complete() {
        assert!(cycles < 20, "instruction did not complete within 20 cycles");
        cpu.tick(bus);
        cycles += 1;
    }
    cycles
}

/// Load a program at $0200 and set PC there.
fn setup_program(bus: &mut SimpleBus, cpu: &mut Mos6502, program: &[u8]) {
    bus.load(0x0200, program);
    cpu.regs.pc = 0x0200;
}

/// Cycles for a single instruction with X = Y = `index` and a zero-page
/// pointer at $80 holding $30F0.
fn cycles_of(variant: CpuVariant, program: &[u8], index: u8) -> u32 {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::with_variant(variant);
    bus.load(0x0080, &[0xF0, 0x30]);
    setup_program(&mut bus, &mut cpu, program);
    cpu.regs.x = index;
    cpu.regs.y = index;
    cpu.regs.s = 0xFF;
    run_instruction(&mut cpu, &mut bus)
}

#[test]
fn documented_cycle_counts() {
    // (program, index, cycles)
    let table: &[(&[u8], u8, u32)] = &[
        (&[0xA9, 0x00], 0, 2),       // LDA #
        (&[0xA5, 0x10], 0, 3),       // LDA zp
        (&[0xB5, 0x10], 1, 4),       // LDA zp,X
        (&[0xAD, 0x00, 0x30], 0, 4), // LDA abs
        (&[0xBD, 0x00, 0x30], 1, 4), // LDA abs,X
        (&[0xBD, 0xFF, 0x30], 1, 5), // LDA abs,X page cross
        (&[0xB9, 0xFF, 0x30], 1, 5), // LDA abs,Y page cross
        (&[0xA1, 0x7F], 1, 6),       // LDA (zp,X)
        (&[0xB1, 0x80], 1, 5),       // LDA (zp),Y
        (&[0xB1, 0x80], 0x10, 6),    // LDA (zp),Y page cross
        (&[0x9D, 0x00, 0x30], 0, 5), // STA abs,X
        (&[0x91, 0x80], 0, 6),       // STA (zp),Y
        (&[0x06, 0x10], 0, 5),       // ASL zp
        (&[0x16, 0x10], 0, 6),       // ASL zp,X
        (&[0x0E, 0x00, 0x30], 0, 6), // ASL abs
        (&[0x1E, 0x00, 0x30], 0, 7), // ASL abs,X
        (&[0x0A], 0, 2),             // ASL A
        (&[0x48], 0, 3),             // PHA
        (&[0x68], 0, 4),             // PLA
        (&[0x20, 0x00, 0x30], 0, 6), // JSR
        (&[0x60], 0, 6),             // RTS
        (&[0x40], 0, 6),             // RTI
        (&[0x00], 0, 7),             // BRK
        (&[0x4C, 0x00, 0x30], 0, 3), // JMP abs
        (&[0x6C, 0x00, 0x30], 0, 5), // JMP (ind)
        (&[0xD0, 0x02], 0, 3),       // BNE taken (Z clear)
        (&[0xF0, 0x02], 0, 2),       // BEQ not taken
        (&[0xD0, 0x80], 0, 4),       // BNE taken across a page
    ];
    for &(program, index, expected) in table {
        assert_eq!(
            cycles_of(CpuVariant::Nmos, program, index),
            expected,
            "NMOS {program:02X?} X/Y={index}"
        );
    }
}

#[test]
fn undocumented_cycle_counts() {
    let table: &[(&[u8], u8, u32)] = &[
        (&[0xA7, 0x10], 0, 3),       // LAX zp
        (&[0xBF, 0xFF, 0x30], 1, 5), // LAX abs,Y page cross
        (&[0x87, 0x10], 0, 3),       // SAX zp
        (&[0x97, 0x10], 1, 4),       // SAX zp,Y
        (&[0x07, 0x10], 0, 5),       // SLO zp
        (&[0x03, 0x7F], 1, 8),       // SLO (zp,X)
        (&[0x13, 0x80], 0, 8),       // SLO (zp),Y
        (&[0xDB, 0x00, 0x30], 0, 7), // DCP abs,Y
        (&[0xEB, 0x01], 0, 2),       // SBC # alias
        (&[0x1A], 0, 2),             // NOP implied
        (&[0x80, 0x00], 0, 2),       // NOP #
        (&[0x04, 0x10], 0, 3),       // NOP zp
        (&[0x14, 0x10], 0, 4),       // NOP zp,X
        (&[0x0C, 0x00, 0x30], 0, 4), // NOP abs
        (&[0x1C, 0xFF, 0x30], 1, 5), // NOP abs,X page cross
    ];
    for &(program, index, expected) in table {
        assert_eq!(
            cycles_of(CpuVariant::Nmos, program, index),
            expected,
            "NMOS {program:02X?} X/Y={index}"
        );
    }
}

#[test]
fn cmos_cycle_counts() {
    let table: &[(&[u8], u8, u32)] = &[
        (&[0xB2, 0x80], 0, 5),       // LDA (zp)
        (&[0x92, 0x80], 0, 5),       // STA (zp)
        (&[0x64, 0x10], 0, 3),       // STZ zp
        (&[0x9E, 0x00, 0x30], 0, 5), // STZ abs,X
        (&[0x80, 0x02], 0, 3),       // BRA
        (&[0xDA], 0, 3),             // PHX
        (&[0xFA], 0, 4),             // PLX
        (&[0x1A], 0, 2),             // INC A
        (&[0x89, 0x01], 0, 2),       // BIT #
        (&[0x3C, 0xFF, 0x30], 1, 5), // BIT abs,X page cross
        (&[0x0C, 0x00, 0x30], 0, 6), // TSB abs
        (&[0x6C, 0x00, 0x30], 0, 6), // JMP (ind)
        (&[0x7C, 0x00, 0x30], 0, 6), // JMP (abs,X)
        (&[0x1E, 0x00, 0x30], 0, 6), // ASL abs,X in page
        (&[0x1E, 0xFF, 0x30], 1, 7), // ASL abs,X page cross
        (&[0xDE, 0x00, 0x30], 0, 7), // DEC abs,X
        (&[0x07, 0x10], 0, 5),       // RMB0 zp
        (&[0x0F, 0x10, 0x02], 0, 6), // BBR0 taken
        (&[0x8F, 0x10, 0x02], 0, 5), // BBS0 not taken
        (&[0x03], 0, 1),             // unused: one-cycle NOP
        (&[0x02, 0x00], 0, 2),       // unused: NOP #
        (&[0x5C, 0x00, 0x30], 0, 8), // unused: eight-cycle NOP
        (&[0xDC, 0x00, 0x30], 0, 4), // unused: NOP abs
    ];
    for &(program, index, expected) in table {
        assert_eq!(
            cycles_of(CpuVariant::Cmos65C02, program, index),
            expected,
            "65C02 {program:02X?} X/Y={index}"
        );
    }
}

#[test]
fn stack_pha_pla() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();

    // LDA #$42; LDX #$FF; TXS; PHA; LDA #$00; PLA
    setup_program(
        &mut bus,
        &mut cpu,
        &[0xA9, 0x42, 0xA2, 0xFF, 0x9A, 0x48, 0xA9, 0x00, 0x68],
    );
    for _ in 0..6 {
        run_instruction(&mut cpu, &mut bus);
    }

    assert_eq!(cpu.regs.a, 0x42);
    assert_eq!(cpu.regs.s, 0xFF);
    assert!(!cpu.regs.p.is_set(flags::Z));
}

#[test]
fn brk_pushes_pc_plus_two_and_break_flag() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x03);
    setup_program(&mut bus, &mut cpu, &[0x00, 0xEA]);
    cpu.regs.s = 0xFF;

    assert_eq!(run_instruction(&mut cpu, &mut bus), 7);
    assert_eq!(cpu.regs.pc, 0x0300);
    assert_eq!(bus.peek(0x01FF), 0x02);
    assert_eq!(bus.peek(0x01FE), 0x02);
    assert_eq!(bus.peek(0x01FD) & 0x30, 0x30);
    assert!(cpu.regs.p.is_set(flags::I));
}

#[test]
fn jsr_rts_round_trip() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    // JSR $0300 ; LDX #$01    $0300: LDA #$07 ; RTS
    setup_program(&mut bus, &mut cpu, &[0x20, 0x00, 0x03, 0xA2, 0x01]);
    bus.load(0x0300, &[0xA9, 0x07, 0x60]);
    cpu.regs.s = 0xFF;

    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.regs.a, 0x07);
    assert_eq!(cpu.regs.x, 0x01);
    assert_eq!(cpu.regs.s, 0xFF);
    assert_eq!(cpu.regs.pc, 0x0205);
}

#[test]
fn nmos_jmp_indirect_wraps_within_page() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    setup_program(&mut bus, &mut cpu, &[0x6C, 0xFF, 0x30]);
    bus.load(0x30FF, &[0x34, 0x12]);
    bus.write(0x3000, 0x56);

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.regs.pc, 0x5634);
}

#[test]
fn nmos_decimal_adc() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    // SED ; CLC ; LDA #$19 ; ADC #$28
    setup_program(&mut bus, &mut cpu, &[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28]);
    for _ in 0..3 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(run_instruction(&mut cpu, &mut bus), 2);
    assert_eq!(cpu.regs.a, 0x47);
    assert!(!cpu.regs.p.is_set(flags::C));
}

#[test]
fn decimal_sbc_borrows_across_digits() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    // SED ; SEC ; LDA #$40 ; SBC #$01
    setup_program(&mut bus, &mut cpu, &[0xF8, 0x38, 0xA9, 0x40, 0xE9, 0x01]);
    for _ in 0..4 {
        run_instruction(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.regs.a, 0x39);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn nmi_is_taken_at_instruction_boundary() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    bus.write(0xFFFA, 0x00);
    bus.write(0xFFFB, 0x04);
    setup_program(&mut bus, &mut cpu, &[0xAD, 0x00, 0x30, 0xEA]);
    cpu.regs.s = 0xFF;

    cpu.tick(&mut bus);
    cpu.nmi();
    // The LDA finishes first.
    for _ in 0..3 {
        cpu.tick(&mut bus);
    }
    assert_eq!(cpu.regs.pc, 0x0203);
    assert_eq!(run_instruction(&mut cpu, &mut bus), 7);
    assert_eq!(cpu.regs.pc, 0x0400);
    assert_eq!(bus.peek(0x01FE), 0x03);
}

#[test]
fn wai_sleeps_until_irq() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::with_variant(CpuVariant::Cmos65C02);
    bus.write(0xFFFE, 0x00);
    bus.write(0xFFFF, 0x05);
    // CLI ; WAI
    setup_program(&mut bus, &mut cpu, &[0x58, 0xCB, 0xEA]);
    run_instruction(&mut cpu, &mut bus);
    cpu.tick(&mut bus);
    cpu.tick(&mut bus);
    for _ in 0..10 {
        cpu.tick(&mut bus);
    }
    assert_eq!(cpu.regs.pc, 0x0202);

    // One cycle to wake, seven for the interrupt sequence.
    cpu.set_irq(true);
    for _ in 0..8 {
        cpu.tick(&mut bus);
    }
    assert_eq!(cpu.regs.pc, 0x0500);
}

#[test]
fn jam_halts_cpu() {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    setup_program(&mut bus, &mut cpu, &[0x12, 0xEA]);
    for _ in 0..10 {
        cpu.tick(&mut bus);
    }
    assert!(cpu.is_halted());
    assert_eq!(cpu.regs.pc, 0x0201);
}
