//! 6502 co-processor host.
//!
//! Pairs a [`Mos6502`] with a [`MemoryMap`] and runs it against a device
//! scheduler in slices. The board that owns the co-processor supplies the
//! memory-mapped I/O and receives the scheduler's events; both are handed
//! in by `&mut` for the duration of a slice.

use std::collections::BTreeSet;

use emu_core::{Bus, Cpu, EventHandler, Scheduler};

use crate::memory_map::{MemoryMap, Page};
use crate::{CpuVariant, Mos6502};

/// The hardware around a co-processor: I/O handlers, interrupt line and
/// scheduled events.
pub trait CoProcBoard: EventHandler {
    /// Read through a [`Page::Handler`] page.
    fn read(&mut self, scheduler: &mut Scheduler, handler: u8, address: u16) -> u8;

    /// Write through a [`Page::Handler`] page.
    fn write(&mut self, scheduler: &mut Scheduler, handler: u8, address: u16, value: u8);

    /// Read without side effects, for debuggers.
    fn debug_read(&self, scheduler: &Scheduler, handler: u8, address: u16) -> u8;

    /// Level of the CPU's IRQ input.
    fn irq_asserted(&self) -> bool {
        false
    }
}

/// Bus seen by the CPU for one tick.
struct BoardBus<'a, B: CoProcBoard + ?Sized> {
    map: &'a mut MemoryMap,
    board: &'a mut B,
    scheduler: &'a mut Scheduler,
}

impl<B: CoProcBoard + ?Sized> Bus for BoardBus<'_, B> {
    fn read(&mut self, address: u16) -> u8 {
        match self.map.read_page((address >> 8) as u8) {
            Page::Memory(base) => self.map.arena_read(base, address),
            Page::Handler(id) => self.board.read(self.scheduler, id, address),
            Page::Unmapped => 0xFF,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match self.map.write_page((address >> 8) as u8) {
            Page::Memory(base) => self.map.arena_write(base, address, value),
            Page::Handler(id) => self.board.write(self.scheduler, id, address, value),
            Page::Unmapped => {}
        }
    }
}

/// A 6502 or 65C02 embedded in a peripheral.
#[derive(Debug)]
pub struct CoProc6502 {
    cpu: Mos6502,
    map: MemoryMap,
    breakpoints: BTreeSet<u16>,
    breakpoint_hit: bool,
    /// Breakpoint address to step over on the next resume.
    resume_pc: Option<u16>,
    step_requested: bool,
}

impl CoProc6502 {
    /// A co-processor with an unmapped address space and `memory_size`
    /// bytes of arena for ROM and RAM.
    #[must_use]
    pub fn new(variant: CpuVariant, memory_size: usize) -> Self {
        Self {
            cpu: Mos6502::with_variant(variant),
            map: MemoryMap::new(memory_size),
            breakpoints: BTreeSet::new(),
            breakpoint_hit: false,
            resume_pc: None,
            step_requested: false,
        }
    }

    #[must_use]
    pub fn cpu(&self) -> &Mos6502 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Mos6502 {
        &mut self.cpu
    }

    #[must_use]
    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut MemoryMap {
        &mut self.map
    }

    /// Replace the CPU, for snapshot restore.
    pub fn restore_cpu(&mut self, cpu: Mos6502) {
        self.cpu = cpu;
        self.resume_pc = None;
        self.breakpoint_hit = false;
    }

    /// Power-on reset. The reset vector is fetched during the next seven
    /// cycles of [`run`](Self::run).
    pub fn cold_reset(&mut self) {
        self.cpu.regs = crate::Registers::new();
        self.cpu.set_irq(false);
        self.cpu.reset();
        self.breakpoint_hit = false;
        self.resume_pc = None;
        self.step_requested = false;
    }

    pub fn set_breakpoint(&mut self, pc: u16) {
        self.breakpoints.insert(pc);
    }

    pub fn clear_breakpoint(&mut self, pc: u16) {
        self.breakpoints.remove(&pc);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    #[must_use]
    pub fn has_breakpoint(&self, pc: u16) -> bool {
        self.breakpoints.contains(&pc)
    }

    /// True if the last [`run`](Self::run) stopped on a breakpoint.
    #[must_use]
    pub fn breakpoint_hit(&self) -> bool {
        self.breakpoint_hit
    }

    /// Make the next [`run`](Self::run) return after one instruction.
    pub fn request_step(&mut self) {
        self.step_requested = true;
    }

    /// Run until the scheduler's stop tick.
    ///
    /// Returns `true` when the stop tick was reached and `false` when a
    /// breakpoint or a requested step ended the slice early. After a
    /// breakpoint the PC is left on the breakpoint address, and the next
    /// call executes that instruction instead of stopping again.
    pub fn run<B: CoProcBoard + ?Sized>(&mut self, board: &mut B, scheduler: &mut Scheduler) -> bool {
        self.breakpoint_hit = false;

        loop {
            scheduler.fire_due(board);
            if scheduler.reached_stop() {
                return true;
            }

            if self.cpu.is_instruction_complete() && !self.breakpoints.is_empty() {
                let pc = self.cpu.regs.pc;
                if self.resume_pc.take() != Some(pc) && self.breakpoints.contains(&pc) {
                    log::debug!("co-processor breakpoint at ${pc:04X}");
                    self.breakpoint_hit = true;
                    self.resume_pc = Some(pc);
                    return false;
                }
            }

            self.tick(board, scheduler);

            if self.step_requested && self.cpu.is_instruction_complete() {
                self.step_requested = false;
                return false;
            }
        }
    }

    /// Execute one whole instruction, ignoring the stop tick and
    /// breakpoints. Returns the cycles it took.
    pub fn step<B: CoProcBoard + ?Sized>(&mut self, board: &mut B, scheduler: &mut Scheduler) -> u32 {
        let mut cycles = 0;
        loop {
            scheduler.fire_due(board);
            self.tick(board, scheduler);
            cycles += 1;
            if self.cpu.is_instruction_complete() || self.cpu.is_halted() {
                return cycles;
            }
        }
    }

    fn tick<B: CoProcBoard + ?Sized>(&mut self, board: &mut B, scheduler: &mut Scheduler) {
        self.cpu.set_irq(board.irq_asserted());
        let mut bus = BoardBus {
            map: &mut self.map,
            board,
            scheduler,
        };
        self.cpu.tick(&mut bus);
        scheduler.advance(1);
    }

    /// Read memory as the CPU would, but without I/O side effects.
    #[must_use]
    pub fn debug_read<B: CoProcBoard + ?Sized>(
        &self,
        board: &B,
        scheduler: &Scheduler,
        address: u16,
    ) -> u8 {
        match self.map.read_page((address >> 8) as u8) {
            Page::Memory(base) => self.map.arena_read(base, address),
            Page::Handler(id) => board.debug_read(scheduler, id, address),
            Page::Unmapped => 0xFF,
        }
    }
}
