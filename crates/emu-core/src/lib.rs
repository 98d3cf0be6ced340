//! Core traits and types for event-scheduled emulation.
//!
//! Every clock domain (the host computer, each peripheral) owns a [`Clock`]
//! and a [`Scheduler`]. Components never step themselves per tick; they
//! queue events against their scheduler and catch up arithmetically when
//! the event fires or when they are accessed.

mod bus;
mod clock;
mod cpu;
mod observable;
mod round;
mod scheduler;

pub use bus::{Bus, SimpleBus};
pub use clock::{Clock, tick_delta, tick_le, tick_lt};
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use round::{round_to_int, round_to_int64};
pub use scheduler::{
    EventHandle, EventHandler, EventTarget, NO_EVENT, Scheduler, SchedulerError,
};
