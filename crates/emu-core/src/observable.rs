//! Debugger-facing state queries.
//!
//! Co-processors expose registers and line levels through short string
//! paths so a device shell can report them without knowing the core's
//! types. Queries never affect emulation state.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    /// Cycle counts.
    U64(u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "${v:02X}"),
            Value::U16(v) => write!(f, "${v:04X}"),
            Value::U32(v) => write!(f, "${v:08X}"),
            Value::U64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from!(bool => Bool, u8 => U8, u16 => U16, u32 => U32, u64 => U64);

/// A component whose state can be inspected at any tick.
pub trait Observable {
    /// Look up a property such as `pc`, `flags.c` or `irq`. Unknown paths
    /// give `None`.
    fn query(&self, path: &str) -> Option<Value>;

    /// Every path [`query`](Self::query) answers.
    fn query_paths(&self) -> &'static [&'static str];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_hex_by_width() {
        assert_eq!(Value::U8(0x0A).to_string(), "$0A");
        assert_eq!(Value::U16(0x1FFC).to_string(), "$1FFC");
        assert_eq!(Value::U64(1234).to_string(), "1234");
        assert_eq!(Value::from(true).to_string(), "true");
    }
}
