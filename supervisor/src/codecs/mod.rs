//! Pure transformations (spec.md §4.1–4.3): no I/O, no shared state.

pub mod converters;
pub mod modbus_register;
pub mod turbovac;
