//! Sans-I/O protocol state machine.
//!
//! The machine consumes one frame at a time and tells the caller what to do
//! next; it performs no I/O itself. Both transport adapters drive it.

pub mod machine;

pub use machine::{Machine, MachineConfig, Reply};
