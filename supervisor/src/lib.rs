//! Device-interface supervisor for a cryogenic refrigeration rig: the set
//! of concurrent workers that own bus connections, poll devices on fixed
//! periods, route commands to the correct bus, maintain the authoritative
//! live-values map, compute derived quantities, and aggregate faults into
//! a single severity stream.
//!
//! Two pieces carry most of the design weight: the turbovac telegram codec
//! ([`codecs::turbovac`]) and the concurrency model that lets five
//! independent bus workers share one values map and one error channel
//! without blocking each other ([`supervisor`]).

pub mod bus;
pub mod codecs;
pub mod derived;
pub mod error;
pub mod gateway;
pub mod supervisor;

pub use error::SupervisorError;
