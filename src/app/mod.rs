//! Application core: decision logic, zero I/O.
//!
//! This module owns the shared agent state (latest readings, context,
//! emergency mode) and runs the decision cycle.  All interaction with the
//! bus, the weather provider and the classifier happens through **port
//! traits** defined in [`ports`], keeping this layer testable without a
//! broker or network.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod state;
