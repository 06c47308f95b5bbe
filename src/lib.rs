//! Sound agent library.
//!
//! Closed-loop controller: MQTT telemetry plus polled weather context are
//! fused into the feature vector of a pre-trained classifier, whose output
//! becomes actuator commands, under a hard-threshold emergency override.
//!
//! Exposes every module for integration testing; the binary in `main.rs`
//! only wires adapters together.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channels;
pub mod config;
pub mod context;
pub mod decision;
pub mod encoder;
pub mod error;
pub mod inference;
pub mod safety;
pub mod scheduler;
pub mod telemetry;
pub mod tracker;
