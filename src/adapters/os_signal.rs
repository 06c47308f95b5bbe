//! SIGINT/SIGTERM forwarding.
//!
//! The handler only raises the [`StopSignal`]; the control loop then
//! leaves its executor and publishes the final safety shutoff as for a
//! `shutdown` command.

use log::warn;

use crate::channels::StopSignal;

/// Install the process-wide handler.  May only be called once.
pub fn forward_to(stop: &StopSignal) -> Result<(), ctrlc::Error> {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
        if !stop.is_raised() {
            warn!("Termination signal received, stopping");
        }
        stop.raise();
    })
}
