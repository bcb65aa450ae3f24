#![no_std]

//! Control engine for a multi-bank rotary-encoder / RGB-switch MIDI
//! controller.
//!
//! The engine owns the authoritative value of every encoder across all
//! banks, turns physical motion and switch edges into MIDI, folds inbound
//! MIDI feedback back into the indicator/LED state, persists per-control
//! configuration in a compact 7-bit-clean record format and schedules
//! display repaints so that only changed elements are redrawn (one element
//! per main-loop cycle, since repainting is processor expensive).
//!
//! Hardware scanning, the LED/animation renderer, the MIDI transport and
//! the EEPROM byte drivers are collaborators behind the traits in [`hal`];
//! the engine is pure logic and unit-testable on the host.

#[cfg(test)]
extern crate std;

pub mod bank;
pub mod config;
pub mod display;
pub mod engine;
pub mod hal;
pub mod midi;
pub mod shift;
pub mod value;

pub use engine::EncoderEngine;

/// Number of encoders on the hardware.
pub const PHYSICAL_ENCODERS: usize = 16;

/// Number of independent banks sharing the physical encoders.
pub const NUM_BANKS: usize = 4;

/// Banked encoders: one config/value slot per (bank, position) pair.
pub const BANKED_ENCODERS: usize = NUM_BANKS * PHYSICAL_ENCODERS;

/// Virtual encoders: every banked encoder plus its shifted counterpart.
/// Ids 0..63 are the unshifted slots, 64..127 the shifted ones.
pub const VIRTUAL_ENCODERS: usize = 2 * BANKED_ENCODERS;
