//! Collaborator contracts.
//!
//! The engine never retains references into a collaborator; every trait
//! call passes copied scalars and returns scalars. Edge detection,
//! debouncing, LED rendering, MIDI framing and EEPROM byte drivers all
//! live behind these traits.

use midly::live::LiveEvent;

use crate::config::{IndicatorMode, PAGE_SIZE};

/// Hardware scan, called once per main-loop cycle before value updates.
pub trait Inputs {
    /// Accumulated tick delta of one encoder since the last scan.
    fn encoder_delta(&mut self, index: usize) -> i8;

    /// Switches that went down since the last scan, one bit per position.
    fn switch_down_mask(&mut self) -> u16;

    /// Switches that went up since the last scan.
    fn switch_up_mask(&mut self) -> u16;

    /// Current held state of all switches.
    fn switch_state_mask(&mut self) -> u16;
}

/// Non-volatile storage. Writes are atomic at page granularity once
/// issued; there are no retries at this level.
pub trait Eeprom {
    fn read(&mut self, addr: u16, buf: &mut [u8]);

    fn write_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]);
}

/// Outbound MIDI transport.
pub trait MidiOut {
    fn send(&mut self, event: LiveEvent<'static>);

    /// Pushes any queued messages onto the wire. Used between the
    /// high-resolution prefix and its primary message so they cannot be
    /// reordered.
    fn flush(&mut self);
}

/// LED/indicator driver and animation renderer.
pub trait Leds {
    fn set_indicator(
        &mut self,
        index: usize,
        value: u8,
        has_detent: bool,
        mode: IndicatorMode,
        detent_color: u8,
    );

    fn set_rgb(&mut self, index: usize, color: u8);

    fn run_animation(&mut self, index: usize, bank: u8, animation: u8, base_color: u8);
}

/// Hardware liveness watchdog. Long scans must service it or the
/// controller resets mid-scan.
pub trait Watchdog {
    fn service(&mut self);
}
