//! Shift overlay: an alternate interaction mode where the switches emit
//! fixed notes on the system channel and drive an LED overlay that is
//! independent of bank state.

use crate::config::IndicatorMode;
use crate::hal::{Inputs, Leds, MidiOut};
use crate::midi::{note_event, SHIFT_NOTE_OFFSET, SYSTEM_CHANNEL};
use crate::PHYSICAL_ENCODERS;

/// Overlay color for a set shift bit.
const SHIFT_WHITE: u8 = 126;

/// Number of independent shift pages.
pub const SHIFT_PAGES: usize = 2;

/// Two pages of 16 shift bits plus the override bits that freeze local
/// switch edges in favor of inbound feedback.
pub struct ShiftOverlay {
    switch_state: [u16; SHIFT_PAGES],
    midi_override: [u16; SHIFT_PAGES],
    cursor: usize,
}

impl ShiftOverlay {
    pub const fn new() -> Self {
        Self {
            switch_state: [0; SHIFT_PAGES],
            midi_override: [0; SHIFT_PAGES],
            cursor: 0,
        }
    }

    pub fn is_set(&self, page: usize, index: usize) -> bool {
        self.switch_state[page & 1] & (1 << (index & 0x0F)) != 0
    }

    /// One shift-mode cycle for the given page: scan switch edges, emit
    /// their notes, then repaint one rotating overlay position.
    pub fn run<I, M, L>(&mut self, page: usize, inputs: &mut I, midi: &mut M, leds: &mut L)
    where
        I: Inputs,
        M: MidiOut,
        L: Leds,
    {
        let page = page & 1;
        let down = inputs.switch_down_mask();
        let up = inputs.switch_up_mask();

        for i in 0..PHYSICAL_ENCODERS {
            let bit = 1u16 << i;
            let note = SHIFT_NOTE_OFFSET + (i + 16 * page) as u8;
            if down & bit != 0 {
                midi.send(note_event(SYSTEM_CHANNEL, note, true, 127));
                if self.midi_override[page] & bit == 0 {
                    self.switch_state[page] |= bit;
                }
            } else if up & bit != 0 {
                midi.send(note_event(SYSTEM_CHANNEL, note, false, 0));
                if self.midi_override[page] & bit == 0 {
                    self.switch_state[page] &= !bit;
                }
            }
        }

        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % PHYSICAL_ENCODERS;
        if self.is_set(page, idx) {
            leds.set_rgb(idx, SHIFT_WHITE);
            leds.set_indicator(idx, 127, false, IndicatorMode::Bar, 0);
        } else {
            leds.set_rgb(idx, 0);
            leds.set_indicator(idx, 0, false, IndicatorMode::Bar, 0);
        }
    }

    /// Applies an inbound shift note. The bit is forced to the wire value
    /// and its override raised, so local edges stop moving it.
    pub fn apply_feedback(&mut self, page: usize, index: usize, on: bool) {
        let page = page & 1;
        let bit = 1u16 << (index & 0x0F);
        self.midi_override[page] |= bit;
        if on {
            self.switch_state[page] |= bit;
        } else {
            self.switch_state[page] &= !bit;
        }
    }
}

impl Default for ShiftOverlay {
    fn default() -> Self {
        Self::new()
    }
}
