//! MIDI codec: outbound message construction and the inbound feedback
//! dispatcher.
//!
//! Inbound traffic is keyed by a fixed set of logical wire channels.
//! [`classify`] validates channel, role and control number and yields a
//! closed [`Feedback`] variant; anything that does not match a role is
//! ignored. This validation is what makes it safe for the engine to use
//! inbound control numbers as table indices afterwards.

use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;

use crate::config::{EncoderConfig, MidiKind};
use crate::hal::MidiOut;
use crate::BANKED_ENCODERS;

/// Reserved controller number for the high-resolution velocity prefix,
/// shared by all rotary controls. The prefix CC carries the low 7 bits of
/// a 14-bit value and must immediately precede the primary message.
pub const HIGH_RES_PREFIX_CC: u8 = 0x58;

/// First note number of the shift-overlay window on the system channel.
pub const SHIFT_NOTE_OFFSET: u8 = 64;

/// Notes covered by the shift-overlay window: two pages of 16.
pub const SHIFT_NOTE_COUNT: u8 = 32;

/// Rotary indicator feedback (CC, plus the high-resolution prefix).
pub const ROTARY_FEEDBACK_CHANNEL: u8 = 0;

/// Switch state / RGB override feedback (CC).
pub const SWITCH_FEEDBACK_CHANNEL: u8 = 1;

/// Switch-class animation buffer writes (CC).
pub const SWITCH_ANIMATION_CHANNEL: u8 = 2;

/// Fixed-function system channel (shift-mode notes).
pub const SYSTEM_CHANNEL: u8 = 3;

/// Live phenotype reconfiguration (CC).
pub const RECONFIGURE_CHANNEL: u8 = 4;

/// Indicator-class animation buffer writes (CC).
pub const INDICATOR_ANIMATION_CHANNEL: u8 = 5;

/// Builds a control-change event on a 0-based wire channel.
pub fn cc_event(channel: u8, number: u8, value: u8) -> LiveEvent<'static> {
    LiveEvent::Midi {
        channel: u4::new(channel & 0x0F),
        message: MidiMessage::Controller {
            controller: u7::new(number & 0x7F),
            value: u7::new(value & 0x7F),
        },
    }
}

/// Builds a note event on a 0-based wire channel.
pub fn note_event(channel: u8, key: u8, on: bool, velocity: u8) -> LiveEvent<'static> {
    let key = u7::new(key & 0x7F);
    let vel = u7::new(velocity & 0x7F);
    LiveEvent::Midi {
        channel: u4::new(channel & 0x0F),
        message: if on {
            MidiMessage::NoteOn { key, vel }
        } else {
            MidiMessage::NoteOff { key, vel }
        },
    }
}

/// Sends the MIDI for a rotary control carrying a 14-bit value.
///
/// Only CC-kind controls emit here. With high resolution enabled the low
/// 7 bits go out first on the reserved prefix controller and are flushed
/// so the pair cannot be reordered; the primary CC then carries the high
/// 7 bits, which is all a receiver that ignores the prefix ever needs.
pub fn send_encoder_midi<M: MidiOut>(cfg: &EncoderConfig, value: u16, shifted: bool, midi: &mut M) {
    if cfg.encoder_kind != MidiKind::Cc {
        return;
    }
    let channel = if shifted {
        cfg.shift_channel
    } else {
        cfg.encoder_channel.saturating_sub(1)
    };
    if cfg.high_res {
        midi.send(cc_event(channel, HIGH_RES_PREFIX_CC, (value & 0x7F) as u8));
        midi.flush();
    }
    midi.send(cc_event(channel, cfg.encoder_number, (value >> 7) as u8));
}

/// Sends the literal 7-bit state of a switch control.
pub fn send_switch_midi<M: MidiOut>(cfg: &EncoderConfig, value: u8, midi: &mut M) {
    midi.send(cc_event(
        cfg.switch_channel.saturating_sub(1),
        cfg.switch_number,
        value,
    ));
}

/// One validated inbound feedback message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feedback {
    /// Shift page/index driven from outside; also raises the override
    /// that freezes local switch edges for that bit.
    ShiftState { page: usize, index: usize, on: bool },
    /// High-resolution prefix: low 7 bits pending for the next indicator
    /// message.
    IndicatorPrefix { fine: u8 },
    /// Indicator value (high 7 bits) for one banked slot.
    Indicator { slot: usize, value: u8 },
    /// Stored switch MIDI/toggle state plus RGB override for one slot.
    SwitchState { slot: usize, value: u8 },
    /// Live phenotype change for one slot.
    Reconfigure { slot: usize, value: u8 },
    SwitchAnimation { slot: usize, value: u8 },
    IndicatorAnimation { slot: usize, value: u8 },
}

/// Dispatches an inbound event by logical channel role.
///
/// Control numbers are validated against the banked slot range (and shift
/// notes against the reserved note window) before they may be used as
/// indices; everything else returns `None` and is ignored.
pub fn classify(event: &LiveEvent<'_>) -> Option<Feedback> {
    let LiveEvent::Midi { channel, message } = event else {
        return None;
    };

    match (channel.as_int(), message) {
        (SYSTEM_CHANNEL, MidiMessage::NoteOn { key, vel }) => {
            shift_state(key.as_int(), vel.as_int() > 0)
        }
        (SYSTEM_CHANNEL, MidiMessage::NoteOff { key, .. }) => shift_state(key.as_int(), false),
        (ROTARY_FEEDBACK_CHANNEL, MidiMessage::Controller { controller, value }) => {
            if controller.as_int() == HIGH_RES_PREFIX_CC {
                Some(Feedback::IndicatorPrefix {
                    fine: value.as_int(),
                })
            } else {
                Some(Feedback::Indicator {
                    slot: slot(controller.as_int())?,
                    value: value.as_int(),
                })
            }
        }
        (SWITCH_FEEDBACK_CHANNEL, MidiMessage::Controller { controller, value }) => {
            Some(Feedback::SwitchState {
                slot: slot(controller.as_int())?,
                value: value.as_int(),
            })
        }
        (RECONFIGURE_CHANNEL, MidiMessage::Controller { controller, value }) => {
            Some(Feedback::Reconfigure {
                slot: slot(controller.as_int())?,
                value: value.as_int(),
            })
        }
        (SWITCH_ANIMATION_CHANNEL, MidiMessage::Controller { controller, value }) => {
            Some(Feedback::SwitchAnimation {
                slot: slot(controller.as_int())?,
                value: value.as_int(),
            })
        }
        (INDICATOR_ANIMATION_CHANNEL, MidiMessage::Controller { controller, value }) => {
            Some(Feedback::IndicatorAnimation {
                slot: slot(controller.as_int())?,
                value: value.as_int(),
            })
        }
        _ => None,
    }
}

fn slot(number: u8) -> Option<usize> {
    (number < BANKED_ENCODERS as u8).then_some(number as usize)
}

fn shift_state(key: u8, on: bool) -> Option<Feedback> {
    if !(SHIFT_NOTE_OFFSET..SHIFT_NOTE_OFFSET + SHIFT_NOTE_COUNT).contains(&key) {
        return None;
    }
    let offset = (key - SHIFT_NOTE_OFFSET) as usize;
    Some(Feedback::ShiftState {
        page: offset / 16,
        index: offset % 16,
        on,
    })
}
