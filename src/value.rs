//! Value scaling for the 14-bit internal encoder resolution and its 7-bit
//! MIDI projection.

use crate::config::Movement;

/// Maximum 14-bit raw encoder value.
pub const MAX_RAW_VALUE: i16 = 0x3FFF;

/// Centre of the raw value range, where a detent rests.
pub const DETENT_CENTER: i16 = (MAX_RAW_VALUE + 1) / 2;

/// Half-width of the detent window around the centre. This is also the
/// smallest raw step that shows up on the high 7 bits.
pub const DETENT_WINDOW: i16 = 1 << 7;

/// Projects a raw 14-bit value onto the 7-bit MIDI range.
///
/// Callers must clamp first; a negative input is a contract violation, not
/// a runtime case.
pub fn scale_to_midi(value: i16) -> u8 {
    debug_assert!(value >= 0, "raw value must be clamped before scaling");
    if value < 0 {
        return 0;
    }
    (value >> 7) as u8
}

/// Saturates a raw value to the 14-bit range [0, 0x3FFF].
pub fn clamp_raw(value: i16) -> i16 {
    value.clamp(0, MAX_RAW_VALUE)
}

/// Applies a signed tick delta to a raw value.
///
/// Fine mode is the smallest possible step (one tick = 1/128 of a MIDI
/// step). `Direct` makes one tick a full MIDI step, `Emulated` sits in
/// between so a ~270 degree sweep covers the full CC range.
pub fn apply_motion(raw: i16, ticks: i16, fine: bool, movement: Movement) -> i16 {
    let shift = if fine {
        0
    } else {
        match movement {
            Movement::Direct => 7,
            Movement::Emulated => 4,
        }
    };
    // Widen before shifting so a large delta cannot overflow i16.
    let moved = raw as i32 + ((ticks as i32) << shift);
    moved.clamp(0, MAX_RAW_VALUE as i32) as i16
}

/// True while the value rests inside the detent window around the centre.
/// Used by the LED collaborator to render the detent marker; it does not
/// alter value flow.
pub fn is_in_detent(value: i16) -> bool {
    value > DETENT_CENTER - DETENT_WINDOW && value < DETENT_CENTER + DETENT_WINDOW
}

/// True when the value sits at either clamp boundary.
pub fn is_in_deadzone(value: i16) -> bool {
    value <= 0 || value >= MAX_RAW_VALUE
}
