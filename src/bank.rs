//! Banked/virtual slot addressing and cross-bank value propagation.

use crate::config::{EncoderConfig, MidiKind};
use crate::hal::Watchdog;
use crate::{BANKED_ENCODERS, NUM_BANKS, PHYSICAL_ENCODERS, VIRTUAL_ENCODERS};

/// Banked slot id of a physical position in a bank.
pub fn virtual_id(bank: usize, encoder: usize) -> usize {
    bank * PHYSICAL_ENCODERS + encoder
}

/// Shifted twin of a banked slot; shifted slots occupy the upper half of
/// the virtual value namespace and share their twin's configuration.
pub fn shifted_id(banked_id: usize) -> usize {
    banked_id + BANKED_ENCODERS
}

/// True when two slots expose "the same" external MIDI control: equal
/// number and message kind. Relative encoders carry position-delta
/// semantics, so their values must never be copied across banks.
pub fn maps_match(a: &EncoderConfig, b: &EncoderConfig) -> bool {
    a.encoder_number == b.encoder_number
        && a.encoder_kind == b.encoder_kind
        && a.encoder_kind != MidiKind::RelEnc
}

/// Copies the raw value and indicator buffer entry of every control in
/// `from_bank` into every other bank's slot with a matching mapping on the
/// same MIDI channel. Keeps banks that expose one external control
/// numerically and visually consistent without re-sending MIDI.
///
/// This scan is O(banks^2 * positions) and runs on every bank change, so
/// the liveness watchdog is serviced once per bank row.
pub fn transfer_values<W: Watchdog>(
    settings: &[EncoderConfig; BANKED_ENCODERS],
    raw_values: &mut [i16; VIRTUAL_ENCODERS],
    indicator_values: &mut [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    from_bank: usize,
    watchdog: &mut W,
) {
    for encoder in 0..PHYSICAL_ENCODERS {
        let this_id = virtual_id(from_bank, encoder);
        for that_bank in 0..NUM_BANKS {
            watchdog.service();
            if that_bank == from_bank {
                continue;
            }
            for that_encoder in 0..PHYSICAL_ENCODERS {
                let that_id = virtual_id(that_bank, that_encoder);
                if maps_match(&settings[this_id], &settings[that_id])
                    && settings[this_id].encoder_channel == settings[that_id].encoder_channel
                {
                    raw_values[that_id] = raw_values[this_id];
                    indicator_values[that_bank][that_encoder] =
                        indicator_values[from_bank][encoder];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::tests::MockWatchdog;

    fn settings_with(pairs: &[(usize, u8, u8, MidiKind)]) -> [EncoderConfig; BANKED_ENCODERS] {
        let mut settings = [EncoderConfig::default(); BANKED_ENCODERS];
        // Give every slot a distinct number first so nothing matches by
        // accident.
        for (id, cfg) in settings.iter_mut().enumerate() {
            cfg.encoder_number = id as u8;
        }
        for &(id, number, channel, kind) in pairs {
            settings[id].encoder_number = number;
            settings[id].encoder_channel = channel;
            settings[id].encoder_kind = kind;
        }
        settings
    }

    #[test]
    fn test_virtual_id_layout() {
        assert_eq!(virtual_id(0, 0), 0);
        assert_eq!(virtual_id(1, 0), 16);
        assert_eq!(virtual_id(3, 15), 63);
        assert_eq!(shifted_id(virtual_id(0, 2)), 66);
    }

    #[test]
    fn test_maps_match_excludes_relative_encoders() {
        let mut a = EncoderConfig::default();
        let mut b = EncoderConfig::default();
        a.encoder_number = 7;
        b.encoder_number = 7;
        assert!(maps_match(&a, &b));

        b.encoder_kind = MidiKind::RelEnc;
        assert!(!maps_match(&a, &b));
        a.encoder_kind = MidiKind::RelEnc;
        // Same kind, but relative values are never transferred.
        assert!(!maps_match(&a, &b));
    }

    #[test]
    fn test_transfer_converges_matching_slots() {
        // Slot 2 of bank 0 and slot 9 of bank 2 share number 40, channel 5.
        let settings = settings_with(&[
            (virtual_id(0, 2), 40, 5, MidiKind::Cc),
            (virtual_id(2, 9), 40, 5, MidiKind::Cc),
        ]);
        let mut raw = [0i16; VIRTUAL_ENCODERS];
        let mut indicators = [[0u8; PHYSICAL_ENCODERS]; NUM_BANKS];
        raw[virtual_id(0, 2)] = 9000;
        indicators[0][2] = 70;

        let mut watchdog = MockWatchdog::default();
        transfer_values(&settings, &mut raw, &mut indicators, 0, &mut watchdog);

        assert_eq!(raw[virtual_id(2, 9)], 9000);
        assert_eq!(indicators[2][9], 70);
        assert!(watchdog.services > 0);
    }

    #[test]
    fn test_transfer_requires_matching_channel() {
        // Same number and kind, different channel: values never converge.
        let settings = settings_with(&[
            (virtual_id(0, 2), 40, 5, MidiKind::Cc),
            (virtual_id(2, 9), 40, 6, MidiKind::Cc),
        ]);
        let mut raw = [0i16; VIRTUAL_ENCODERS];
        let mut indicators = [[0u8; PHYSICAL_ENCODERS]; NUM_BANKS];
        raw[virtual_id(0, 2)] = 9000;

        let mut watchdog = MockWatchdog::default();
        transfer_values(&settings, &mut raw, &mut indicators, 0, &mut watchdog);

        assert_eq!(raw[virtual_id(2, 9)], 0);
    }

    #[test]
    fn test_transfer_never_copies_within_the_source_bank() {
        let settings = settings_with(&[
            (virtual_id(1, 0), 40, 5, MidiKind::Cc),
            (virtual_id(1, 1), 40, 5, MidiKind::Cc),
        ]);
        let mut raw = [0i16; VIRTUAL_ENCODERS];
        let mut indicators = [[0u8; PHYSICAL_ENCODERS]; NUM_BANKS];
        raw[virtual_id(1, 0)] = 1234;

        let mut watchdog = MockWatchdog::default();
        transfer_values(&settings, &mut raw, &mut indicators, 1, &mut watchdog);

        assert_eq!(raw[virtual_id(1, 1)], 0);
    }
}
