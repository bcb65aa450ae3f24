//! The control engine: owns every state table and wires the value,
//! bank, MIDI and display components into the per-cycle entry points.
//!
//! Collaborators are passed into each call and never retained, so the
//! engine itself is plain data that tests can drive with mocks.

use midly::live::LiveEvent;

use crate::bank::{self, shifted_id, virtual_id};
use crate::config::{
    self, ConfigUpdate, EncoderConfig, Phenotype, SwitchAction,
};
use crate::display::DisplayScheduler;
use crate::hal::{Eeprom, Inputs, Leds, MidiOut, Watchdog};
use crate::midi::{self, Feedback};
use crate::shift::ShiftOverlay;
use crate::value::{apply_motion, scale_to_midi};
use crate::{BANKED_ENCODERS, NUM_BANKS, PHYSICAL_ENCODERS, VIRTUAL_ENCODERS};

pub struct EncoderEngine {
    settings: [EncoderConfig; BANKED_ENCODERS],
    raw_value: [i16; VIRTUAL_ENCODERS],
    /// 7-bit indicator value per position, kept for every bank so a bank
    /// switch restores the display without re-sending MIDI.
    indicator_value: [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    switch_color: [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    switch_animation: [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    indicator_animation: [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    switch_midi_state: [[u8; PHYSICAL_ENCODERS]; NUM_BANKS],
    /// One bit per position: set selects the shifted value namespace.
    toggle_state: [u16; NUM_BANKS],
    /// One bit per position: an inbound color override is active, local
    /// toggles stop driving the RGB.
    color_override: [u16; NUM_BANKS],
    /// Low 7 bits from a high-resolution prefix, pending until the next
    /// indicator message consumes (or discards) them.
    pending_fine: Option<u8>,
    bank: usize,
    scheduler: DisplayScheduler,
    shift: ShiftOverlay,
}

impl EncoderEngine {
    pub fn new() -> Self {
        Self {
            settings: [EncoderConfig::default(); BANKED_ENCODERS],
            raw_value: [0; VIRTUAL_ENCODERS],
            indicator_value: [[0; PHYSICAL_ENCODERS]; NUM_BANKS],
            switch_color: [[0; PHYSICAL_ENCODERS]; NUM_BANKS],
            switch_animation: [[0; PHYSICAL_ENCODERS]; NUM_BANKS],
            indicator_animation: [[0; PHYSICAL_ENCODERS]; NUM_BANKS],
            switch_midi_state: [[0; PHYSICAL_ENCODERS]; NUM_BANKS],
            toggle_state: [0; NUM_BANKS],
            color_override: [0; NUM_BANKS],
            pending_fine: None,
            bank: 0,
            scheduler: DisplayScheduler::new(),
            shift: ShiftOverlay::new(),
        }
    }

    /// Loads the settings area and seeds every state buffer: detented
    /// controls rest near the centre, RGBs start at their inactive color.
    pub fn init<E: Eeprom>(&mut self, eeprom: &mut E) {
        self.settings = config::load_settings(eeprom);
        self.raw_value = config::initial_raw_values(&self.settings);
        for bank in 0..NUM_BANKS {
            for i in 0..PHYSICAL_ENCODERS {
                let id = virtual_id(bank, i);
                self.indicator_value[bank][i] = scale_to_midi(self.raw_value[id]);
                self.switch_color[bank][i] = self.settings[id].inactive_color;
            }
        }
        self.switch_animation = [[0; PHYSICAL_ENCODERS]; NUM_BANKS];
        self.indicator_animation = [[0; PHYSICAL_ENCODERS]; NUM_BANKS];
        self.switch_midi_state = [[0; PHYSICAL_ENCODERS]; NUM_BANKS];
        self.toggle_state = [0; NUM_BANKS];
        self.color_override = [0; NUM_BANKS];
        self.pending_fine = None;
        self.scheduler = DisplayScheduler::new();
    }

    pub fn current_bank(&self) -> usize {
        self.bank
    }

    /// Virtual slot a position's value currently lives in: the shifted
    /// twin while the position's shift toggle is engaged.
    fn active_id(&self, bank: usize, encoder: usize) -> usize {
        let banked = virtual_id(bank, encoder);
        if self.toggle_state[bank] & (1 << encoder) != 0 {
            shifted_id(banked)
        } else {
            banked
        }
    }

    /// One hardware-scan cycle: apply encoder motion, emit its MIDI and
    /// run switch-press actions.
    pub fn process_input<I, M>(&mut self, inputs: &mut I, midi: &mut M)
    where
        I: Inputs,
        M: MidiOut,
    {
        let down = inputs.switch_down_mask();
        let held = inputs.switch_state_mask();

        for i in 0..PHYSICAL_ENCODERS {
            let bit = 1u16 << i;
            let banked = virtual_id(self.bank, i);
            let cfg = self.settings[banked];

            match cfg.phenotype {
                Phenotype::Rotary => {
                    let delta = inputs.encoder_delta(i);
                    if delta != 0 {
                        let shifted = self.toggle_state[self.bank] & bit != 0;
                        let id = self.active_id(self.bank, i);
                        let fine =
                            cfg.switch_action == SwitchAction::FineAdjust && held & bit != 0;
                        self.raw_value[id] =
                            apply_motion(self.raw_value[id], delta as i16, fine, cfg.movement);
                        midi::send_encoder_midi(&cfg, self.raw_value[id] as u16, shifted, midi);
                        self.indicator_value[self.bank][i] = scale_to_midi(self.raw_value[id]);
                    }
                }
                Phenotype::Switch | Phenotype::Disabled => {}
            }

            if cfg.phenotype != Phenotype::Disabled
                && down & bit != 0
                && cfg.switch_action == SwitchAction::CcToggle
            {
                let state = if self.switch_midi_state[self.bank][i] != 0 {
                    0
                } else {
                    127
                };
                self.switch_midi_state[self.bank][i] = state;
                if self.color_override[self.bank] & bit == 0 {
                    self.switch_color[self.bank][i] = if state != 0 {
                        cfg.active_color
                    } else {
                        cfg.inactive_color
                    };
                }
                midi::send_switch_midi(&cfg, state, midi);
            }
        }
    }

    /// One shift-mode cycle. While shift mode is active the caller runs
    /// this instead of [`process_input`](Self::process_input) and
    /// [`update_display`](Self::update_display).
    pub fn run_shift_mode<I, M, L>(&mut self, page: usize, inputs: &mut I, midi: &mut M, leds: &mut L)
    where
        I: Inputs,
        M: MidiOut,
        L: Leds,
    {
        self.shift.run(page, inputs, midi, leds);
    }

    /// Applies one inbound MIDI event to the state tables. Runs to
    /// completion; events that match no channel role are ignored.
    pub fn on_midi(&mut self, event: &LiveEvent<'_>) {
        let Some(feedback) = midi::classify(event) else {
            return;
        };

        match feedback {
            Feedback::ShiftState { page, index, on } => {
                self.shift.apply_feedback(page, index, on);
            }
            Feedback::IndicatorPrefix { fine } => {
                self.pending_fine = Some(fine);
            }
            Feedback::Indicator { slot, value } => {
                let bank = slot / PHYSICAL_ENCODERS;
                let encoder = slot % PHYSICAL_ENCODERS;
                // A prefix only counts for the message directly after it.
                let fine = self.pending_fine.take().unwrap_or(0);
                let id = self.active_id(bank, encoder);
                self.raw_value[id] = ((value as i16) << 7) | fine as i16;
                self.indicator_value[bank][encoder] = value;
            }
            Feedback::SwitchState { slot, value } => {
                let bank = slot / PHYSICAL_ENCODERS;
                let encoder = slot % PHYSICAL_ENCODERS;
                let bit = 1u16 << encoder;

                self.switch_midi_state[bank][encoder] = if value != 0 { 127 } else { 0 };

                // The same bit doubles as the shift-namespace toggle, so
                // the indicator must re-read the now-active slot.
                if value != 0 {
                    self.toggle_state[bank] |= bit;
                } else {
                    self.toggle_state[bank] &= !bit;
                }

                let cfg = self.settings[virtual_id(bank, encoder)];
                match value {
                    0 => {
                        self.color_override[bank] &= !bit;
                        self.switch_color[bank][encoder] = cfg.inactive_color;
                    }
                    // 126 is reserved for the shift overlay, 127 for "on":
                    // both fall back to the configured active color.
                    1..=125 => {
                        self.color_override[bank] |= bit;
                        self.switch_color[bank][encoder] = value;
                    }
                    _ => {
                        self.color_override[bank] |= bit;
                        self.switch_color[bank][encoder] = cfg.active_color;
                    }
                }

                let id = self.active_id(bank, encoder);
                self.indicator_value[bank][encoder] = scale_to_midi(self.raw_value[id]);
            }
            Feedback::Reconfigure { slot, value } => {
                self.settings[slot].phenotype = Phenotype::from_index(value);
                // The scheduler's phenotype diff draws the reset frame.
            }
            Feedback::SwitchAnimation { slot, value } => {
                self.switch_animation[slot / PHYSICAL_ENCODERS][slot % PHYSICAL_ENCODERS] = value;
            }
            Feedback::IndicatorAnimation { slot, value } => {
                self.indicator_animation[slot / PHYSICAL_ENCODERS][slot % PHYSICAL_ENCODERS] =
                    value;
            }
        }
    }

    /// Advances the display scheduler by one position.
    pub fn update_display<L: Leds>(&mut self, leds: &mut L) {
        let pos = self.scheduler.position();
        let cfg = self.settings[virtual_id(self.bank, pos)];
        self.scheduler.service(
            &cfg,
            self.indicator_value[self.bank][pos],
            self.switch_color[self.bank][pos],
            self.switch_animation[self.bank][pos],
            self.indicator_animation[self.bank][pos],
            self.bank as u8,
            leds,
        );
    }

    /// Switches the active bank: propagate values to matching slots in
    /// other banks, snapshot both banks' indicator buffers, then force a
    /// full repaint.
    pub fn change_bank<W: Watchdog>(&mut self, new_bank: usize, watchdog: &mut W) {
        #[cfg(feature = "defmt")]
        defmt::debug!("bank change {} -> {}", self.bank, new_bank);

        bank::transfer_values(
            &self.settings,
            &mut self.raw_value,
            &mut self.indicator_value,
            self.bank,
            watchdog,
        );

        for i in 0..PHYSICAL_ENCODERS {
            let old_id = self.active_id(self.bank, i);
            let new_id = self.active_id(new_bank, i);
            self.indicator_value[self.bank][i] = scale_to_midi(self.raw_value[old_id]);
            self.indicator_value[new_bank][i] = scale_to_midi(self.raw_value[new_id]);
        }

        self.scheduler.invalidate();
        self.bank = new_bank;
    }

    /// Full-repaint shortcut: a bank change to the current bank.
    pub fn refresh_display<W: Watchdog>(&mut self, watchdog: &mut W) {
        self.change_bank(self.bank, watchdog);
    }

    /// Applies a partial configuration update to RAM and persists it.
    pub fn save_config<E: Eeprom>(
        &mut self,
        eeprom: &mut E,
        bank: usize,
        encoder: usize,
        update: &ConfigUpdate,
    ) {
        update.apply_to_config(&mut self.settings[virtual_id(bank, encoder)]);
        config::save_record(eeprom, bank, encoder, update);
    }

    /// Rewrites the settings area with factory defaults and re-runs the
    /// boot initialisation from them.
    pub fn factory_reset<E: Eeprom>(&mut self, eeprom: &mut E) {
        config::factory_reset(eeprom);
        self.init(eeprom);
    }
}

impl Default for EncoderEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndicatorMode, Movement};
    use crate::hal::tests::{LedCall, MockEeprom, MockInputs, MockLeds, MockMidi, MockWatchdog};
    use crate::midi::{
        cc_event, HIGH_RES_PREFIX_CC, ROTARY_FEEDBACK_CHANNEL, SWITCH_FEEDBACK_CHANNEL,
    };
    use midly::MidiMessage;

    fn booted_engine() -> EncoderEngine {
        let mut eeprom = MockEeprom::new();
        config::factory_reset(&mut eeprom);
        let mut engine = EncoderEngine::new();
        engine.init(&mut eeprom);
        engine
    }

    fn cc_of(event: &LiveEvent<'static>) -> (u8, u8, u8) {
        let LiveEvent::Midi { channel, message } = event else {
            panic!("not a channel event");
        };
        let MidiMessage::Controller { controller, value } = message else {
            panic!("not a CC");
        };
        (channel.as_int(), controller.as_int(), value.as_int())
    }

    #[test]
    fn test_motion_emits_cc_and_updates_indicator() {
        let mut engine = booted_engine();
        let mut inputs = MockInputs::default();
        inputs.deltas[2] = 1;
        let mut midi = MockMidi::default();

        engine.process_input(&mut inputs, &mut midi);

        // Factory control 2 of bank 0: CC number 2, channel 1 (wire 0),
        // direct movement, so one tick is one MIDI step.
        assert_eq!(midi.events.len(), 1);
        assert_eq!(cc_of(&midi.events[0]), (0, 2, 1));
        assert_eq!(engine.indicator_value[0][2], 1);
        assert_eq!(engine.raw_value[2], 1 << 7);
    }

    #[test]
    fn test_high_res_prefix_precedes_primary_and_is_flushed() {
        let mut engine = booted_engine();
        engine.settings[0].high_res = true;
        engine.settings[0].movement = Movement::Emulated;
        let mut inputs = MockInputs::default();
        inputs.deltas[0] = 3;
        let mut midi = MockMidi::default();

        engine.process_input(&mut inputs, &mut midi);

        // 3 emulated ticks = raw 48: low bits on the prefix, high on the
        // primary, with a flush between them.
        assert_eq!(midi.events.len(), 2);
        assert_eq!(cc_of(&midi.events[0]), (0, HIGH_RES_PREFIX_CC, 48));
        assert_eq!(cc_of(&midi.events[1]), (0, 0, 0));
        assert_eq!(midi.flushes, std::vec![1]);
    }

    #[test]
    fn test_inbound_high_res_pair_combines() {
        let mut engine = booted_engine();
        engine.on_midi(&cc_event(ROTARY_FEEDBACK_CHANNEL, HIGH_RES_PREFIX_CC, 0x41));
        engine.on_midi(&cc_event(ROTARY_FEEDBACK_CHANNEL, 2, 0x3F));

        assert_eq!(engine.raw_value[2], (0x3F << 7) | 0x41);
        assert_eq!(engine.indicator_value[0][2], 0x3F);
    }

    #[test]
    fn test_prefix_cache_is_consumed_once() {
        let mut engine = booted_engine();
        engine.on_midi(&cc_event(ROTARY_FEEDBACK_CHANNEL, HIGH_RES_PREFIX_CC, 0x41));
        engine.on_midi(&cc_event(ROTARY_FEEDBACK_CHANNEL, 2, 0x3F));
        // No prefix this time: low bits must be zero, not stale.
        engine.on_midi(&cc_event(ROTARY_FEEDBACK_CHANNEL, 3, 0x10));

        assert_eq!(engine.raw_value[3], 0x10 << 7);
    }

    #[test]
    fn test_switch_toggle_sends_state_and_recolors() {
        let mut engine = booted_engine();
        let mut inputs = MockInputs {
            down: 1 << 4,
            ..Default::default()
        };
        let mut midi = MockMidi::default();

        engine.process_input(&mut inputs, &mut midi);
        // Factory switch 4: number 4 on switch channel 2 (wire 1).
        assert_eq!(cc_of(&midi.events[0]), (1, 4, 127));
        assert_eq!(engine.switch_midi_state[0][4], 127);
        assert_eq!(
            engine.switch_color[0][4],
            config::DEFAULT_ACTIVE_COLORS[0]
        );

        engine.process_input(&mut inputs, &mut midi);
        assert_eq!(cc_of(&midi.events[1]), (1, 4, 0));
        assert_eq!(engine.switch_midi_state[0][4], 0);
        assert_eq!(
            engine.switch_color[0][4],
            config::DEFAULT_INACTIVE_COLORS[0]
        );
    }

    #[test]
    fn test_switch_feedback_overrides_color_and_engages_shift_namespace() {
        let mut engine = booted_engine();
        engine.on_midi(&cc_event(SWITCH_FEEDBACK_CHANNEL, 4, 33));

        assert_eq!(engine.switch_midi_state[0][4], 127);
        assert_eq!(engine.switch_color[0][4], 33);
        assert_ne!(engine.toggle_state[0] & (1 << 4), 0);

        // Motion now lands in the shifted slot and goes out on the
        // shifted-mode wire channel.
        let mut inputs = MockInputs::default();
        inputs.deltas[4] = 1;
        let mut midi = MockMidi::default();
        engine.process_input(&mut inputs, &mut midi);

        let shifted = shifted_id(virtual_id(0, 4));
        assert_eq!(engine.raw_value[shifted], 1 << 7);
        assert_eq!(engine.raw_value[virtual_id(0, 4)], 0);
        let (channel, _, _) = cc_of(&midi.events[0]);
        assert_eq!(channel as usize, engine.settings[4].shift_channel as usize);

        // A local press no longer drives the RGB while overridden.
        inputs.deltas[4] = 0;
        inputs.down = 1 << 4;
        engine.process_input(&mut inputs, &mut midi);
        assert_eq!(engine.switch_color[0][4], 33);

        // Zero releases the override and the namespace toggle.
        engine.on_midi(&cc_event(SWITCH_FEEDBACK_CHANNEL, 4, 0));
        assert_eq!(engine.toggle_state[0], 0);
        assert_eq!(
            engine.switch_color[0][4],
            config::DEFAULT_INACTIVE_COLORS[0]
        );
    }

    #[test]
    fn test_bank_change_converges_matching_slots_and_repaints() {
        let mut engine = booted_engine();
        // Give bank 2's control 9 the same mapping as bank 0's control 2.
        let twin = virtual_id(2, 9);
        engine.settings[twin].encoder_number = engine.settings[2].encoder_number;
        engine.settings[twin].encoder_channel = engine.settings[2].encoder_channel;

        let mut inputs = MockInputs::default();
        inputs.deltas[2] = 10;
        let mut midi = MockMidi::default();
        engine.process_input(&mut inputs, &mut midi);

        let mut watchdog = MockWatchdog::default();
        engine.change_bank(2, &mut watchdog);

        assert_eq!(engine.current_bank(), 2);
        assert_eq!(engine.raw_value[twin], engine.raw_value[2]);
        assert_eq!(engine.indicator_value[2][9], 10);
        assert!(watchdog.services > 0);

        // The invalidated caches force a full repaint on the next pass.
        let mut leds = MockLeds::default();
        for _ in 0..2 * PHYSICAL_ENCODERS {
            engine.update_display(&mut leds);
        }
        assert!(leds
            .calls
            .iter()
            .any(|call| matches!(call, LedCall::Indicator { index: 9, value: 10, .. })));
    }

    #[test]
    fn test_reconfigure_draws_one_reset_frame_before_switch_repaint() {
        let mut engine = booted_engine();
        let mut leds = MockLeds::default();
        // Settle the display as rotary.
        for _ in 0..2 * PHYSICAL_ENCODERS {
            engine.update_display(&mut leds);
        }
        leds.clear();

        // Phenotype index 1 = switch.
        engine.on_midi(&cc_event(crate::midi::RECONFIGURE_CHANNEL, 0, 1));
        engine.update_display(&mut leds);
        assert_eq!(
            leds.calls,
            std::vec![LedCall::Indicator {
                index: 0,
                value: 0,
                has_detent: false,
                mode: IndicatorMode::Bar,
                detent_color: 0,
            }]
        );
        leds.clear();

        // Next rotation repaints the RGB for the new role.
        for _ in 0..PHYSICAL_ENCODERS {
            engine.update_display(&mut leds);
        }
        assert!(leds
            .calls
            .iter()
            .any(|call| matches!(call, LedCall::Rgb { index: 0, .. })));
    }

    #[test]
    fn test_save_config_persists_and_survives_reload() {
        let mut eeprom = MockEeprom::new();
        config::factory_reset(&mut eeprom);
        let mut engine = EncoderEngine::new();
        engine.init(&mut eeprom);

        let update = ConfigUpdate {
            encoder_number: Some(0x42),
            ..Default::default()
        };
        engine.save_config(&mut eeprom, 1, 3, &update);
        assert_eq!(engine.settings[virtual_id(1, 3)].encoder_number, 0x42);

        let mut reloaded = EncoderEngine::new();
        reloaded.init(&mut eeprom);
        assert_eq!(reloaded.settings[virtual_id(1, 3)].encoder_number, 0x42);
        // Sibling record in the same page kept its mapping.
        assert_eq!(
            reloaded.settings[virtual_id(1, 2)].encoder_number,
            engine.settings[virtual_id(1, 2)].encoder_number
        );
    }

    #[test]
    fn test_factory_reset_restores_defaults_in_ram() {
        let mut eeprom = MockEeprom::new();
        config::factory_reset(&mut eeprom);
        let mut engine = EncoderEngine::new();
        engine.init(&mut eeprom);

        engine.settings[5].encoder_number = 99;
        engine.factory_reset(&mut eeprom);
        assert_eq!(engine.settings[5].encoder_number, 5);
        assert_eq!(
            engine.switch_color[1][0],
            config::DEFAULT_INACTIVE_COLORS[1]
        );
    }

    #[test]
    fn test_shift_mode_is_bank_independent() {
        let mut engine = booted_engine();
        let mut watchdog = MockWatchdog::default();
        engine.change_bank(3, &mut watchdog);

        let mut inputs = MockInputs {
            down: 1,
            ..Default::default()
        };
        let mut midi = MockMidi::default();
        let mut leds = MockLeds::default();
        engine.run_shift_mode(0, &mut inputs, &mut midi, &mut leds);

        // The note is the fixed offset, untouched by the bank change.
        let LiveEvent::Midi { channel, message } = &midi.events[0] else {
            panic!("not a channel event");
        };
        assert_eq!(channel.as_int(), crate::midi::SYSTEM_CHANNEL);
        assert!(matches!(
            message,
            MidiMessage::NoteOn { key, .. } if key.as_int() == crate::midi::SHIFT_NOTE_OFFSET
        ));
    }
}
