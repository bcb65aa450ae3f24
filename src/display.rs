//! Round-robin display scheduler.
//!
//! Exactly one physical position is serviced per call, which bounds the
//! per-cycle cost of the LED driver. Every element (indicator bar, RGB,
//! the two animation buffers) is diffed against a cached previous state
//! and only repainted when it changed.

use crate::config::{EncoderConfig, Phenotype};
use crate::hal::Leds;
use crate::PHYSICAL_ENCODERS;

/// RGB value drawn for a position that just became a plain rotary.
const NEUTRAL_RGB: u8 = 127;

/// Which display element an animation id drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnimationClass {
    /// Drives the RGB element.
    Switch,
    /// Drives the indicator bar.
    Indicator,
}

/// Classifies an animation id. Ids outside both ranges (including 0,
/// "off") have no class and never run.
pub fn animation_class(id: u8) -> Option<AnimationClass> {
    match id {
        1..=48 | 127 => Some(AnimationClass::Switch),
        49..=96 => Some(AnimationClass::Indicator),
        _ => None,
    }
}

/// Per-position caches of the last state actually handed to the LED
/// driver for the currently selected bank.
pub struct DisplayScheduler {
    cursor: usize,
    prev_indicator: [Option<u8>; PHYSICAL_ENCODERS],
    prev_color: [Option<u8>; PHYSICAL_ENCODERS],
    prev_phenotype: [Option<Phenotype>; PHYSICAL_ENCODERS],
    prev_switch_animation: [u8; PHYSICAL_ENCODERS],
    prev_indicator_animation: [u8; PHYSICAL_ENCODERS],
}

impl DisplayScheduler {
    pub const fn new() -> Self {
        Self {
            cursor: 0,
            prev_indicator: [None; PHYSICAL_ENCODERS],
            prev_color: [None; PHYSICAL_ENCODERS],
            prev_phenotype: [None; PHYSICAL_ENCODERS],
            prev_switch_animation: [0; PHYSICAL_ENCODERS],
            prev_indicator_animation: [0; PHYSICAL_ENCODERS],
        }
    }

    /// Position the next [`service`](Self::service) call will repaint.
    /// Callers look up that position's state and pass it in.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Drops the indicator and color caches so the next full rotation
    /// repaints every position. Called on bank change.
    pub fn invalidate(&mut self) {
        self.prev_indicator = [None; PHYSICAL_ENCODERS];
        self.prev_color = [None; PHYSICAL_ENCODERS];
    }

    /// Services the current position with its state, then advances the
    /// cursor.
    ///
    /// A phenotype change draws a one-shot reset frame and invalidates
    /// the position's caches; the regular diff repaint happens on the
    /// next rotation. Otherwise a rotary diffs its indicator value, a
    /// switch diffs its RGB color, a disabled position draws nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn service<L: Leds>(
        &mut self,
        cfg: &EncoderConfig,
        indicator_value: u8,
        color: u8,
        switch_animation: u8,
        indicator_animation: u8,
        bank: u8,
        leds: &mut L,
    ) {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % PHYSICAL_ENCODERS;

        if self.prev_phenotype[idx] != Some(cfg.phenotype) {
            match cfg.phenotype {
                Phenotype::Disabled => {
                    leds.set_indicator(idx, 0, false, cfg.indicator_mode, 0);
                    leds.set_rgb(idx, 0);
                }
                Phenotype::Rotary => leds.set_rgb(idx, NEUTRAL_RGB),
                Phenotype::Switch => leds.set_indicator(idx, 0, false, cfg.indicator_mode, 0),
            }
            self.prev_phenotype[idx] = Some(cfg.phenotype);
            self.prev_indicator[idx] = None;
            self.prev_color[idx] = None;
            return;
        }

        match cfg.phenotype {
            Phenotype::Rotary => {
                if self.prev_indicator[idx] != Some(indicator_value) {
                    leds.set_indicator(
                        idx,
                        indicator_value,
                        cfg.has_detent,
                        cfg.indicator_mode,
                        cfg.detent_color,
                    );
                    self.prev_indicator[idx] = Some(indicator_value);
                }
            }
            Phenotype::Switch => {
                if self.prev_color[idx] != Some(color) {
                    leds.set_rgb(idx, color);
                    self.prev_color[idx] = Some(color);
                }
            }
            Phenotype::Disabled => {}
        }

        self.run_animations(
            idx,
            cfg,
            indicator_value,
            color,
            switch_animation,
            indicator_animation,
            bank,
            leds,
        );
    }

    /// Animation arbitration for one position.
    ///
    /// Two ids of the same class fight over one element, so the pair is
    /// suppressed outright: neither runs and neither cache moves. With no
    /// class conflict the indicator buffer's runner takes priority over
    /// the switch buffer's. A buffer that stops (or loses priority) gets
    /// one restore of the element its last id was driving.
    #[allow(clippy::too_many_arguments)]
    fn run_animations<L: Leds>(
        &mut self,
        idx: usize,
        cfg: &EncoderConfig,
        indicator_value: u8,
        color: u8,
        switch_animation: u8,
        indicator_animation: u8,
        bank: u8,
        leds: &mut L,
    ) {
        let switch_class = animation_class(switch_animation);
        let indicator_class = animation_class(indicator_animation);

        if switch_class.is_some() && switch_class == indicator_class {
            return;
        }

        if indicator_class.is_some() {
            leds.run_animation(idx, bank, indicator_animation, color);
            self.prev_indicator_animation[idx] = indicator_animation;
            if self.prev_switch_animation[idx] != 0 {
                restore_element(
                    idx,
                    cfg,
                    indicator_value,
                    color,
                    self.prev_switch_animation[idx],
                    leds,
                );
                self.prev_switch_animation[idx] = 0;
            }
            return;
        }

        if self.prev_indicator_animation[idx] != 0 {
            restore_element(
                idx,
                cfg,
                indicator_value,
                color,
                self.prev_indicator_animation[idx],
                leds,
            );
            self.prev_indicator_animation[idx] = 0;
        }

        if switch_class.is_some() {
            leds.run_animation(idx, bank, switch_animation, color);
            self.prev_switch_animation[idx] = switch_animation;
        } else if self.prev_switch_animation[idx] != 0 {
            restore_element(
                idx,
                cfg,
                indicator_value,
                color,
                self.prev_switch_animation[idx],
                leds,
            );
            self.prev_switch_animation[idx] = 0;
        }
    }
}

impl Default for DisplayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Repaints the element an ended animation was driving.
fn restore_element<L: Leds>(
    idx: usize,
    cfg: &EncoderConfig,
    indicator_value: u8,
    color: u8,
    last_animation: u8,
    leds: &mut L,
) {
    match animation_class(last_animation) {
        Some(AnimationClass::Switch) => leds.set_rgb(idx, color),
        Some(AnimationClass::Indicator) => leds.set_indicator(
            idx,
            indicator_value,
            cfg.has_detent,
            cfg.indicator_mode,
            cfg.detent_color,
        ),
        None => {}
    }
}
