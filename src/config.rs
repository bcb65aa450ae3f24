//! Per-control configuration: the in-RAM field struct, the bit-packed
//! 8-byte persistent record codec, and the page-granular EEPROM
//! operations built on top of it.
//!
//! Every sub-field of the record uses only the low 7 bits of its byte so
//! the record stays valid under the 7-bit-clean transport used for
//! configuration transfer.

use crate::hal::Eeprom;
use crate::{BANKED_ENCODERS, NUM_BANKS, PHYSICAL_ENCODERS};

/// Size of one packed configuration record.
pub const RECORD_SIZE: usize = 8;

/// EEPROM page size; one page holds the records of four controls.
pub const PAGE_SIZE: usize = 32;

/// Records per EEPROM page.
pub const RECORDS_PER_PAGE: usize = PAGE_SIZE / RECORD_SIZE;

/// First EEPROM page of the settings area.
pub const SETTINGS_START_PAGE: u16 = 8;

/// Behavioural role of a control. RAM-only: not part of the persisted
/// record, mutated live over the reconfiguration channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phenotype {
    #[default]
    Rotary,
    Switch,
    Disabled,
}

impl Phenotype {
    pub const COUNT: u8 = 3;

    /// Maps an arbitrary 7-bit value onto a phenotype, modulo the variant
    /// count, so an out-of-range reconfiguration value can never produce
    /// an invalid phenotype.
    pub fn from_index(value: u8) -> Self {
        match value % Self::COUNT {
            0 => Phenotype::Rotary,
            1 => Phenotype::Switch,
            _ => Phenotype::Disabled,
        }
    }
}

/// Encoder movement profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Movement {
    #[default]
    Direct,
    Emulated,
}

impl Movement {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Movement::Emulated,
            _ => Movement::Direct,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Movement::Direct => 0,
            Movement::Emulated => 1,
        }
    }
}

/// Kind of MIDI message a control emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MidiKind {
    Note,
    #[default]
    Cc,
    /// Position-delta semantics; values are never transferred across
    /// banks for this kind.
    RelEnc,
}

impl MidiKind {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MidiKind::Note,
            2 => MidiKind::RelEnc,
            _ => MidiKind::Cc,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MidiKind::Note => 0,
            MidiKind::Cc => 1,
            MidiKind::RelEnc => 2,
        }
    }
}

/// What pressing the encoder switch does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchAction {
    /// Toggle the stored switch state between 0 and 127 and send it.
    #[default]
    CcToggle,
    /// While held, encoder motion runs at the finest sensitivity.
    FineAdjust,
}

impl SwitchAction {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            1 => SwitchAction::FineAdjust,
            _ => SwitchAction::CcToggle,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            SwitchAction::CcToggle => 0,
            SwitchAction::FineAdjust => 1,
        }
    }
}

/// How the indicator LED ring renders the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorMode {
    Dot,
    #[default]
    Bar,
    BlendedBar,
    BlendedDot,
}

impl IndicatorMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => IndicatorMode::Dot,
            1 => IndicatorMode::Bar,
            2 => IndicatorMode::BlendedBar,
            _ => IndicatorMode::BlendedDot,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            IndicatorMode::Dot => 0,
            IndicatorMode::Bar => 1,
            IndicatorMode::BlendedBar => 2,
            IndicatorMode::BlendedDot => 3,
        }
    }
}

/// Configuration of one banked control.
///
/// `switch_channel` and `encoder_channel` are 1-based (1..=16) as the
/// configuration tool presents them; they are stored zero-based in the
/// packed record. `shift_channel` is a raw 0-based wire channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderConfig {
    pub phenotype: Phenotype,
    pub movement: Movement,
    pub has_detent: bool,
    pub detent_color: u8,
    pub active_color: u8,
    pub inactive_color: u8,
    pub indicator_mode: IndicatorMode,
    pub switch_action: SwitchAction,
    pub switch_channel: u8,
    pub switch_number: u8,
    pub encoder_kind: MidiKind,
    pub encoder_channel: u8,
    pub encoder_number: u8,
    /// Shifted-mode wire channel used while the control's shift toggle is
    /// engaged.
    pub shift_channel: u8,
    /// Enables the high-resolution velocity-prefix protocol for CC output.
    pub high_res: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            phenotype: Phenotype::Rotary,
            movement: Movement::Direct,
            has_detent: false,
            detent_color: DEFAULT_DETENT_COLOR,
            active_color: DEFAULT_ACTIVE_COLORS[0],
            inactive_color: DEFAULT_INACTIVE_COLORS[0],
            indicator_mode: IndicatorMode::Bar,
            switch_action: SwitchAction::CcToggle,
            switch_channel: 2,
            switch_number: 0,
            encoder_kind: MidiKind::Cc,
            encoder_channel: 1,
            encoder_number: 0,
            shift_channel: 2,
            high_res: false,
        }
    }
}

/// Factory-default active colors, one per bank.
pub const DEFAULT_ACTIVE_COLORS: [u8; NUM_BANKS] = [51, 77, 25, 101];

/// Factory-default inactive colors, one per bank.
pub const DEFAULT_INACTIVE_COLORS: [u8; NUM_BANKS] = [3, 9, 15, 21];

const DEFAULT_DETENT_COLOR: u8 = 63;

/// Raw value a detented control rests at after boot.
const DETENT_BOOT_VALUE: i16 = 6300;

/// Partial configuration update.
///
/// `None` fields are skipped entirely: their bits in the packed record
/// keep their prior value. This is the typed rendition of the transport's
/// skip sentinel, where any field value >= 0x80 means "leave alone" (see
/// [`sentinel`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigUpdate {
    pub switch_action: Option<u8>,
    pub switch_channel: Option<u8>,
    pub switch_number: Option<u8>,
    pub active_color: Option<u8>,
    pub inactive_color: Option<u8>,
    pub has_detent: Option<u8>,
    pub detent_color: Option<u8>,
    pub indicator_mode: Option<u8>,
    pub movement: Option<u8>,
    pub shift_channel: Option<u8>,
    pub encoder_kind: Option<u8>,
    pub encoder_channel: Option<u8>,
    pub encoder_number: Option<u8>,
    pub high_res: Option<u8>,
}

/// Maps a raw transport field onto an update field: values >= 0x80 are the
/// no-op signal and decode to `None`.
pub fn sentinel(value: u8) -> Option<u8> {
    (value < 0x80).then_some(value)
}

impl ConfigUpdate {
    /// Full update carrying every persisted field of `cfg`.
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self {
            switch_action: Some(cfg.switch_action.to_bits()),
            switch_channel: Some(cfg.switch_channel),
            switch_number: Some(cfg.switch_number),
            active_color: Some(cfg.active_color),
            inactive_color: Some(cfg.inactive_color),
            has_detent: Some(cfg.has_detent as u8),
            detent_color: Some(cfg.detent_color),
            indicator_mode: Some(cfg.indicator_mode.to_bits()),
            movement: Some(cfg.movement.to_bits()),
            shift_channel: Some(cfg.shift_channel),
            encoder_kind: Some(cfg.encoder_kind.to_bits()),
            encoder_channel: Some(cfg.encoder_channel),
            encoder_number: Some(cfg.encoder_number),
            high_res: Some(cfg.high_res as u8),
        }
    }

    /// Patches the packed record in place. Only `Some` fields touch their
    /// designated bits; unrelated bits of shared bytes are preserved.
    pub fn apply_to_record(&self, record: &mut [u8]) {
        debug_assert!(record.len() >= RECORD_SIZE);

        // Byte 0: switch action (low nibble), switch channel (high
        // nibble, stored zero-based).
        if let Some(action) = self.switch_action {
            record[0] = (record[0] & !0x0F) | (action & 0x0F);
        }
        if let Some(channel) = self.switch_channel {
            record[0] = (record[0] & !0xF0) | ((channel.saturating_sub(1) & 0x0F) << 4);
        }

        // Byte 1: switch MIDI number.
        if let Some(number) = self.switch_number {
            record[1] = number & 0x7F;
        }

        // Bytes 2 and 3: active and inactive colors.
        if let Some(color) = self.active_color {
            record[2] = color & 0x7F;
        }
        if let Some(color) = self.inactive_color {
            record[3] = color & 0x7F;
        }

        // Byte 4: detent flag (bit 7) and detent color (bits 0-6).
        if let Some(flag) = self.has_detent {
            record[4] = (record[4] & !0x80) | ((flag & 0x01) << 7);
        }
        if let Some(color) = self.detent_color {
            record[4] = (record[4] & !0x7F) | (color & 0x7F);
        }

        // Byte 5: indicator mode (bits 0-1), movement (bits 2-3),
        // shifted-mode channel (bits 4-7, stored as-is).
        if let Some(mode) = self.indicator_mode {
            record[5] = (record[5] & !0x03) | (mode & 0x03);
        }
        if let Some(movement) = self.movement {
            record[5] = (record[5] & !0x0C) | ((movement & 0x03) << 2);
        }
        if let Some(channel) = self.shift_channel {
            record[5] = (record[5] & !0xF0) | ((channel & 0x0F) << 4);
        }

        // Byte 6: encoder MIDI kind (bits 0-1), encoder channel (bits
        // 4-7, stored zero-based).
        if let Some(kind) = self.encoder_kind {
            record[6] = (record[6] & !0x03) | (kind & 0x03);
        }
        if let Some(channel) = self.encoder_channel {
            record[6] = (record[6] & !0xF0) | ((channel.saturating_sub(1) & 0x0F) << 4);
        }

        // Byte 7: encoder MIDI number (bits 0-6), high-resolution flag
        // (bit 7).
        if let Some(number) = self.encoder_number {
            record[7] = (record[7] & !0x7F) | (number & 0x7F);
        }
        if let Some(flag) = self.high_res {
            record[7] = (record[7] & !0x80) | ((flag & 0x01) << 7);
        }
    }

    /// Applies the update to the in-RAM configuration mirror.
    pub fn apply_to_config(&self, cfg: &mut EncoderConfig) {
        if let Some(action) = self.switch_action {
            cfg.switch_action = SwitchAction::from_bits(action);
        }
        if let Some(channel) = self.switch_channel {
            cfg.switch_channel = channel;
        }
        if let Some(number) = self.switch_number {
            cfg.switch_number = number & 0x7F;
        }
        if let Some(color) = self.active_color {
            cfg.active_color = color & 0x7F;
        }
        if let Some(color) = self.inactive_color {
            cfg.inactive_color = color & 0x7F;
        }
        if let Some(flag) = self.has_detent {
            cfg.has_detent = flag & 0x01 != 0;
        }
        if let Some(color) = self.detent_color {
            cfg.detent_color = color & 0x7F;
        }
        if let Some(mode) = self.indicator_mode {
            cfg.indicator_mode = IndicatorMode::from_bits(mode);
        }
        if let Some(movement) = self.movement {
            cfg.movement = Movement::from_bits(movement);
        }
        if let Some(channel) = self.shift_channel {
            cfg.shift_channel = channel & 0x0F;
        }
        if let Some(kind) = self.encoder_kind {
            cfg.encoder_kind = MidiKind::from_bits(kind);
        }
        if let Some(channel) = self.encoder_channel {
            cfg.encoder_channel = channel;
        }
        if let Some(number) = self.encoder_number {
            cfg.encoder_number = number & 0x7F;
        }
        if let Some(flag) = self.high_res {
            cfg.high_res = flag & 0x01 != 0;
        }
    }
}

/// Expands a packed record. All sub-fields are decoded unconditionally;
/// the phenotype is not persisted and comes back as its default.
pub fn decode_record(record: &[u8; RECORD_SIZE]) -> EncoderConfig {
    EncoderConfig {
        phenotype: Phenotype::default(),
        switch_action: SwitchAction::from_bits(record[0] & 0x0F),
        switch_channel: ((record[0] >> 4) & 0x0F) + 1,
        switch_number: record[1] & 0x7F,
        active_color: record[2] & 0x7F,
        inactive_color: record[3] & 0x7F,
        detent_color: record[4] & 0x7F,
        has_detent: (record[4] >> 7) & 0x01 != 0,
        indicator_mode: IndicatorMode::from_bits(record[5] & 0x03),
        movement: Movement::from_bits((record[5] >> 2) & 0x03),
        shift_channel: (record[5] >> 4) & 0x0F,
        encoder_kind: MidiKind::from_bits(record[6] & 0x03),
        encoder_channel: ((record[6] >> 4) & 0x0F) + 1,
        encoder_number: record[7] & 0x7F,
        high_res: (record[7] >> 7) & 0x01 != 0,
    }
}

/// Packs a full configuration into its record form.
pub fn encode_record(cfg: &EncoderConfig) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    ConfigUpdate::from_config(cfg).apply_to_record(&mut record);
    record
}

/// EEPROM address of one control's record: base + bank*128 + control*8.
pub fn record_addr(bank: usize, encoder: usize) -> u16 {
    SETTINGS_START_PAGE * PAGE_SIZE as u16
        + (bank * PHYSICAL_ENCODERS * RECORD_SIZE) as u16
        + (encoder * RECORD_SIZE) as u16
}

/// EEPROM page holding one control's record.
pub fn page_index(bank: usize, encoder: usize) -> u16 {
    SETTINGS_START_PAGE + (RECORDS_PER_PAGE * bank) as u16 + (encoder / RECORDS_PER_PAGE) as u16
}

fn page_addr(page: u16) -> u16 {
    page * PAGE_SIZE as u16
}

/// Reads the whole settings area into a RAM table.
///
/// EEPROM access shares a resource with the feedback-delivery interrupt,
/// so every driver call runs inside a critical section.
pub fn load_settings<E: Eeprom>(eeprom: &mut E) -> [EncoderConfig; BANKED_ENCODERS] {
    let mut settings = [EncoderConfig::default(); BANKED_ENCODERS];
    for (id, slot) in settings.iter_mut().enumerate() {
        let bank = id / PHYSICAL_ENCODERS;
        let encoder = id % PHYSICAL_ENCODERS;
        let mut record = [0u8; RECORD_SIZE];
        critical_section::with(|_| eeprom.read(record_addr(bank, encoder), &mut record));
        *slot = decode_record(&record);
    }
    settings
}

/// Persists a partial update for one control.
///
/// Each page holds four controls' records, so the enclosing page is read,
/// patched and written back whole; a bare partial write would corrupt the
/// sibling records.
pub fn save_record<E: Eeprom>(eeprom: &mut E, bank: usize, encoder: usize, update: &ConfigUpdate) {
    let page = page_index(bank, encoder);
    let mut buffer = [0u8; PAGE_SIZE];
    critical_section::with(|_| eeprom.read(page_addr(page), &mut buffer));

    let offset = (encoder % RECORDS_PER_PAGE) * RECORD_SIZE;
    update.apply_to_record(&mut buffer[offset..offset + RECORD_SIZE]);

    critical_section::with(|_| eeprom.write_page(page, &buffer));
}

/// Rewrites the whole settings area with factory defaults.
///
/// Colors are fixed per bank; switch and encoder MIDI numbers increase by
/// +4 per successive group of four controls so every control gets a
/// distinct mapping out of the box.
pub fn factory_reset<E: Eeprom>(eeprom: &mut E) {
    #[cfg(feature = "defmt")]
    defmt::info!("factory reset: rewriting encoder settings");

    let template = EncoderConfig::default();
    let pages = NUM_BANKS * (PHYSICAL_ENCODERS / RECORDS_PER_PAGE);

    for page in 0..pages {
        let bank = page / RECORDS_PER_PAGE;
        let mut buffer = [0u8; PAGE_SIZE];
        for slot in 0..RECORDS_PER_PAGE {
            let mut cfg = template;
            cfg.active_color = DEFAULT_ACTIVE_COLORS[bank];
            cfg.inactive_color = DEFAULT_INACTIVE_COLORS[bank];
            let number = (page * RECORDS_PER_PAGE + slot) as u8;
            cfg.switch_number = number;
            cfg.encoder_number = number;
            let record = encode_record(&cfg);
            buffer[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE].copy_from_slice(&record);
        }
        critical_section::with(|_| {
            eeprom.write_page(SETTINGS_START_PAGE + page as u16, &buffer)
        });
    }
}

/// Boot-time raw values: detented controls rest near the centre, all
/// others at zero. Shifted slots mirror their unshifted counterpart.
pub fn initial_raw_values(
    settings: &[EncoderConfig; BANKED_ENCODERS],
) -> [i16; crate::VIRTUAL_ENCODERS] {
    let mut raw = [0i16; crate::VIRTUAL_ENCODERS];
    for (id, cfg) in settings.iter().enumerate() {
        if cfg.has_detent {
            raw[id] = DETENT_BOOT_VALUE;
            raw[id + BANKED_ENCODERS] = DETENT_BOOT_VALUE;
        }
    }
    raw
}
