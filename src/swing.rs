//! Shifts events off the grid to give a track a groove.
//!
//! A groove is a 16-step pattern of timing values (50 = on the grid, above = late, below = early).
//! The engine looks up the step for the event's subdivision, scales it by the swing amount and
//! depth, and returns a millisecond offset the scheduler adds to the event's play time. The offset
//! is capped at a quarter of the subdivision so extreme settings stay musical.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::clock::{Ppqn, Tempo};
use crate::configuration::CycleConfig;

/// Steps in a groove pattern.
pub const PATTERN_STEPS: usize = 16;

const NEUTRAL: u8 = 50;

const STRAIGHT: [u8; PATTERN_STEPS] = [NEUTRAL; PATTERN_STEPS];
// classic swing: off-beats land 66% through the pair
const SWING: [u8; PATTERN_STEPS] = [50, 66, 50, 66, 50, 66, 50, 66, 50, 66, 50, 66, 50, 66, 50, 66];
const SHUFFLE: [u8; PATTERN_STEPS] = [50, 75, 50, 75, 50, 75, 50, 75, 50, 75, 50, 75, 50, 75, 50, 75];
const TRIPLET: [u8; PATTERN_STEPS] = [50, 67, 50, 67, 50, 67, 50, 67, 50, 67, 50, 67, 50, 67, 50, 67];
const DOTTED: [u8; PATTERN_STEPS] = [50, 62, 50, 62, 50, 62, 50, 62, 50, 62, 50, 62, 50, 62, 50, 62];
// half-time shuffle: only the backbeats (steps 3 and 11) drag
const HALF_TIME: [u8; PATTERN_STEPS] = [50, 50, 50, 75, 50, 50, 50, 50, 50, 50, 50, 75, 50, 50, 50, 50];

/// Groove template selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Groove {
    /// No groove.
    #[default]
    Straight,
    /// Classic swing, off-beats at 66%.
    Swing,
    /// Heavy shuffle, off-beats at 75%.
    Shuffle,
    /// Triplet feel.
    Triplet,
    /// Dotted-eighth feel.
    Dotted,
    /// Half-time shuffle; only the backbeats drag.
    HalfTime,
    /// The user-supplied pattern.
    Custom,
}

impl CycleConfig for Groove {}

impl Groove {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Straight => "Straight",
            Self::Swing => "Swing",
            Self::Shuffle => "Shuffle",
            Self::Triplet => "Triplet",
            Self::Dotted => "Dotted",
            Self::HalfTime => "Half-Time",
            Self::Custom => "Custom",
        }
    }
}

/// The note value one groove step spans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subdivision {
    /// Eighth notes.
    Eighth,
    /// Sixteenth notes.
    #[default]
    Sixteenth,
    /// Thirty-second notes.
    ThirtySecond,
}

impl CycleConfig for Subdivision {}

impl Subdivision {
    /// How many subdivisions fit in one quarter note.
    pub fn divisor(&self) -> u32 {
        match self {
            Self::Eighth => 2,
            Self::Sixteenth => 4,
            Self::ThirtySecond => 8,
        }
    }

    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Eighth => "8th",
            Self::Sixteenth => "16th",
            Self::ThirtySecond => "32nd",
        }
    }
}

/// Error returned for a custom pattern that is empty or longer than [`PATTERN_STEPS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidPattern;

/// Per-track groove engine.
#[derive(Clone, Debug)]
pub struct Swing {
    enabled: bool,
    /// 0-100 intensity multiplier; 50 plays the pattern as written.
    amount: u8,
    groove: Groove,
    subdivision: Subdivision,
    /// 0-100 percentage of the pattern's push that is actually applied.
    depth: u8,
    custom: [u8; PATTERN_STEPS],
    custom_len: usize,
    tempo: Tempo,
}

impl Default for Swing {
    fn default() -> Self {
        Self::new(Tempo::default())
    }
}

impl Swing {
    /// Constructs a groove engine with factory defaults: disabled, Straight, sixteenth-note steps,
    /// neutral amount, full depth.
    pub fn new(tempo: Tempo) -> Self {
        Self {
            enabled: false,
            amount: NEUTRAL,
            groove: Groove::Straight,
            subdivision: Subdivision::Sixteenth,
            depth: 100,
            custom: [NEUTRAL; PATTERN_STEPS],
            custom_len: 0,
            tempo,
        }
    }

    /// Millisecond offset for an event at `tick_position` on a transport running at `ppqn`.
    pub fn offset_at_tick(&self, tick_position: u32, ppqn: Ppqn) -> i32 {
        let ticks_per_sub = u32::from(ppqn.ticks()) / self.subdivision.divisor();
        if ticks_per_sub == 0 {
            return 0;
        }
        self.offset_at_step((tick_position / ticks_per_sub) as usize % PATTERN_STEPS)
    }

    /// Millisecond offset for an event at `time_ms` on the engine's own tempo.
    pub fn offset_at_ms(&self, time_ms: u32) -> i32 {
        let ms_per_sub = self.ms_per_subdivision();
        if ms_per_sub == 0 {
            return 0;
        }
        self.offset_at_step((time_ms / ms_per_sub) as usize % PATTERN_STEPS)
    }

    fn offset_at_step(&self, step: usize) -> i32 {
        if !self.enabled {
            return 0;
        }
        if self.amount == NEUTRAL && self.groove == Groove::Straight {
            return 0;
        }

        let base = i32::from(self.pattern_value(step)) - i32::from(NEUTRAL);
        let scaled = base * i32::from(self.amount) / 50 * i32::from(self.depth) / 100;

        // map the -50..=50 pattern scale onto at most a quarter of the subdivision
        let max_offset = (self.ms_per_subdivision() / 4) as i32;
        (scaled * max_offset / 50).clamp(-max_offset, max_offset)
    }

    fn pattern_value(&self, step: usize) -> u8 {
        match self.groove {
            Groove::Straight => STRAIGHT[step],
            Groove::Swing => SWING[step],
            Groove::Shuffle => SHUFFLE[step],
            Groove::Triplet => TRIPLET[step],
            Groove::Dotted => DOTTED[step],
            Groove::HalfTime => HALF_TIME[step],
            Groove::Custom => {
                if self.custom_len == 0 {
                    NEUTRAL
                } else {
                    self.custom[step % self.custom_len]
                }
            }
        }
    }

    fn ms_per_subdivision(&self) -> u32 {
        self.tempo.ms_per_quarter() / self.subdivision.divisor()
    }

    /// Getter.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Setter.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Getter.
    pub fn amount(&self) -> u8 {
        self.amount
    }

    /// Sets the swing intensity, clamped to 100. 50 plays the pattern as written.
    pub fn set_amount(&mut self, amount: u8) {
        self.amount = amount.min(100);
    }

    /// Getter.
    pub fn groove(&self) -> Groove {
        self.groove
    }

    /// Setter.
    pub fn set_groove(&mut self, groove: Groove) {
        self.groove = groove;
    }

    /// Getter.
    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    /// Setter.
    pub fn set_subdivision(&mut self, subdivision: Subdivision) {
        self.subdivision = subdivision;
    }

    /// Getter.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Sets how much of the pattern's push is applied, clamped to 100 percent.
    pub fn set_depth(&mut self, depth: u8) {
        self.depth = depth.min(100);
    }

    /// Getter.
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Setter.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
    }

    /// The user pattern [`Groove::Custom`] plays, empty until one has been set.
    pub fn custom_pattern(&self) -> &[u8] {
        &self.custom[..self.custom_len]
    }

    /// Installs a custom pattern of 1 to [`PATTERN_STEPS`] steps. Values are clamped to 100 and
    /// unset trailing steps are neutral.
    pub fn set_custom_pattern(&mut self, pattern: &[u8]) -> Result<(), InvalidPattern> {
        if pattern.is_empty() || pattern.len() > PATTERN_STEPS {
            return Err(InvalidPattern);
        }

        for (slot, &value) in self.custom.iter_mut().zip(pattern) {
            *slot = value.min(100);
        }
        self.custom[pattern.len()..].fill(NEUTRAL);
        self.custom_len = pattern.len();
        Ok(())
    }
}
