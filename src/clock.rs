//! Provides the tempo/grid arithmetic shared by the quantizer and the swing engine.
//!
//! Event positions are plain `u32` milliseconds or MIDI ticks supplied by the caller's clock, which
//! keeps the math deterministic and host-testable; only *configured* time spans use
//! [`embassy_time::Duration`].

use num_derive::{FromPrimitive, ToPrimitive};

use crate::configuration::CycleConfig;

/// Tempo in beats per minute, clamped to 20-300 on construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tempo(u16);

impl Default for Tempo {
    fn default() -> Self {
        Self(120)
    }
}

impl Tempo {
    /// Slowest supported tempo.
    pub const MIN_BPM: u16 = 20;
    /// Fastest supported tempo.
    pub const MAX_BPM: u16 = 300;

    /// Constructs a [`Tempo`], clamping out-of-range values.
    pub fn new(bpm: u16) -> Self {
        Self(bpm.clamp(Self::MIN_BPM, Self::MAX_BPM))
    }

    /// Getter.
    pub fn bpm(&self) -> u16 {
        self.0
    }

    /// Duration of one quarter note in whole milliseconds.
    pub fn ms_per_quarter(&self) -> u32 {
        60_000 / u32::from(self.0)
    }
}

/// Clock resolution in MIDI ticks (pulses) per quarter note.
///
/// Zero is not a meaningful resolution; constructing from zero falls back to the default of 96.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ppqn(u16);

impl Default for Ppqn {
    fn default() -> Self {
        Self(96)
    }
}

impl Ppqn {
    /// Constructs a [`Ppqn`]; zero yields the default resolution.
    pub fn new(ticks: u16) -> Self {
        if ticks == 0 { Self::default() } else { Self(ticks) }
    }

    /// Getter.
    pub fn ticks(&self) -> u16 {
        self.0
    }
}

/// A musical grid resolution.
///
/// The straight and triplet subdivisions of a quarter note, down to a sixty-fourth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    /// Quarter note.
    Quarter,
    /// Eighth note.
    Eighth,
    /// Eighth-note triplet.
    EighthTriplet,
    /// Sixteenth note.
    Sixteenth,
    /// Sixteenth-note triplet.
    SixteenthTriplet,
    /// Thirty-second note.
    ThirtySecond,
    /// Thirty-second-note triplet.
    ThirtySecondTriplet,
    /// Sixty-fourth note.
    SixtyFourth,
}

impl CycleConfig for Resolution {}

impl Resolution {
    /// How many grid cells of this resolution fit in one quarter note.
    pub fn divisor(&self) -> u32 {
        match self {
            Self::Quarter => 1,
            Self::Eighth => 2,
            Self::EighthTriplet => 3,
            Self::Sixteenth => 4,
            Self::SixteenthTriplet => 6,
            Self::ThirtySecond => 8,
            Self::ThirtySecondTriplet => 12,
            Self::SixtyFourth => 16,
        }
    }

    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Quarter => "1/4",
            Self::Eighth => "1/8",
            Self::EighthTriplet => "1/8T",
            Self::Sixteenth => "1/16",
            Self::SixteenthTriplet => "1/16T",
            Self::ThirtySecond => "1/32",
            Self::ThirtySecondTriplet => "1/32T",
            Self::SixtyFourth => "1/64",
        }
    }
}

/// A tempo paired with a tick resolution; converts grid resolutions into milliseconds and ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiClock {
    /// The tempo the grid is derived from.
    pub tempo: Tempo,
    /// Ticks per quarter note.
    pub ppqn: Ppqn,
}

impl MidiClock {
    /// Width of one grid cell in whole milliseconds.
    pub fn ms_per_grid(&self, resolution: Resolution) -> u32 {
        self.tempo.ms_per_quarter() / resolution.divisor()
    }

    /// Width of one grid cell in MIDI ticks.
    pub fn ticks_per_grid(&self, resolution: Resolution) -> u32 {
        u32::from(self.ppqn.ticks()) / resolution.divisor()
    }

    /// Duration of one MIDI tick in whole milliseconds.
    pub fn ms_per_tick(&self) -> u32 {
        self.tempo.ms_per_quarter() / u32::from(self.ppqn.ticks())
    }
}
