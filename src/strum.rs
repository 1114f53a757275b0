//! Staggers chord notes to simulate guitar or harp strumming.
//!
//! The chord detector hands each note on to [`Strum::process_note`] together with the full chord
//! (sorted low to high). The strum decides how long to hold the note back and how to ramp its
//! velocity; the caller schedules the delayed send. Total strum time is spread evenly across the
//! chord, so a 3-note chord at 60 ms plays at 0, 30 and 60 ms offsets.

use embassy_time::Duration;
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::{Note, U7, Velocity};

use crate::configuration::CycleConfig;
use crate::rng::Rng;

/// Largest chord the strum will spread; bigger chords pass through unstrummed.
pub const MAX_CHORD_NOTES: usize = 8;

/// Upper bound on the total strum time.
pub const MAX_TIME: Duration = Duration::from_millis(200);

/// Which end of the chord sounds first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Low to high, like a guitar upstroke.
    Up,
    /// High to low, like a guitar downstroke.
    #[default]
    Down,
    /// Alternates up and down on successive chords.
    UpDown,
    /// Each note lands at a random position in the strum.
    Random,
}

impl CycleConfig for Direction {}

impl Direction {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::UpDown => "Up-Down",
            Self::Random => "Random",
        }
    }
}

/// How velocity changes across the strum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ramp {
    /// Every note keeps its original velocity.
    #[default]
    None,
    /// Later notes play louder.
    Increase,
    /// Later notes play softer.
    Decrease,
}

impl CycleConfig for Ramp {}

impl Ramp {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Increase => "Increase",
            Self::Decrease => "Decrease",
        }
    }
}

/// The strum's verdict for one chord note: hold it back this long, send it this loud.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strummed {
    /// How long the caller should delay the note on.
    pub delay: Duration,
    /// Velocity after ramping.
    pub velocity: Velocity,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Strummed {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Strummed {{ delay: {}ms, vel: {} }}",
            self.delay.as_millis(),
            u8::from(self.velocity)
        );
    }
}

/// Per-track strum effect.
#[derive(Clone, Debug)]
pub struct Strum {
    enabled: bool,
    /// Total time from the first chord note to the last.
    time: Duration,
    direction: Direction,
    ramp: Ramp,
    /// 0-100, percentage of the original velocity the ramp may add or remove.
    ramp_amount: u8,
    /// Alternation state for [`Direction::UpDown`].
    last_direction_was_up: bool,
    rng: Rng,
}

impl Default for Strum {
    fn default() -> Self {
        Self::new()
    }
}

impl Strum {
    /// Constructs a strum with factory defaults: disabled, 30 ms downstroke, no velocity ramp.
    pub fn new() -> Self {
        Self {
            enabled: false,
            time: Duration::from_millis(30),
            direction: Direction::Down,
            ramp: Ramp::None,
            ramp_amount: 20,
            last_direction_was_up: false,
            rng: Rng::default(),
        }
    }

    /// Reseeds the random number generator behind [`Direction::Random`].
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Rng::from_seed(seed);
    }

    /// Places one note of a chord in the strum.
    ///
    /// `chord` is the whole chord the note belongs to, sorted low to high. Pass-through (zero
    /// delay, unchanged velocity) when disabled, for single-note chords, for chords larger than
    /// [`MAX_CHORD_NOTES`] and for empty chords. A note missing from `chord` is treated as its
    /// first member.
    pub fn process_note(&mut self, note: Note, velocity: Velocity, chord: &[Note]) -> Strummed {
        let passthrough = Strummed {
            delay: Duration::from_millis(0),
            velocity,
        };

        if !self.enabled || chord.is_empty() || chord.len() > MAX_CHORD_NOTES || chord.len() == 1 {
            return passthrough;
        }

        let note_index = chord.iter().position(|&member| member == note).unwrap_or(0);
        let last_index = chord.len() - 1;

        let effective_index = match self.direction {
            Direction::Up => note_index,
            Direction::Down => last_index - note_index,
            Direction::UpDown => {
                let index = if self.last_direction_was_up {
                    last_index - note_index
                } else {
                    note_index
                };
                if note_index == last_index {
                    self.last_direction_was_up = !self.last_direction_was_up;
                }
                index
            }
            Direction::Random => self.rng.next_index(chord.len()),
        };

        let delay_ms = self.time.as_millis() * effective_index as u64 / last_index as u64;

        Strummed {
            delay: Duration::from_millis(delay_ms),
            velocity: ramped_velocity(
                velocity,
                effective_index,
                chord.len(),
                self.ramp,
                self.ramp_amount,
            ),
        }
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
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Sets the total strum time, clamped to [`MAX_TIME`].
    pub fn set_time(&mut self, time: Duration) {
        self.time = if time > MAX_TIME { MAX_TIME } else { time };
    }

    /// Getter.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Setter.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Getter.
    pub fn ramp(&self) -> Ramp {
        self.ramp
    }

    /// Setter.
    pub fn set_ramp(&mut self, ramp: Ramp) {
        self.ramp = ramp;
    }

    /// Getter.
    pub fn ramp_amount(&self) -> u8 {
        self.ramp_amount
    }

    /// Sets the ramp amount, clamped to 100.
    pub fn set_ramp_amount(&mut self, amount: u8) {
        self.ramp_amount = amount.min(100);
    }

    /// Clears the up/down alternation state. Call when switching patches or reconfiguring.
    pub fn reset(&mut self) {
        self.last_direction_was_up = false;
    }
}

/// Spreads the ramp symmetrically around the original velocity: the strum starts `amount` percent
/// below (or above) it and ends the same distance on the other side.
fn ramped_velocity(
    velocity: Velocity,
    index: usize,
    chord_size: usize,
    ramp: Ramp,
    amount: u8,
) -> Velocity {
    if ramp == Ramp::None || chord_size <= 1 {
        return velocity;
    }

    let original = i16::from(u8::from(velocity));
    let max_change = original * i16::from(amount) / 100;
    let step = max_change * 2 / (chord_size as i16 - 1);
    let index = index as i16;

    let ramped = match ramp {
        Ramp::Increase => original - max_change + step * index,
        Ramp::Decrease => original + max_change - step * index,
        Ramp::None => original,
    };

    U7::from_u8_lossy(ramped.clamp(1, 127) as u8)
}
