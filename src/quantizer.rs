//! Snaps note timing onto a tempo grid.
//!
//! The quantizer never emits anything itself. Note ons are parked in a small pending buffer with a
//! precomputed quantized timestamp; the track's scheduler polls [`Quantizer::ready_notes`] from its
//! timer task and plays whatever has come due. All positions are `u32` milliseconds (or MIDI
//! ticks) on the caller's transport clock.

use embassy_time::Duration;
use num_derive::{FromPrimitive, ToPrimitive};
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, U7};

use crate::clock::{MidiClock, Ppqn, Resolution, Tempo};
use crate::configuration::CycleConfig;

/// Capacity of the pending-note buffer.
pub const MAX_PENDING_NOTES: usize = 16;

const MAX_LOOKAHEAD: Duration = Duration::from_millis(500);

/// Where a note that falls between grid points gets pulled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LateMode {
    /// Snap to whichever neighboring grid point is closer; exact midpoints snap forward.
    #[default]
    Nearest,
    /// Always delay to the next grid point.
    Forward,
    /// Always pull back to the previous grid point.
    Backward,
    /// No snapping; timestamps pass through unchanged.
    Off,
}

impl CycleConfig for LateMode {}

impl LateMode {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Nearest => "Nearest",
            Self::Forward => "Forward",
            Self::Backward => "Backward",
            Self::Off => "Off",
        }
    }
}

/// Why a note on was not buffered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejected {
    /// The quantizer is disabled; the caller should play the note immediately.
    Disabled,
    /// The pending buffer is full; the caller should play the note immediately rather than lose it.
    BufferFull,
}

/// A note on waiting for its quantized timestamp to come due.
///
/// Implements [`Default`] because [`tinyvec`] requires that items stored in an `ArrayVec` do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingNote {
    note: Note,
    velocity: U7,
    channel: Channel,
    original_ms: u32,
    quantized_ms: u32,
}

impl Default for PendingNote {
    fn default() -> Self {
        Self {
            note: Note::from(U7::from_u8_lossy(0)),
            velocity: U7::from_u8_lossy(0),
            channel: Channel::Ch1,
            original_ms: 0,
            quantized_ms: 0,
        }
    }
}

impl PendingNote {
    /// Getter.
    pub fn note(&self) -> Note {
        self.note
    }

    /// Getter.
    pub fn velocity(&self) -> U7 {
        self.velocity
    }

    /// Getter.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// When the note was performed.
    pub fn original_ms(&self) -> u32 {
        self.original_ms
    }

    /// When the note should sound.
    pub fn quantized_ms(&self) -> u32 {
        self.quantized_ms
    }
}

/// Per-track timing quantizer.
#[derive(Clone, Debug)]
pub struct Quantizer {
    enabled: bool,
    clock: MidiClock,
    resolution: Resolution,
    /// 0 leaves timing untouched, 100 snaps fully onto the grid.
    strength: u8,
    /// How far ahead of the transport the scheduler may pull ready notes.
    lookahead: Duration,
    late_mode: LateMode,
    /// 50 is straight; other values shift odd-numbered grid cells by up to one grid interval.
    swing: u8,
    pending: ArrayVec<[PendingNote; MAX_PENDING_NOTES]>,
    quantized_count: u32,
    offset_sum_ms: i64,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new(MidiClock::default())
    }
}

impl Quantizer {
    /// Constructs a quantizer with factory defaults: disabled, 1/16 grid, full strength, 50 ms
    /// look-ahead, Nearest late mode, straight swing.
    pub fn new(clock: MidiClock) -> Self {
        Self {
            enabled: false,
            clock,
            resolution: Resolution::Sixteenth,
            strength: 100,
            lookahead: Duration::from_millis(50),
            late_mode: LateMode::Nearest,
            swing: 50,
            pending: ArrayVec::new(),
            quantized_count: 0,
            offset_sum_ms: 0,
        }
    }

    /// Parks a note on in the pending buffer with its quantized timestamp.
    ///
    /// On `Err` the note was not buffered and should be played immediately.
    pub fn buffer_note(
        &mut self,
        note: Note,
        velocity: U7,
        channel: Channel,
        time_ms: u32,
    ) -> Result<(), Rejected> {
        if !self.enabled {
            return Err(Rejected::Disabled);
        }
        if self.pending.len() == self.pending.capacity() {
            return Err(Rejected::BufferFull);
        }

        let quantized_ms = self.quantize_ms(time_ms);
        self.pending.push(PendingNote {
            note,
            velocity,
            channel,
            original_ms: time_ms,
            quantized_ms,
        });

        self.quantized_count += 1;
        self.offset_sum_ms += i64::from(quantized_ms) - i64::from(time_ms);
        Ok(())
    }

    /// [`Self::buffer_note`] for callers tracking the transport in MIDI ticks.
    pub fn buffer_note_at_tick(
        &mut self,
        note: Note,
        velocity: U7,
        channel: Channel,
        tick_position: u32,
    ) -> Result<(), Rejected> {
        let time_ms = tick_position * self.clock.ms_per_tick();
        self.buffer_note(note, velocity, channel, time_ms)
    }

    /// Removes and returns every pending note whose quantized timestamp is at or before `now_ms`,
    /// in the order the notes were buffered.
    pub fn ready_notes(&mut self, now_ms: u32) -> ArrayVec<[PendingNote; MAX_PENDING_NOTES]> {
        let mut ready = ArrayVec::new();
        self.pending.retain(|note| {
            if note.quantized_ms <= now_ms {
                ready.push(*note);
                false
            } else {
                true
            }
        });
        ready
    }

    /// Quantizes a millisecond position per the current configuration. Identity when disabled,
    /// at zero strength, or in [`LateMode::Off`].
    pub fn quantize_ms(&self, time_ms: u32) -> u32 {
        if !self.enabled || self.strength == 0 {
            return time_ms;
        }

        let snapped = match self.late_mode {
            LateMode::Nearest => self.nearest_grid_ms(time_ms),
            LateMode::Forward => self.next_grid_ms(time_ms),
            LateMode::Backward => self.prev_grid_ms(time_ms),
            LateMode::Off => return time_ms,
        };

        self.blend(time_ms, snapped)
    }

    /// Quantizes a MIDI tick position; same math as [`Self::quantize_ms`] in tick units.
    pub fn quantize_ticks(&self, tick_position: u32) -> u32 {
        if !self.enabled || self.strength == 0 {
            return tick_position;
        }

        let interval = self.clock.ticks_per_grid(self.resolution);
        if interval == 0 {
            return tick_position;
        }

        let cell = tick_position / interval;
        let prev = cell * interval;
        let next = prev + interval;

        let snapped = match self.late_mode {
            LateMode::Nearest => {
                if tick_position - prev < next - tick_position {
                    self.swung(prev, cell, interval)
                } else {
                    self.swung(next, cell + 1, interval)
                }
            }
            LateMode::Forward => self.swung(next, cell + 1, interval),
            LateMode::Backward => self.swung(prev, cell, interval),
            LateMode::Off => return tick_position,
        };

        self.blend(tick_position, snapped)
    }

    /// Signed correction [`Self::quantize_ms`] would apply at `time_ms`.
    pub fn offset_ms(&self, time_ms: u32) -> i32 {
        self.quantize_ms(time_ms) as i32 - time_ms as i32
    }

    /// The first grid point strictly after `time_ms`, swing included. Ignores enable and strength.
    pub fn next_grid_ms(&self, time_ms: u32) -> u32 {
        let interval = self.clock.ms_per_grid(self.resolution);
        if interval == 0 {
            return time_ms;
        }
        let cell = time_ms / interval + 1;
        self.swung(cell * interval, cell, interval)
    }

    /// The grid point at or before `time_ms`, swing included. Ignores enable and strength.
    pub fn prev_grid_ms(&self, time_ms: u32) -> u32 {
        let interval = self.clock.ms_per_grid(self.resolution);
        if interval == 0 {
            return time_ms;
        }
        let cell = time_ms / interval;
        self.swung(cell * interval, cell, interval)
    }

    /// Width of one grid cell in milliseconds at the current resolution and tempo.
    pub fn grid_interval_ms(&self) -> u32 {
        self.clock.ms_per_grid(self.resolution)
    }

    /// Width of one grid cell in MIDI ticks at the current resolution.
    pub fn grid_interval_ticks(&self) -> u32 {
        self.clock.ticks_per_grid(self.resolution)
    }

    /// Returns `true` if `time_ms` lies within `tolerance_ms` of the nearest (swung) grid point.
    pub fn is_on_grid(&self, time_ms: u32, tolerance_ms: u16) -> bool {
        let nearest = self.nearest_grid_ms(time_ms);
        time_ms.abs_diff(nearest) <= u32::from(tolerance_ms)
    }

    fn nearest_grid_ms(&self, time_ms: u32) -> u32 {
        let interval = self.clock.ms_per_grid(self.resolution);
        if interval == 0 {
            return time_ms;
        }

        let cell = time_ms / interval;
        let prev = cell * interval;
        let next = prev + interval;

        if time_ms - prev < next - time_ms {
            self.swung(prev, cell, interval)
        } else {
            self.swung(next, cell + 1, interval)
        }
    }

    /// Shifts odd-numbered grid cells by the swing amount; even cells (down-beats) stay put.
    fn swung(&self, grid_ms: u32, cell: u32, interval: u32) -> u32 {
        if self.swing == 50 || cell % 2 == 0 {
            return grid_ms;
        }
        let offset = (i32::from(self.swing) - 50) * interval as i32 / 100;
        // a negative swing cannot shift a grid point before the start of the timeline
        (i64::from(grid_ms) + i64::from(offset)).max(0) as u32
    }

    /// Linear interpolation between the performed and snapped position by `strength` percent.
    fn blend(&self, original: u32, snapped: u32) -> u32 {
        if self.strength >= 100 {
            return snapped;
        }
        let offset = (i64::from(snapped) - i64::from(original)) * i64::from(self.strength) / 100;
        (i64::from(original) + offset) as u32
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
    pub fn tempo(&self) -> Tempo {
        self.clock.tempo
    }

    /// Setter.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.clock.tempo = tempo;
    }

    /// Getter.
    pub fn ppqn(&self) -> Ppqn {
        self.clock.ppqn
    }

    /// Setter.
    pub fn set_ppqn(&mut self, ppqn: Ppqn) {
        self.clock.ppqn = ppqn;
    }

    /// Getter.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Setter.
    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    /// Getter.
    pub fn strength(&self) -> u8 {
        self.strength
    }

    /// Sets the quantize strength in percent, clamped to 100.
    pub fn set_strength(&mut self, strength: u8) {
        self.strength = strength.min(100);
    }

    /// Getter.
    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    /// Sets the scheduler look-ahead window, clamped to 500 ms.
    pub fn set_lookahead(&mut self, window: Duration) {
        self.lookahead = if window > MAX_LOOKAHEAD {
            MAX_LOOKAHEAD
        } else {
            window
        };
    }

    /// Getter.
    pub fn late_mode(&self) -> LateMode {
        self.late_mode
    }

    /// Setter.
    pub fn set_late_mode(&mut self, mode: LateMode) {
        self.late_mode = mode;
    }

    /// Getter.
    pub fn swing(&self) -> u8 {
        self.swing
    }

    /// Sets the swing amount, clamped to 100. 50 is straight.
    pub fn set_swing(&mut self, swing: u8) {
        self.swing = swing.min(100);
    }

    /// Number of notes currently waiting in the buffer.
    pub fn buffered_count(&self) -> usize {
        self.pending.len()
    }

    /// Total notes quantized since construction.
    pub fn quantized_count(&self) -> u32 {
        self.quantized_count
    }

    /// Mean signed correction applied across all quantized notes, in milliseconds.
    pub fn average_offset_ms(&self) -> i32 {
        if self.quantized_count == 0 {
            return 0;
        }
        (self.offset_sum_ms / i64::from(self.quantized_count)) as i32
    }

    /// Drops all pending notes. Settings and statistics are kept.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORTE: U7 = U7::from_u8_lossy(100);

    fn enabled_quantizer() -> Quantizer {
        // 120 BPM, 96 PPQN, 1/16 grid: one cell every 125 ms / 24 ticks
        let mut quantizer = Quantizer::default();
        quantizer.set_enabled(true);
        quantizer
    }

    #[test]
    fn factory_defaults() {
        let quantizer = Quantizer::default();

        assert!(!quantizer.is_enabled());
        assert_eq!(
            Resolution::Sixteenth,
            quantizer.resolution(),
            "Expected left but got right"
        );
        assert_eq!(100, quantizer.strength(), "Expected left but got right");
        assert_eq!(
            Duration::from_millis(50),
            quantizer.lookahead(),
            "Expected left but got right"
        );
        assert_eq!(LateMode::Nearest, quantizer.late_mode(), "Expected left but got right");
        assert_eq!(50, quantizer.swing(), "Expected left but got right");
        assert_eq!(125, quantizer.grid_interval_ms(), "Expected left but got right");
        assert_eq!(24, quantizer.grid_interval_ticks(), "Expected left but got right");
    }

    #[test]
    fn full_strength_snaps_exactly_onto_the_grid() {
        let mut quantizer = enabled_quantizer();

        assert_eq!(125, quantizer.quantize_ms(130), "Expected left but got right");
        assert_eq!(250, quantizer.quantize_ms(190), "Expected left but got right");

        quantizer.set_late_mode(LateMode::Forward);
        assert_eq!(250, quantizer.quantize_ms(130), "Expected left but got right");

        quantizer.set_late_mode(LateMode::Backward);
        assert_eq!(125, quantizer.quantize_ms(190), "Expected left but got right");
    }

    #[test]
    fn zero_strength_is_identity() {
        let mut quantizer = enabled_quantizer();
        quantizer.set_strength(0);

        assert_eq!(130, quantizer.quantize_ms(130), "Expected left but got right");
        assert_eq!(0, quantizer.offset_ms(130), "Expected left but got right");
    }

    #[test]
    fn partial_strength_interpolates_linearly() {
        let mut quantizer = enabled_quantizer();
        quantizer.set_strength(50);

        // offset to the grid is -5 ms; half strength moves -2 (integer division)
        assert_eq!(128, quantizer.quantize_ms(130), "Expected left but got right");
        assert_eq!(-2, quantizer.offset_ms(130), "Expected left but got right");
    }

    #[test]
    fn late_mode_off_disables_snapping() {
        let mut quantizer = enabled_quantizer();
        quantizer.set_late_mode(LateMode::Off);

        assert_eq!(130, quantizer.quantize_ms(130), "Expected left but got right");
        assert_eq!(30, quantizer.quantize_ticks(30), "Expected left but got right");
    }

    #[test]
    fn disabled_is_identity() {
        let quantizer = Quantizer::default();
        assert_eq!(130, quantizer.quantize_ms(130), "Expected left but got right");
    }

    #[test]
    fn swing_delays_odd_cells_only() {
        let mut quantizer = enabled_quantizer();
        quantizer.set_swing(75);

        // cell 1 is an off-beat: 125 + (75 - 50) * 125 / 100 = 156
        assert_eq!(156, quantizer.quantize_ms(130), "Expected left but got right");
        // cell 2 is a down-beat and stays put
        assert_eq!(250, quantizer.quantize_ms(260), "Expected left but got right");
    }

    #[test]
    fn swing_clamps_are_observable() {
        let mut quantizer = Quantizer::default();
        quantizer.set_swing(130);
        assert_eq!(100, quantizer.swing(), "Expected left but got right");

        quantizer.set_strength(250);
        assert_eq!(100, quantizer.strength(), "Expected left but got right");

        quantizer.set_lookahead(Duration::from_millis(800));
        assert_eq!(
            Duration::from_millis(500),
            quantizer.lookahead(),
            "Expected left but got right"
        );
    }

    #[test]
    fn tick_math_matches_the_ms_math() {
        let mut quantizer = enabled_quantizer();

        assert_eq!(24, quantizer.quantize_ticks(30), "Expected left but got right");

        quantizer.set_late_mode(LateMode::Forward);
        assert_eq!(48, quantizer.quantize_ticks(30), "Expected left but got right");

        // the swing bias applies in tick units too
        quantizer.set_late_mode(LateMode::Nearest);
        quantizer.set_swing(100);
        assert_eq!(36, quantizer.quantize_ticks(30), "Expected left but got right");
    }

    #[test]
    fn buffering_requires_an_enabled_quantizer() {
        let mut quantizer = Quantizer::default();

        assert_eq!(
            Err(Rejected::Disabled),
            quantizer.buffer_note(Note::C4, FORTE, Channel::Ch1, 130),
            "Expected left but got right"
        );
    }

    #[test]
    fn a_full_buffer_rejects_rather_than_drops() {
        let mut quantizer = enabled_quantizer();

        for i in 0..MAX_PENDING_NOTES as u32 {
            quantizer
                .buffer_note(Note::C4, FORTE, Channel::Ch1, i)
                .unwrap();
        }

        assert_eq!(
            Err(Rejected::BufferFull),
            quantizer.buffer_note(Note::C4, FORTE, Channel::Ch1, 130),
            "Expected left but got right"
        );
        assert_eq!(
            MAX_PENDING_NOTES,
            quantizer.buffered_count(),
            "Expected left but got right"
        );
    }

    #[test]
    fn ready_notes_drain_in_buffered_order() {
        let mut quantizer = enabled_quantizer();

        quantizer
            .buffer_note(Note::C4, FORTE, Channel::Ch1, 130) // due at 125
            .unwrap();
        quantizer
            .buffer_note(Note::E4, FORTE, Channel::Ch2, 370) // due at 375
            .unwrap();

        let ready = quantizer.ready_notes(200);
        assert_eq!(1, ready.len(), "Expected left but got right");
        assert_eq!(Note::C4, ready[0].note(), "Expected left but got right");
        assert_eq!(Channel::Ch1, ready[0].channel(), "Expected left but got right");
        assert_eq!(130, ready[0].original_ms(), "Expected left but got right");
        assert_eq!(125, ready[0].quantized_ms(), "Expected left but got right");
        assert_eq!(1, quantizer.buffered_count(), "Expected left but got right");

        let ready = quantizer.ready_notes(400);
        assert_eq!(1, ready.len(), "Expected left but got right");
        assert_eq!(Note::E4, ready[0].note(), "Expected left but got right");
        assert_eq!(0, quantizer.buffered_count(), "Expected left but got right");
    }

    #[test]
    fn statistics_track_corrections() {
        let mut quantizer = enabled_quantizer();

        quantizer
            .buffer_note(Note::C4, FORTE, Channel::Ch1, 130) // -5
            .unwrap();
        quantizer
            .buffer_note(Note::E4, FORTE, Channel::Ch1, 370) // +5
            .unwrap();

        assert_eq!(2, quantizer.quantized_count(), "Expected left but got right");
        assert_eq!(0, quantizer.average_offset_ms(), "Expected left but got right");
    }

    #[test]
    fn reset_drops_pending_but_keeps_statistics() {
        let mut quantizer = enabled_quantizer();
        quantizer
            .buffer_note(Note::C4, FORTE, Channel::Ch1, 130)
            .unwrap();

        quantizer.reset();

        assert_eq!(0, quantizer.buffered_count(), "Expected left but got right");
        assert_eq!(1, quantizer.quantized_count(), "Expected left but got right");
        assert!(quantizer.is_enabled());
    }

    #[test]
    fn on_grid_tolerance() {
        let quantizer = enabled_quantizer();

        assert!(quantizer.is_on_grid(127, 5));
        assert!(!quantizer.is_on_grid(131, 5));
        assert!(quantizer.is_on_grid(250, 0));
    }

    #[test]
    fn tick_positions_convert_through_the_clock() {
        let mut quantizer = enabled_quantizer();

        // 26 ticks * 5 ms/tick = 130 ms, due at 125
        quantizer
            .buffer_note_at_tick(Note::C4, FORTE, Channel::Ch1, 26)
            .unwrap();

        let ready = quantizer.ready_notes(125);
        assert_eq!(125, ready[0].quantized_ms(), "Expected left but got right");
    }
}
