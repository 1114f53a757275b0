//! Provides [`Zone`], a keyboard-split region that routes a note range to an output channel with
//! an optional transpose.

use wmidi::{Channel, Note, U7};

/// A keyboard split zone.
///
/// `note_min`/`note_max` are stored as given; a zone whose `note_min` exceeds its `note_max`
/// matches no notes. Zones are plain configuration data, so the fields are public.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    /// Whether the zone participates in routing.
    pub enabled: bool,
    /// Lowest note the zone claims, inclusive.
    pub note_min: Note,
    /// Highest note the zone claims, inclusive.
    pub note_max: Note,
    /// Channel that notes in this zone are emitted on.
    pub output_channel: Channel,
    /// Semitone offset applied to notes in this zone; the result is clamped to the MIDI note range.
    pub transpose: i8,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            enabled: false,
            note_min: Note::from(U7::from_u8_lossy(0)),
            note_max: Note::from(U7::from_u8_lossy(127)),
            output_channel: Channel::Ch1,
            transpose: 0,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Zone {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Zone {{ enabled: {}, range: {}..={}, ch: {}, transpose: {} }}",
            self.enabled,
            self.note_min.to_str(),
            self.note_max.to_str(),
            self.output_channel.number(),
            self.transpose
        );
    }
}

impl Zone {
    /// Returns `true` if `note` falls within the zone's range. Does not consider `enabled`.
    pub fn contains(&self, note: Note) -> bool {
        note >= self.note_min && note <= self.note_max
    }

    /// Applies the zone's transpose to `note`, clamping to the MIDI note range.
    pub fn transposed(&self, note: Note) -> Note {
        let shifted = i16::from(u8::from(note)) + i16::from(self.transpose);
        Note::from(U7::from_u8_lossy(shifted.clamp(0, 127) as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_membership_is_inclusive() {
        let zone = Zone {
            note_min: Note::C4,
            note_max: Note::B4,
            ..Zone::default()
        };

        assert!(zone.contains(Note::C4));
        assert!(zone.contains(Note::B4));
        assert!(!zone.contains(Note::B3));
        assert!(!zone.contains(Note::C5));
    }

    #[test]
    fn inverted_range_matches_nothing() {
        let zone = Zone {
            note_min: Note::C5,
            note_max: Note::C4,
            ..Zone::default()
        };

        assert!(!zone.contains(Note::C4));
        assert!(!zone.contains(Note::C5));
    }

    #[test]
    fn transpose_clamps_to_midi_range() {
        let up = Zone {
            transpose: 12,
            ..Zone::default()
        };
        assert_eq!(Note::C5, up.transposed(Note::C4), "Expected left but got right");

        let over = Zone {
            transpose: 120,
            ..Zone::default()
        };
        assert_eq!(
            Note::from(U7::from_u8_lossy(127)),
            over.transposed(Note::C4),
            "Expected left but got right"
        );

        let under = Zone {
            transpose: -128,
            ..Zone::default()
        };
        assert_eq!(
            Note::from(U7::from_u8_lossy(0)),
            under.transposed(Note::C4),
            "Expected left but got right"
        );
    }
}
