//! Provides [`Voice`], one entry in the channelizer's allocation table.

use wmidi::{Channel, Note, U7};

/// A sounding note tracked by the rotate and zone modes.
///
/// The input side identifies the voice when the matching note off arrives; the output side is what
/// was actually emitted (possibly transposed and on a different channel) and is what the release
/// must address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Voice {
    in_note: Note,
    in_channel: Channel,
    out_note: Note,
    out_channel: Channel,
    velocity: U7,
    /// Allocation sequence number, used by the Oldest steal policy.
    allocated_at: u32,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Voice {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Voice {{ in: {}/ch{}, out: {}/ch{}, vel: {}, seq: {} }}",
            self.in_note.to_str(),
            self.in_channel.number(),
            self.out_note.to_str(),
            self.out_channel.number(),
            u8::from(self.velocity),
            self.allocated_at
        );
    }
}

impl Voice {
    /// Constructs a voice record.
    pub(crate) fn new(
        in_note: Note,
        in_channel: Channel,
        out_note: Note,
        out_channel: Channel,
        velocity: U7,
        allocated_at: u32,
    ) -> Self {
        Self {
            in_note,
            in_channel,
            out_note,
            out_channel,
            velocity,
            allocated_at,
        }
    }

    /// Returns `true` if this voice was allocated for `note` played on `channel`.
    pub fn matches(&self, note: Note, channel: Channel) -> bool {
        self.in_note == note && self.in_channel == channel
    }

    /// The note as received.
    pub fn in_note(&self) -> Note {
        self.in_note
    }

    /// The channel the note was received on.
    pub fn in_channel(&self) -> Channel {
        self.in_channel
    }

    /// The note as emitted.
    pub fn out_note(&self) -> Note {
        self.out_note
    }

    /// The channel the note was emitted on.
    pub fn out_channel(&self) -> Channel {
        self.out_channel
    }

    /// The note-on velocity, used by the Quietest steal policy.
    pub fn velocity(&self) -> U7 {
        self.velocity
    }

    /// Allocation sequence number.
    pub fn allocated_at(&self) -> u32 {
        self.allocated_at
    }
}
