//! Provides [`ChannelVoice`], the message type that flows through every effect in the engine.
//!
//! The controller's transports (USB-MIDI, DIN serial) frame raw bytes into
//! [`wmidi::MidiMessage`]s upstream of this crate. System messages (clock, SysEx, real-time) are
//! routed around the effects, so the engine's vocabulary is the seven channel-voice kinds only;
//! conversion from [`MidiMessage`] is therefore fallible while conversion back is not.

use wmidi::{Channel, ControlFunction, ControlValue, MidiMessage, Note, U7, U14};

/// A MIDI channel-voice message.
///
/// Implements [`Default`] (a note off on channel 1, note 0, velocity 0) because [`tinyvec`]
/// requires that items stored in an `ArrayVec` do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelVoice {
    /// Note off. The [`U7`] is the release velocity.
    NoteOff(Channel, Note, U7),
    /// Note on. A velocity of zero means note off per the MIDI specification; effects that track
    /// voices honor that convention.
    NoteOn(Channel, Note, U7),
    /// Polyphonic key pressure (per-key aftertouch).
    PolyphonicKeyPressure(Channel, Note, U7),
    /// Control change.
    ControlChange(Channel, ControlFunction, ControlValue),
    /// Program change.
    ProgramChange(Channel, U7),
    /// Channel pressure (per-channel aftertouch).
    ChannelPressure(Channel, U7),
    /// Pitch bend change.
    PitchBend(Channel, U14),
}

impl Default for ChannelVoice {
    fn default() -> Self {
        Self::NoteOff(
            Channel::Ch1,
            Note::from(U7::from_u8_lossy(0)),
            U7::from_u8_lossy(0),
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ChannelVoice {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NoteOff(channel, note, velocity) => defmt::write!(
                fmt,
                "NoteOff {{ ch: {}, note: {}, vel: {} }}",
                channel.number(),
                note.to_str(),
                u8::from(*velocity)
            ),
            Self::NoteOn(channel, note, velocity) => defmt::write!(
                fmt,
                "NoteOn {{ ch: {}, note: {}, vel: {} }}",
                channel.number(),
                note.to_str(),
                u8::from(*velocity)
            ),
            Self::PolyphonicKeyPressure(channel, note, pressure) => defmt::write!(
                fmt,
                "PolyphonicKeyPressure {{ ch: {}, note: {}, pressure: {} }}",
                channel.number(),
                note.to_str(),
                u8::from(*pressure)
            ),
            Self::ControlChange(channel, control_function, value) => defmt::write!(
                fmt,
                "ControlChange {{ ch: {}, cc: {}, value: {} }}",
                channel.number(),
                u8::from(*control_function),
                u8::from(*value)
            ),
            Self::ProgramChange(channel, program) => defmt::write!(
                fmt,
                "ProgramChange {{ ch: {}, program: {} }}",
                channel.number(),
                u8::from(*program)
            ),
            Self::ChannelPressure(channel, pressure) => defmt::write!(
                fmt,
                "ChannelPressure {{ ch: {}, pressure: {} }}",
                channel.number(),
                u8::from(*pressure)
            ),
            Self::PitchBend(channel, bend) => defmt::write!(
                fmt,
                "PitchBend {{ ch: {}, bend: {} }}",
                channel.number(),
                u16::from(*bend)
            ),
        }
    }
}

impl ChannelVoice {
    /// Returns the channel the message is addressed to.
    pub fn channel(&self) -> Channel {
        match self {
            Self::NoteOff(channel, ..)
            | Self::NoteOn(channel, ..)
            | Self::PolyphonicKeyPressure(channel, ..)
            | Self::ControlChange(channel, ..)
            | Self::ProgramChange(channel, ..)
            | Self::ChannelPressure(channel, ..)
            | Self::PitchBend(channel, ..) => *channel,
        }
    }

    /// Returns the same message readdressed to `channel`. This is the channelizer's primitive
    /// operation.
    #[must_use]
    pub fn with_channel(self, channel: Channel) -> Self {
        match self {
            Self::NoteOff(_, note, velocity) => Self::NoteOff(channel, note, velocity),
            Self::NoteOn(_, note, velocity) => Self::NoteOn(channel, note, velocity),
            Self::PolyphonicKeyPressure(_, note, pressure) => {
                Self::PolyphonicKeyPressure(channel, note, pressure)
            }
            Self::ControlChange(_, control_function, value) => {
                Self::ControlChange(channel, control_function, value)
            }
            Self::ProgramChange(_, program) => Self::ProgramChange(channel, program),
            Self::ChannelPressure(_, pressure) => Self::ChannelPressure(channel, pressure),
            Self::PitchBend(_, bend) => Self::PitchBend(channel, bend),
        }
    }

    /// Returns `true` for note on and note off messages.
    pub fn is_note(&self) -> bool {
        matches!(self, Self::NoteOn(..) | Self::NoteOff(..))
    }
}

/// Error returned when a [`MidiMessage`] has no channel-voice representation (system common,
/// system real-time, or SysEx).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotChannelVoice;

impl TryFrom<MidiMessage<'_>> for ChannelVoice {
    type Error = NotChannelVoice;

    fn try_from(message: MidiMessage<'_>) -> Result<Self, Self::Error> {
        match message {
            MidiMessage::NoteOff(channel, note, velocity) => {
                Ok(Self::NoteOff(channel, note, velocity))
            }
            MidiMessage::NoteOn(channel, note, velocity) => {
                Ok(Self::NoteOn(channel, note, velocity))
            }
            MidiMessage::PolyphonicKeyPressure(channel, note, pressure) => {
                Ok(Self::PolyphonicKeyPressure(channel, note, pressure))
            }
            MidiMessage::ControlChange(channel, control_function, value) => {
                Ok(Self::ControlChange(channel, control_function, value))
            }
            MidiMessage::ProgramChange(channel, program) => {
                Ok(Self::ProgramChange(channel, program))
            }
            MidiMessage::ChannelPressure(channel, pressure) => {
                Ok(Self::ChannelPressure(channel, pressure))
            }
            MidiMessage::PitchBendChange(channel, bend) => Ok(Self::PitchBend(channel, bend)),
            _ => Err(NotChannelVoice),
        }
    }
}

impl From<ChannelVoice> for MidiMessage<'static> {
    fn from(message: ChannelVoice) -> Self {
        match message {
            ChannelVoice::NoteOff(channel, note, velocity) => {
                MidiMessage::NoteOff(channel, note, velocity)
            }
            ChannelVoice::NoteOn(channel, note, velocity) => {
                MidiMessage::NoteOn(channel, note, velocity)
            }
            ChannelVoice::PolyphonicKeyPressure(channel, note, pressure) => {
                MidiMessage::PolyphonicKeyPressure(channel, note, pressure)
            }
            ChannelVoice::ControlChange(channel, control_function, value) => {
                MidiMessage::ControlChange(channel, control_function, value)
            }
            ChannelVoice::ProgramChange(channel, program) => {
                MidiMessage::ProgramChange(channel, program)
            }
            ChannelVoice::ChannelPressure(channel, pressure) => {
                MidiMessage::ChannelPressure(channel, pressure)
            }
            ChannelVoice::PitchBend(channel, bend) => MidiMessage::PitchBendChange(channel, bend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_substitution_preserves_payload() {
        let message = ChannelVoice::NoteOn(Channel::Ch3, Note::C4, U7::from_u8_lossy(100));

        let expected = ChannelVoice::NoteOn(Channel::Ch10, Note::C4, U7::from_u8_lossy(100));
        let actual = message.with_channel(Channel::Ch10);

        assert_eq!(expected, actual, "Expected left but got right");
        assert_eq!(Channel::Ch10, actual.channel(), "Expected left but got right");
    }

    #[test]
    fn system_messages_are_rejected() {
        let actual = ChannelVoice::try_from(MidiMessage::TimingClock);
        assert_eq!(
            Err(NotChannelVoice),
            actual,
            "Expected left but got right"
        );
    }

    #[test]
    fn channel_voice_messages_convert_both_ways() {
        let original = MidiMessage::ControlChange(
            Channel::Ch2,
            ControlFunction::MODULATION_WHEEL,
            U7::from_u8_lossy(64),
        );

        let voice = ChannelVoice::try_from(original.clone()).unwrap();
        let round_tripped = MidiMessage::from(voice);

        assert_eq!(original, round_tripped, "Expected left but got right");
    }

    #[test]
    fn note_kinds_are_notes() {
        assert!(ChannelVoice::default().is_note());
        assert!(!ChannelVoice::ChannelPressure(Channel::Ch1, U7::from_u8_lossy(3)).is_note());
    }
}
