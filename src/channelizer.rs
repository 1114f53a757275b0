//! Routes incoming channel-voice messages to output channels.
//!
//! The channelizer is the first effect in a track's chain. It filters messages by input channel,
//! then rewrites their channel according to the active mode: pass them through untouched, force
//! them all onto one channel, remap per input channel, rotate note-ons across a channel list for
//! multitimbral spreading, or split the keyboard into [`Zone`]s. The rotate and zone modes track
//! sounding notes in a voice table so that note offs are released on the channel (and note) their
//! note on actually went out on, and so that a configurable polyphony cap can be enforced by
//! stealing voices.

mod voice;
pub use voice::Voice;

mod zone;
pub use zone::Zone;

use num_derive::{FromPrimitive, ToPrimitive};
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, U7};

use crate::configuration::CycleConfig;
use crate::message::ChannelVoice;

/// Size of the voice table, and therefore the highest configurable voice limit.
pub const MAX_VOICES: usize = 16;

/// Number of keyboard split zones.
pub const MAX_ZONES: usize = 4;

/// Number of MIDI channels.
pub const CHANNEL_COUNT: usize = 16;

/// All sixteen channels in order; the identity remap table and the default rotation list.
const CHANNELS: [Channel; CHANNEL_COUNT] = [
    Channel::Ch1,
    Channel::Ch2,
    Channel::Ch3,
    Channel::Ch4,
    Channel::Ch5,
    Channel::Ch6,
    Channel::Ch7,
    Channel::Ch8,
    Channel::Ch9,
    Channel::Ch10,
    Channel::Ch11,
    Channel::Ch12,
    Channel::Ch13,
    Channel::Ch14,
    Channel::Ch15,
    Channel::Ch16,
];

/// Messages produced by processing a single input message: at most a stolen voice's note off
/// followed by the new note on.
pub type MessageBurst = ArrayVec<[ChannelVoice; 2]>;

/// Messages produced by [`Channelizer::release_all_voices`]: one note off per active voice.
pub type ReleaseBurst = ArrayVec<[ChannelVoice; MAX_VOICES]>;

/// How the channelizer rewrites channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Messages pass through with their channel untouched.
    #[default]
    Bypass,
    /// Every message is rewritten to the configured force channel.
    Force,
    /// Each input channel maps to a configured output channel.
    Remap,
    /// Note-ons are dealt across the rotation list round-robin; voices are tracked.
    Rotate,
    /// Notes are routed by keyboard split [`Zone`]; voices are tracked.
    Zone,
}

impl CycleConfig for Mode {}

impl Mode {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bypass => "Bypass",
            Self::Force => "Force",
            Self::Remap => "Remap",
            Self::Rotate => "Rotate",
            Self::Zone => "Zone",
        }
    }
}

/// Which voice to sacrifice when a note on arrives and the voice table is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoiceSteal {
    /// The voice that has been sounding longest.
    #[default]
    Oldest,
    /// The voice with the lowest output note.
    Lowest,
    /// The voice with the highest output note.
    Highest,
    /// The voice with the lowest note-on velocity.
    Quietest,
}

impl CycleConfig for VoiceSteal {}

impl VoiceSteal {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Oldest => "Oldest",
            Self::Lowest => "Lowest",
            Self::Highest => "Highest",
            Self::Quietest => "Quietest",
        }
    }
}

/// Error returned for a rotation list that is empty or longer than [`CHANNEL_COUNT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidRotation;

/// Error returned for a zone index at or beyond [`MAX_ZONES`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidZoneIndex;

/// Per-track channel router and voice allocator.
#[derive(Clone, Debug)]
pub struct Channelizer {
    enabled: bool,
    mode: Mode,
    /// Bit n admits input channel n (0-indexed).
    input_channel_mask: u16,
    force_channel: Channel,
    channel_map: [Channel; CHANNEL_COUNT],
    rotation: [Channel; CHANNEL_COUNT],
    /// Number of leading entries of `rotation` in use; always at least 1.
    rotation_len: usize,
    rotate_index: usize,
    zones: [Zone; MAX_ZONES],
    voices: [Option<Voice>; MAX_VOICES],
    voice_steal: VoiceSteal,
    voice_limit: usize,
    /// Monotonic allocation counter stamped onto voices for the Oldest steal policy.
    voice_clock: u32,
}

impl Default for Channelizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Channelizer {
    /// Constructs a channelizer with factory defaults: disabled, Bypass, all input channels
    /// admitted, identity remap, full rotation list, two disabled keyboard-split template zones
    /// (below C4 to channel 1, C4 and up to channel 2), Oldest stealing, voice limit 16.
    pub fn new() -> Self {
        let mut zones = [Zone::default(); MAX_ZONES];
        zones[0] = Zone {
            enabled: false,
            note_min: Note::from(U7::from_u8_lossy(0)),
            note_max: Note::B3,
            output_channel: Channel::Ch1,
            transpose: 0,
        };
        zones[1] = Zone {
            enabled: false,
            note_min: Note::C4,
            note_max: Note::from(U7::from_u8_lossy(127)),
            output_channel: Channel::Ch2,
            transpose: 0,
        };

        Self {
            enabled: false,
            mode: Mode::Bypass,
            input_channel_mask: 0xFFFF,
            force_channel: Channel::Ch1,
            channel_map: CHANNELS,
            rotation: CHANNELS,
            rotation_len: CHANNEL_COUNT,
            rotate_index: 0,
            zones,
            voices: [None; MAX_VOICES],
            voice_steal: VoiceSteal::Oldest,
            voice_limit: MAX_VOICES,
            voice_clock: 0,
        }
    }

    /// Restores factory defaults and drops all tracked voices without releasing them.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Processes one message, returning the message(s) to emit. An empty burst means the input was
    /// filtered out or had nowhere to go (no matching zone, unknown note off).
    pub fn process(&mut self, message: ChannelVoice) -> MessageBurst {
        let mut burst = MessageBurst::new();

        if !self.enabled {
            burst.push(message);
            return burst;
        }

        if !self.is_input_channel_enabled(message.channel()) {
            return burst;
        }

        match message {
            ChannelVoice::NoteOn(channel, note, velocity) => {
                // velocity 0 means note off per the MIDI specification
                if u8::from(velocity) == 0 {
                    self.note_off(channel, note, velocity, &mut burst);
                } else {
                    self.note_on(channel, note, velocity, &mut burst);
                }
            }
            ChannelVoice::NoteOff(channel, note, velocity) => {
                self.note_off(channel, note, velocity, &mut burst);
            }
            other => {
                burst.push(other.with_channel(self.substitute_channel(other.channel())));
            }
        }

        burst
    }

    /// Emits a note off for every tracked voice and clears the table. Intended for panic/stop.
    pub fn release_all_voices(&mut self) -> ReleaseBurst {
        let mut burst = ReleaseBurst::new();
        for slot in self.voices[..self.voice_limit].iter_mut() {
            if let Some(voice) = slot.take() {
                burst.push(ChannelVoice::NoteOff(
                    voice.out_channel(),
                    voice.out_note(),
                    U7::from_u8_lossy(0),
                ));
            }
        }
        burst
    }

    /// Number of voices currently sounding.
    pub fn active_voice_count(&self) -> usize {
        self.voices[..self.voice_limit]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    fn note_on(&mut self, channel: Channel, note: Note, velocity: U7, burst: &mut MessageBurst) {
        match self.mode {
            Mode::Bypass => burst.push(ChannelVoice::NoteOn(channel, note, velocity)),
            Mode::Force => burst.push(ChannelVoice::NoteOn(self.force_channel, note, velocity)),
            Mode::Remap => burst.push(ChannelVoice::NoteOn(
                self.channel_map[usize::from(channel.index())],
                note,
                velocity,
            )),
            Mode::Rotate => {
                let out_channel = self.rotation[self.rotate_index];
                self.rotate_index = (self.rotate_index + 1) % self.rotation_len;
                self.allocate(channel, note, note, out_channel, velocity, burst);
            }
            Mode::Zone => {
                let Some(zone) = self
                    .zones
                    .iter()
                    .find(|zone| zone.enabled && zone.contains(note))
                    .copied()
                else {
                    return;
                };
                self.allocate(
                    channel,
                    note,
                    zone.transposed(note),
                    zone.output_channel,
                    velocity,
                    burst,
                );
            }
        }
    }

    fn note_off(&mut self, channel: Channel, note: Note, velocity: U7, burst: &mut MessageBurst) {
        match self.mode {
            Mode::Bypass => burst.push(ChannelVoice::NoteOff(channel, note, velocity)),
            Mode::Force => burst.push(ChannelVoice::NoteOff(self.force_channel, note, velocity)),
            Mode::Remap => burst.push(ChannelVoice::NoteOff(
                self.channel_map[usize::from(channel.index())],
                note,
                velocity,
            )),
            Mode::Rotate | Mode::Zone => {
                let found = self.voices[..self.voice_limit]
                    .iter()
                    .position(|slot| slot.is_some_and(|voice| voice.matches(note, channel)));

                if let Some(slot) = found {
                    if let Some(voice) = self.voices[slot].take() {
                        burst.push(ChannelVoice::NoteOff(
                            voice.out_channel(),
                            voice.out_note(),
                            velocity,
                        ));
                    }
                } else if self.mode == Mode::Zone {
                    // The voice was never allocated (stolen, or the zone changed underneath it);
                    // recompute the routing so the release still lands somewhere sensible.
                    if let Some(zone) = self
                        .zones
                        .iter()
                        .find(|zone| zone.enabled && zone.contains(note))
                    {
                        burst.push(ChannelVoice::NoteOff(
                            zone.output_channel,
                            zone.transposed(note),
                            velocity,
                        ));
                    }
                }
            }
        }
    }

    fn allocate(
        &mut self,
        in_channel: Channel,
        in_note: Note,
        out_note: Note,
        out_channel: Channel,
        velocity: U7,
        burst: &mut MessageBurst,
    ) {
        let slot = match self.free_slot() {
            Some(slot) => slot,
            None => {
                let slot = self.steal_target();
                if let Some(victim) = self.voices[slot] {
                    // the stolen voice's note off goes out before the new note on
                    burst.push(ChannelVoice::NoteOff(
                        victim.out_channel(),
                        victim.out_note(),
                        U7::from_u8_lossy(0),
                    ));
                }
                slot
            }
        };

        burst.push(ChannelVoice::NoteOn(out_channel, out_note, velocity));
        self.voices[slot] = Some(Voice::new(
            in_note,
            in_channel,
            out_note,
            out_channel,
            velocity,
            self.voice_clock,
        ));
        self.voice_clock = self.voice_clock.wrapping_add(1);
    }

    fn free_slot(&self) -> Option<usize> {
        self.voices[..self.voice_limit]
            .iter()
            .position(|slot| slot.is_none())
    }

    /// Selects the voice to steal. Ties keep the first-encountered slot; comparisons are strict so
    /// the scan order is part of the policy's observable behavior.
    fn steal_target(&self) -> usize {
        let mut victim = 0;
        let mut best: Option<Voice> = None;

        for (slot, voice) in self.voices[..self.voice_limit].iter().enumerate() {
            let Some(voice) = *voice else { continue };
            let Some(current) = best else {
                best = Some(voice);
                victim = slot;
                continue;
            };

            let better = match self.voice_steal {
                VoiceSteal::Oldest => voice.allocated_at() < current.allocated_at(),
                VoiceSteal::Lowest => voice.out_note() < current.out_note(),
                VoiceSteal::Highest => voice.out_note() > current.out_note(),
                VoiceSteal::Quietest => voice.velocity() < current.velocity(),
            };
            if better {
                best = Some(voice);
                victim = slot;
            }
        }

        victim
    }

    /// Channel substitution for messages that carry no note (CC, program change, pressure, bend).
    fn substitute_channel(&self, channel: Channel) -> Channel {
        match self.mode {
            Mode::Bypass => channel,
            Mode::Force => self.force_channel,
            Mode::Remap => self.channel_map[usize::from(channel.index())],
            // slot 0 of the rotation, without advancing it
            Mode::Rotate => self.rotation[0],
            Mode::Zone => self
                .zones
                .iter()
                .find(|zone| zone.enabled)
                .map_or(channel, |zone| zone.output_channel),
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
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Setter.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Getter. Bit n of the mask admits input channel n (0-indexed).
    pub fn input_channel_mask(&self) -> u16 {
        self.input_channel_mask
    }

    /// Setter.
    pub fn set_input_channel_mask(&mut self, mask: u16) {
        self.input_channel_mask = mask;
    }

    /// Returns whether messages arriving on `channel` are admitted.
    pub fn is_input_channel_enabled(&self, channel: Channel) -> bool {
        self.input_channel_mask & (1 << channel.index()) != 0
    }

    /// Admits or filters a single input channel.
    pub fn set_input_channel_enabled(&mut self, channel: Channel, enabled: bool) {
        if enabled {
            self.input_channel_mask |= 1 << channel.index();
        } else {
            self.input_channel_mask &= !(1 << channel.index());
        }
    }

    /// Getter.
    pub fn force_channel(&self) -> Channel {
        self.force_channel
    }

    /// Setter.
    pub fn set_force_channel(&mut self, channel: Channel) {
        self.force_channel = channel;
    }

    /// Returns the output channel that Remap mode assigns to `input`.
    pub fn remap(&self, input: Channel) -> Channel {
        self.channel_map[usize::from(input.index())]
    }

    /// Maps a single input channel for Remap mode.
    pub fn set_remap(&mut self, input: Channel, output: Channel) {
        self.channel_map[usize::from(input.index())] = output;
    }

    /// Getter.
    pub fn channel_map(&self) -> &[Channel; CHANNEL_COUNT] {
        &self.channel_map
    }

    /// Replaces the whole Remap table.
    pub fn set_channel_map(&mut self, map: [Channel; CHANNEL_COUNT]) {
        self.channel_map = map;
    }

    /// The channels Rotate mode deals note-ons across, in order.
    pub fn rotation(&self) -> &[Channel] {
        &self.rotation[..self.rotation_len]
    }

    /// Replaces the rotation list and rewinds the round-robin index. The list must contain between
    /// 1 and [`CHANNEL_COUNT`] channels.
    pub fn set_rotation(&mut self, channels: &[Channel]) -> Result<(), InvalidRotation> {
        if channels.is_empty() || channels.len() > CHANNEL_COUNT {
            return Err(InvalidRotation);
        }
        self.rotation[..channels.len()].copy_from_slice(channels);
        self.rotation_len = channels.len();
        self.rotate_index = 0;
        Ok(())
    }

    /// Rewinds the round-robin index so the next note on takes the first rotation slot.
    pub fn reset_rotation(&mut self) {
        self.rotate_index = 0;
    }

    /// Getter.
    pub fn zone(&self, index: usize) -> Option<&Zone> {
        self.zones.get(index)
    }

    /// Replaces a whole zone.
    pub fn set_zone(&mut self, index: usize, zone: Zone) -> Result<(), InvalidZoneIndex> {
        *self.zones.get_mut(index).ok_or(InvalidZoneIndex)? = zone;
        Ok(())
    }

    /// Enables or disables a single zone.
    pub fn set_zone_enabled(&mut self, index: usize, enabled: bool) -> Result<(), InvalidZoneIndex> {
        self.zones.get_mut(index).ok_or(InvalidZoneIndex)?.enabled = enabled;
        Ok(())
    }

    /// Sets a zone's note range.
    pub fn set_zone_range(
        &mut self,
        index: usize,
        note_min: Note,
        note_max: Note,
    ) -> Result<(), InvalidZoneIndex> {
        let zone = self.zones.get_mut(index).ok_or(InvalidZoneIndex)?;
        zone.note_min = note_min;
        zone.note_max = note_max;
        Ok(())
    }

    /// Sets a zone's output channel.
    pub fn set_zone_channel(&mut self, index: usize, channel: Channel) -> Result<(), InvalidZoneIndex> {
        self.zones.get_mut(index).ok_or(InvalidZoneIndex)?.output_channel = channel;
        Ok(())
    }

    /// Sets a zone's transpose in semitones.
    pub fn set_zone_transpose(&mut self, index: usize, transpose: i8) -> Result<(), InvalidZoneIndex> {
        self.zones.get_mut(index).ok_or(InvalidZoneIndex)?.transpose = transpose;
        Ok(())
    }

    /// Getter.
    pub fn voice_steal(&self) -> VoiceSteal {
        self.voice_steal
    }

    /// Setter.
    pub fn set_voice_steal(&mut self, policy: VoiceSteal) {
        self.voice_steal = policy;
    }

    /// Getter.
    pub fn voice_limit(&self) -> usize {
        self.voice_limit
    }

    /// Sets the polyphony cap, clamped to 1..=[`MAX_VOICES`].
    pub fn set_voice_limit(&mut self, limit: usize) {
        self.voice_limit = limit.clamp(1, MAX_VOICES);
    }
}
