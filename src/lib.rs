//! This crate contains the architecture-agnostic effects engine for a four-track USB/DIN
//! [MIDI](https://midi.org/midi-1-0) performance controller. Each of the controller's tracks owns an
//! independent chain of processors which reshape channel-voice messages before they reach the
//! outputs: channel routing and voice allocation, timing quantization, groove/swing, continuous
//! controller smoothing, velocity compression, and chord strumming.
//!
//! The crate deliberately knows nothing about transports or scheduling. Callers feed it messages
//! and clock positions; it returns (or emits through a sink) the messages to send and when to send
//! them.

#![deny(missing_docs)]
#![no_std]

/// Number of tracks the controller exposes; callers typically own one processor instance per track.
pub const TRACK_COUNT: usize = 4;

/// Channel routing, input filtering, voice allocation, and keyboard split zones.
pub mod channelizer;

/// Smoothing of continuous controller streams with asymmetric attack/release.
pub mod cc_smoother;

/// Tempo, PPQN, and musical-grid arithmetic shared by the timing effects.
pub mod clock;

pub mod configuration;

/// The channel-voice message vocabulary shared by all effects.
pub mod message;

/// Snapping of note timing onto a tempo grid.
pub mod quantizer;

mod rng;

/// Spreading of chord notes across time, guitar-style.
pub mod strum;

/// Groove templates and per-subdivision timing offsets.
pub mod swing;

/// Dynamics processing of note-on velocities.
pub mod velocity_compressor;
