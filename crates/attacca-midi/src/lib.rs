//! Byte-level MIDI message handling.
//!
//! To decode a raw MIDI message, first call [`decode_message_type`], which
//! classifies the message and validates its length. After that the matching
//! `decode_*` function for the returned type can be called safely.
//!
//! The [`encoder`] module provides the inverse direction: typed messages back
//! to raw bytes, byte-identical with what was decoded.

pub mod decoder;
pub mod encoder;

pub use decoder::{
    decode_channel, decode_channel_pressure, decode_control_change, decode_message_type,
    decode_note_off, decode_note_on, decode_pitch_bend, decode_poly_key_pressure,
    decode_program_change, decode_song_position, decode_song_select, decode_time_code,
    ChannelPressureMessage, ControlChangeMessage, MessageType, NoteOffMessage, NoteOnMessage,
    PitchBendMessage, PolyKeyPressureMessage, ProgramChangeMessage, SongPositionMessage,
    SongSelectMessage, TimeCodeMessage,
};
pub use encoder::{
    encode_channel_pressure, encode_control_change, encode_note_off, encode_note_on,
    encode_pitch_bend, encode_poly_key_pressure, encode_program_change,
};

/// Max value for MIDI velocity, pressure, controller value, etc.
pub const MAX_VALUE: u8 = 127;
/// Max value for MIDI pitch bend (14 bit value).
pub const MAX_PITCH_BEND: u16 = 16383;
/// Middle (no bend) value for pitch bend.
pub const PITCH_BEND_MIDDLE: u16 = 8192;
/// Highest controller number.
pub const MAX_CONTROLLER_NO: u8 = 127;
/// Number of MIDI channels.
pub const CHANNEL_COUNT: u8 = 16;

/// A short MIDI message as a fixed byte array with an explicit length.
///
/// Channel voice messages are at most 3 bytes; the fourth byte is padding so
/// the type stays `Copy` and pointer-free for realtime use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiDataByte {
    bytes: [u8; 4],
    len: u8,
}

impl MidiDataByte {
    /// Wrap up to 4 raw bytes. Longer input is truncated.
    pub fn from_bytes(data: &[u8]) -> Self {
        let len = data.len().min(4);
        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Map a 7-bit MIDI value to a float in [0, 1].
#[inline]
pub fn value_to_float(value: u8) -> f32 {
    value as f32 / MAX_VALUE as f32
}

/// Map a float in [0, 1] back to a 7-bit MIDI value.
#[inline]
pub fn float_to_value(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * MAX_VALUE as f32).round() as u8
}

/// Map a 14-bit pitch bend value to a float in [-1, 1], centred at zero.
#[inline]
pub fn pitch_bend_to_float(value: u16) -> f32 {
    (value as f32 - PITCH_BEND_MIDDLE as f32) / PITCH_BEND_MIDDLE as f32
}

/// Map a float in [-1, 1] back to a 14-bit pitch bend value.
#[inline]
pub fn float_to_pitch_bend(value: f32) -> u16 {
    let scaled = value.clamp(-1.0, 1.0) * PITCH_BEND_MIDDLE as f32 + PITCH_BEND_MIDDLE as f32;
    (scaled.round() as u16).min(MAX_PITCH_BEND)
}
