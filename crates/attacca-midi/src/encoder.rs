//! Typed messages back to raw MIDI bytes.
//!
//! The inverse of the decoder: encoding a decoded message yields the original
//! byte string.

use crate::decoder::{
    ChannelPressureMessage, ControlChangeMessage, NoteOffMessage, NoteOnMessage, PitchBendMessage,
    PolyKeyPressureMessage, ProgramChangeMessage,
};
use crate::MidiDataByte;

#[inline]
fn status(prefix: u8, channel: u8) -> u8 {
    prefix | (channel & 0x0F)
}

pub fn encode_note_on(msg: NoteOnMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[status(0x90, msg.channel), msg.note & 0x7F, msg.velocity & 0x7F])
}

pub fn encode_note_off(msg: NoteOffMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[status(0x80, msg.channel), msg.note & 0x7F, msg.velocity & 0x7F])
}

pub fn encode_poly_key_pressure(msg: PolyKeyPressureMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[status(0xA0, msg.channel), msg.note & 0x7F, msg.pressure & 0x7F])
}

pub fn encode_control_change(msg: ControlChangeMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[
        status(0xB0, msg.channel),
        msg.controller & 0x7F,
        msg.value & 0x7F,
    ])
}

pub fn encode_program_change(msg: ProgramChangeMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[status(0xC0, msg.channel), msg.program & 0x7F])
}

pub fn encode_channel_pressure(msg: ChannelPressureMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[status(0xD0, msg.channel), msg.pressure & 0x7F])
}

pub fn encode_pitch_bend(msg: PitchBendMessage) -> MidiDataByte {
    MidiDataByte::from_bytes(&[
        status(0xE0, msg.channel),
        (msg.value & 0x7F) as u8,
        (msg.value >> 7) as u8 & 0x7F,
    ])
}
