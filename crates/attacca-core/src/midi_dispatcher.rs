//! Translates raw MIDI byte streams into typed events and routes them
//! according to a configurable connection table; the reverse path turns
//! outbound keyboard events back into raw MIDI for the frontend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use attacca_midi::{
    decoder, encoder, pitch_bend_to_float, value_to_float, MessageType, MidiDataByte,
};

use crate::dispatcher::{EventPoster, EventSender};
use crate::engine::AudioEngine;
use crate::error::{MidiDispatcherError, MidiDispatcherResult};
use crate::event::{Event, EventPayload, KeyboardEventKind, ParameterValue, Time};
use crate::rt_event::ObjectId;

/// MIDI channel filter on a connection. `Omni` matches every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFilter {
    Omni,
    Channel(u8),
}

/// One slot per channel plus one for omni connections.
const CHANNEL_SLOTS: usize = 17;
const OMNI_SLOT: usize = 16;

/// CC number carrying the mod wheel.
const MOD_WHEEL_CONTROLLER: u8 = 1;

impl ChannelFilter {
    fn slot(self) -> usize {
        match self {
            ChannelFilter::Omni => OMNI_SLOT,
            ChannelFilter::Channel(channel) => channel as usize,
        }
    }

    fn validate(self) -> MidiDispatcherResult<Self> {
        match self {
            ChannelFilter::Channel(channel) if channel > 15 => {
                Err(MidiDispatcherError::InvalidChannel)
            }
            other => Ok(other),
        }
    }
}

/// Delivery sink for routed keyboard-out data. Implemented by the MIDI
/// frontend, which owns OS delivery.
pub trait MidiFrontend: Send {
    fn send_midi(&mut self, port: usize, data: MidiDataByte, timestamp: Time);
}

#[derive(Debug, Clone, Copy)]
struct CcInputConnection {
    processor: ObjectId,
    parameter: ObjectId,
    min_range: f32,
    max_range: f32,
    relative: bool,
    virtual_abs_value: u8,
}

impl CcInputConnection {
    /// Scaled parameter value for an incoming controller value, updating the
    /// virtual absolute position in relative mode.
    fn apply(&mut self, cc_value: u8) -> f32 {
        let position = if self.relative {
            // Two's-complement 7-bit delta
            let delta = if cc_value < 64 {
                cc_value as i16
            } else {
                cc_value as i16 - 128
            };
            self.virtual_abs_value = (self.virtual_abs_value as i16 + delta).clamp(0, 127) as u8;
            self.virtual_abs_value
        } else {
            cc_value
        };
        self.min_range + (self.max_range - self.min_range) * (position as f32 / 127.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct KbdOutputConnection {
    port: usize,
    channel: u8,
}

type ChannelRoutes = [Vec<ObjectId>; CHANNEL_SLOTS];
type CcPortRoutes = [[Vec<CcInputConnection>; CHANNEL_SLOTS]; 128];

fn new_cc_port_routes() -> Box<CcPortRoutes> {
    Box::new(std::array::from_fn(|_| std::array::from_fn(|_| Vec::new())))
}

/// Stateful router between raw MIDI ports and the engine's event plane.
pub struct MidiDispatcher {
    engine: Arc<AudioEngine>,
    sender: EventSender,
    frontend: Option<Box<dyn MidiFrontend>>,
    midi_inputs: usize,
    midi_outputs: usize,
    kb_routes_in: HashMap<usize, ChannelRoutes>,
    raw_routes_in: HashMap<usize, ChannelRoutes>,
    cc_routes: HashMap<usize, Box<CcPortRoutes>>,
    pc_routes: HashMap<usize, ChannelRoutes>,
    kb_routes_out: HashMap<ObjectId, Vec<KbdOutputConnection>>,
}

impl MidiDispatcher {
    pub fn new(engine: Arc<AudioEngine>, sender: EventSender) -> Self {
        Self {
            engine,
            sender,
            frontend: None,
            midi_inputs: 0,
            midi_outputs: 0,
            kb_routes_in: HashMap::new(),
            raw_routes_in: HashMap::new(),
            cc_routes: HashMap::new(),
            pc_routes: HashMap::new(),
            kb_routes_out: HashMap::new(),
        }
    }

    pub fn set_frontend(&mut self, frontend: Box<dyn MidiFrontend>) {
        self.frontend = Some(frontend);
    }

    pub fn set_midi_inputs(&mut self, inputs: usize) {
        self.midi_inputs = inputs;
    }

    pub fn set_midi_outputs(&mut self, outputs: usize) {
        self.midi_outputs = outputs;
    }

    /* Connection management */

    pub fn connect_kb_to_track(
        &mut self,
        midi_input: usize,
        track_name: &str,
        channel: ChannelFilter,
    ) -> MidiDispatcherResult<()> {
        let channel = channel.validate()?;
        if midi_input >= self.midi_inputs {
            return Err(MidiDispatcherError::InvalidMidiInput);
        }
        let track = self.track_id(track_name)?;
        self.kb_routes_in.entry(midi_input).or_default()[channel.slot()].push(track);
        debug!(port = midi_input, track, "keyboard connected to track");
        Ok(())
    }

    pub fn connect_raw_midi_to_track(
        &mut self,
        midi_input: usize,
        track_name: &str,
        channel: ChannelFilter,
    ) -> MidiDispatcherResult<()> {
        let channel = channel.validate()?;
        if midi_input >= self.midi_inputs {
            return Err(MidiDispatcherError::InvalidMidiInput);
        }
        let track = self.track_id(track_name)?;
        self.raw_routes_in.entry(midi_input).or_default()[channel.slot()].push(track);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &mut self,
        midi_input: usize,
        processor_name: &str,
        parameter_name: &str,
        cc_no: u8,
        min_range: f32,
        max_range: f32,
        use_relative_mode: bool,
        channel: ChannelFilter,
    ) -> MidiDispatcherResult<()> {
        let channel = channel.validate()?;
        if midi_input >= self.midi_inputs {
            return Err(MidiDispatcherError::InvalidMidiInput);
        }
        if cc_no > 127 {
            return Err(MidiDispatcherError::InvalidChannel);
        }
        let processor = self
            .engine
            .processor_id_from_name(processor_name)
            .map_err(|_| MidiDispatcherError::InvalidProcessor)?;
        let parameter = self
            .engine
            .parameter_id_from_name(processor_name, parameter_name)
            .map_err(|_| MidiDispatcherError::InvalidParameter)?;
        let routes = self
            .cc_routes
            .entry(midi_input)
            .or_insert_with(new_cc_port_routes);
        routes[cc_no as usize][channel.slot()].push(CcInputConnection {
            processor,
            parameter,
            min_range,
            max_range,
            relative: use_relative_mode,
            virtual_abs_value: 64,
        });
        Ok(())
    }

    pub fn connect_pc_to_processor(
        &mut self,
        midi_input: usize,
        processor_name: &str,
        channel: ChannelFilter,
    ) -> MidiDispatcherResult<()> {
        let channel = channel.validate()?;
        if midi_input >= self.midi_inputs {
            return Err(MidiDispatcherError::InvalidMidiInput);
        }
        let processor = self
            .engine
            .processor_id_from_name(processor_name)
            .map_err(|_| MidiDispatcherError::InvalidProcessor)?;
        self.pc_routes.entry(midi_input).or_default()[channel.slot()].push(processor);
        Ok(())
    }

    pub fn connect_track_to_output(
        &mut self,
        midi_output: usize,
        track_name: &str,
        channel: u8,
    ) -> MidiDispatcherResult<()> {
        if midi_output >= self.midi_outputs {
            return Err(MidiDispatcherError::InvalidMidiOutput);
        }
        if channel > 15 {
            return Err(MidiDispatcherError::InvalidChannel);
        }
        let track = self.track_id(track_name)?;
        self.kb_routes_out
            .entry(track)
            .or_default()
            .push(KbdOutputConnection {
                port: midi_output,
                channel,
            });
        Ok(())
    }

    pub fn clear_connections(&mut self) {
        self.kb_routes_in.clear();
        self.raw_routes_in.clear();
        self.cc_routes.clear();
        self.pc_routes.clear();
        self.kb_routes_out.clear();
    }

    fn track_id(&self, track_name: &str) -> MidiDispatcherResult<ObjectId> {
        self.engine
            .processor_id_from_name(track_name)
            .map_err(|_| MidiDispatcherError::InvalidTrackName)
    }

    /* Inbound */

    /// Process one raw MIDI message from the given input port.
    pub fn send_midi(&mut self, port: usize, data: &[u8], timestamp: Time) {
        match decoder::decode_message_type(data) {
            MessageType::NoteOn => {
                let msg = decoder::decode_note_on(data);
                // A note on with zero velocity is a note off
                let kind = if msg.velocity == 0 {
                    KeyboardEventKind::NoteOff {
                        note: msg.note,
                        velocity: 0.5,
                    }
                } else {
                    KeyboardEventKind::NoteOn {
                        note: msg.note,
                        velocity: value_to_float(msg.velocity),
                    }
                };
                self.route_keyboard(port, msg.channel, kind, timestamp);
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::NoteOff => {
                let msg = decoder::decode_note_off(data);
                self.route_keyboard(
                    port,
                    msg.channel,
                    KeyboardEventKind::NoteOff {
                        note: msg.note,
                        velocity: value_to_float(msg.velocity),
                    },
                    timestamp,
                );
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::PolyKeyPressure => {
                let msg = decoder::decode_poly_key_pressure(data);
                self.route_keyboard(
                    port,
                    msg.channel,
                    KeyboardEventKind::NoteAftertouch {
                        note: msg.note,
                        value: value_to_float(msg.pressure),
                    },
                    timestamp,
                );
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::ChannelPressure => {
                let msg = decoder::decode_channel_pressure(data);
                self.route_keyboard(
                    port,
                    msg.channel,
                    KeyboardEventKind::Aftertouch {
                        value: value_to_float(msg.pressure),
                    },
                    timestamp,
                );
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::PitchBend => {
                let msg = decoder::decode_pitch_bend(data);
                self.route_keyboard(
                    port,
                    msg.channel,
                    KeyboardEventKind::PitchBend {
                        value: pitch_bend_to_float(msg.value),
                    },
                    timestamp,
                );
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::ControlChange => {
                let msg = decoder::decode_control_change(data);
                // The mod wheel doubles as a keyboard-level modulation event
                if msg.controller == MOD_WHEEL_CONTROLLER {
                    self.route_keyboard(
                        port,
                        msg.channel,
                        KeyboardEventKind::Modulation {
                            value: value_to_float(msg.value),
                        },
                        timestamp,
                    );
                }
                self.route_control_change(port, msg, timestamp);
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::ProgramChange => {
                let msg = decoder::decode_program_change(data);
                self.route_program_change(port, msg, timestamp);
                self.route_raw(port, msg.channel, data, timestamp);
            }
            MessageType::AllSoundOff
            | MessageType::ResetAllControllers
            | MessageType::LocalControlOn
            | MessageType::LocalControlOff
            | MessageType::AllNotesOff
            | MessageType::OmniModeOff
            | MessageType::OmniModeOn
            | MessageType::MonoModeOn
            | MessageType::PolyModeOn => {
                // Channel mode messages are forwarded to matching raw routes
                self.route_raw(port, decoder::decode_channel(data[0]), data, timestamp);
            }
            // System exclusive does not fit the fixed wrapped payload
            MessageType::SystemExclusive | MessageType::Unknown => {}
            _ => {
                // System common and real time messages carry no channel;
                // omni raw routes receive them
                self.route_raw_system(port, data, timestamp);
            }
        }
    }

    fn route_keyboard(
        &self,
        port: usize,
        channel: u8,
        kind: KeyboardEventKind,
        timestamp: Time,
    ) {
        if let Some(slots) = self.kb_routes_in.get(&port) {
            for &target in slots[channel as usize].iter().chain(&slots[OMNI_SLOT]) {
                self.sender
                    .post(Event::keyboard(target, channel, kind, timestamp));
            }
        }
    }

    fn route_raw(&self, port: usize, channel: u8, data: &[u8], timestamp: Time) {
        if let Some(slots) = self.raw_routes_in.get(&port) {
            for &target in slots[channel as usize].iter().chain(&slots[OMNI_SLOT]) {
                self.sender.post(Event::keyboard(
                    target,
                    channel,
                    KeyboardEventKind::WrappedMidi {
                        data: MidiDataByte::from_bytes(data),
                    },
                    timestamp,
                ));
            }
        }
    }

    /// Channel-less system messages only match omni raw connections.
    fn route_raw_system(&self, port: usize, data: &[u8], timestamp: Time) {
        if let Some(slots) = self.raw_routes_in.get(&port) {
            for &target in &slots[OMNI_SLOT] {
                self.sender.post(Event::keyboard(
                    target,
                    0,
                    KeyboardEventKind::WrappedMidi {
                        data: MidiDataByte::from_bytes(data),
                    },
                    timestamp,
                ));
            }
        }
    }

    fn route_control_change(
        &mut self,
        port: usize,
        msg: decoder::ControlChangeMessage,
        timestamp: Time,
    ) {
        let Some(routes) = self.cc_routes.get_mut(&port) else {
            return;
        };
        let slots = &mut routes[msg.controller as usize];
        for slot in [msg.channel as usize, OMNI_SLOT] {
            for connection in slots[slot].iter_mut() {
                let value = connection.apply(msg.value);
                self.sender.post(Event::parameter_change(
                    connection.processor,
                    connection.parameter,
                    ParameterValue::Float(value),
                    timestamp,
                ));
            }
        }
    }

    fn route_program_change(
        &self,
        port: usize,
        msg: decoder::ProgramChangeMessage,
        timestamp: Time,
    ) {
        if let Some(slots) = self.pc_routes.get(&port) {
            for &target in slots[msg.channel as usize].iter().chain(&slots[OMNI_SLOT]) {
                self.sender.post(Event::new(
                    EventPayload::ProgramChange {
                        processor: target,
                        program: msg.program as i32,
                    },
                    timestamp,
                ));
            }
        }
    }

    /* Outbound */

    /// Convert an outbound keyboard event back into raw MIDI and hand it to
    /// the frontend for every configured output of the source track.
    pub fn process(&mut self, event: &Event) {
        let EventPayload::Keyboard(kb) = event.payload() else {
            return;
        };
        let Some(connections) = self.kb_routes_out.get(&kb.processor) else {
            return;
        };
        let Some(frontend) = self.frontend.as_mut() else {
            return;
        };
        for connection in connections {
            let channel = connection.channel;
            let data = match kb.kind {
                KeyboardEventKind::NoteOn { note, velocity } => {
                    encoder::encode_note_on(decoder::NoteOnMessage {
                        channel,
                        note,
                        velocity: attacca_midi::float_to_value(velocity),
                    })
                }
                KeyboardEventKind::NoteOff { note, velocity } => {
                    encoder::encode_note_off(decoder::NoteOffMessage {
                        channel,
                        note,
                        velocity: attacca_midi::float_to_value(velocity),
                    })
                }
                KeyboardEventKind::NoteAftertouch { note, value } => {
                    encoder::encode_poly_key_pressure(decoder::PolyKeyPressureMessage {
                        channel,
                        note,
                        pressure: attacca_midi::float_to_value(value),
                    })
                }
                KeyboardEventKind::Aftertouch { value } => {
                    encoder::encode_channel_pressure(decoder::ChannelPressureMessage {
                        channel,
                        pressure: attacca_midi::float_to_value(value),
                    })
                }
                KeyboardEventKind::PitchBend { value } => {
                    encoder::encode_pitch_bend(decoder::PitchBendMessage {
                        channel,
                        value: attacca_midi::float_to_pitch_bend(value),
                    })
                }
                KeyboardEventKind::Modulation { value } => {
                    encoder::encode_control_change(decoder::ControlChangeMessage {
                        channel,
                        controller: MOD_WHEEL_CONTROLLER,
                        value: attacca_midi::float_to_value(value),
                    })
                }
                KeyboardEventKind::WrappedMidi { data } => data,
            };
            frontend.send_midi(connection.port, data, event.time());
        }
    }
}

/// Adapter registering a shared MIDI dispatcher with the event dispatcher's
/// poster list.
pub struct MidiDispatcherPoster(pub Arc<Mutex<MidiDispatcher>>);

impl EventPoster for MidiDispatcherPoster {
    fn process(&mut self, event: &Event) {
        self.0.lock().process(event);
    }
}
