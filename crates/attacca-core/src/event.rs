//! Typed events used for communication outside the realtime part.
//!
//! Richer than [`RtEvent`]: they own their payloads, carry a unique id and a
//! timestamp, and may have a completion callback invoked once the event has
//! been handled. Events that have a realtime counterpart convert with
//! [`Event::to_rt_event`]; notifications coming back from the audio thread
//! convert the other way with [`Event::from_rt_event`].

use std::time::Duration;

use attacca_midi::MidiDataByte;

use crate::processor::Processor;
use crate::rt_event::{
    AsyncWorkCallback, BlobData, EventId, EventIdGenerator, EventStatus, ObjectId, RtEvent,
};
use crate::track::Track;
use crate::transport::{PlayingMode, SyncMode, TimeSignature};

/// Timestamps on events are durations since engine start, the same clock the
/// transport reports.
pub type Time = Duration;

/// Marker timestamp for events that should be handled as soon as possible.
pub const IMMEDIATE_PROCESS: Time = Duration::ZERO;

/// Called exactly once when the event has been handled (or failed).
pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipChannelType {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyboardEventKind {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8, velocity: f32 },
    NoteAftertouch { note: u8, value: f32 },
    Aftertouch { value: f32 },
    PitchBend { value: f32 },
    Modulation { value: f32 },
    WrappedMidi { data: MidiDataByte },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardEvent {
    pub processor: ObjectId,
    pub channel: u8,
    pub kind: KeyboardEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl ParameterValue {
    pub fn as_float(&self) -> f32 {
        match *self {
            ParameterValue::Bool(value) => {
                if value {
                    1.0
                } else {
                    0.0
                }
            }
            ParameterValue::Int(value) => value as f32,
            ParameterValue::Float(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChangeEvent {
    pub processor: ObjectId,
    pub parameter: ObjectId,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Internal,
    Vst2x,
    Vst3x,
}

/// Engine mutations, executed by the event dispatcher against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AddTrack {
        name: String,
        channels: usize,
    },
    AddMultibusTrack {
        name: String,
        input_busses: usize,
        output_busses: usize,
    },
    RemoveTrack {
        name: String,
    },
    AddProcessor {
        track: String,
        uid: String,
        name: String,
        file: String,
        plugin_type: PluginType,
    },
    RemoveProcessor {
        name: String,
        track: String,
    },
}

/// Wrapper making a raw work-data pointer shippable to the worker thread.
/// Ownership follows the async-work protocol: the pointer stays valid until
/// the completion event has been delivered back to the processor.
#[derive(Debug, Clone, Copy)]
pub struct WorkData(pub *mut ());

unsafe impl Send for WorkData {}

/// Long-running jobs executed on the non-realtime worker thread.
pub enum AsyncWorkEvent {
    /// Run a processor's work callback and post the completion back.
    ProcessorWork {
        processor: ObjectId,
        rt_event_id: EventId,
        callback: AsyncWorkCallback,
        data: WorkData,
    },
    /// Drop payloads whose ownership came back from the audio thread.
    DeleteBlob(Box<[u8]>),
    DeleteString(Box<String>),
    DeleteProcessor(Box<dyn Processor>),
    DeleteTrack(Box<Track>),
}

pub enum EventPayload {
    Keyboard(KeyboardEvent),
    ParameterChange(ParameterChangeEvent),
    StringPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: String,
    },
    BlobPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: Box<[u8]>,
    },
    SetProcessorBypass {
        processor: ObjectId,
        bypass: bool,
    },
    ParameterChangeNotification {
        processor: ObjectId,
        parameter: ObjectId,
        value: f32,
    },
    ClippingNotification {
        channel: usize,
        channel_type: ClipChannelType,
    },
    ProgramChange {
        processor: ObjectId,
        program: i32,
    },
    SetEngineTempo(f32),
    SetEngineTimeSignature(TimeSignature),
    SetEnginePlayingMode(PlayingMode),
    SetEngineSyncMode(SyncMode),
    Engine(EngineEvent),
    AsyncWork(AsyncWorkEvent),
    AsyncWorkCompletion {
        processor: ObjectId,
        rt_event_id: EventId,
        return_value: i32,
    },
}

pub struct Event {
    id: EventId,
    timestamp: Time,
    completion: Option<CompletionCallback>,
    payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp: Time) -> Self {
        Self {
            id: EventIdGenerator::new_id(),
            timestamp,
            completion: None,
            payload,
        }
    }

    pub fn keyboard(
        processor: ObjectId,
        channel: u8,
        kind: KeyboardEventKind,
        timestamp: Time,
    ) -> Self {
        Self::new(
            EventPayload::Keyboard(KeyboardEvent {
                processor,
                channel,
                kind,
            }),
            timestamp,
        )
    }

    pub fn parameter_change(
        processor: ObjectId,
        parameter: ObjectId,
        value: ParameterValue,
        timestamp: Time,
    ) -> Self {
        Self::new(
            EventPayload::ParameterChange(ParameterChangeEvent {
                processor,
                parameter,
                value,
            }),
            timestamp,
        )
    }

    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.completion = Some(callback);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> Time {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn into_payload(self) -> EventPayload {
        self.payload
    }

    pub fn take_completion(&mut self) -> Option<CompletionCallback> {
        self.completion.take()
    }

    /// Whether the dispatcher should hand this event to the worker thread
    /// instead of handling it inline.
    pub fn is_async_work_event(&self) -> bool {
        matches!(self.payload, EventPayload::AsyncWork(_))
    }

    pub fn is_engine_event(&self) -> bool {
        matches!(self.payload, EventPayload::Engine(_))
    }

    pub fn is_keyboard_event(&self) -> bool {
        matches!(self.payload, EventPayload::Keyboard(_))
    }

    /// Whether this event has a realtime counterpart.
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Keyboard(_)
                | EventPayload::ParameterChange(_)
                | EventPayload::StringPropertyChange { .. }
                | EventPayload::BlobPropertyChange { .. }
                | EventPayload::SetProcessorBypass { .. }
                | EventPayload::SetEngineTempo(_)
                | EventPayload::SetEngineTimeSignature(_)
                | EventPayload::SetEnginePlayingMode(_)
                | EventPayload::SetEngineSyncMode(_)
                | EventPayload::AsyncWorkCompletion { .. }
        )
    }

    /// Convert to the realtime counterpart. Takes `&mut self` because string
    /// and blob payloads transfer their ownership into the returned event.
    pub fn to_rt_event(&mut self, offset: usize) -> Option<RtEvent> {
        match &mut self.payload {
            EventPayload::Keyboard(kb) => {
                let processor = kb.processor;
                let channel = kb.channel;
                Some(match kb.kind {
                    KeyboardEventKind::NoteOn { note, velocity } => RtEvent::NoteOn {
                        processor,
                        offset,
                        channel,
                        note,
                        velocity,
                    },
                    KeyboardEventKind::NoteOff { note, velocity } => RtEvent::NoteOff {
                        processor,
                        offset,
                        channel,
                        note,
                        velocity,
                    },
                    KeyboardEventKind::NoteAftertouch { note, value } => RtEvent::NoteAftertouch {
                        processor,
                        offset,
                        channel,
                        note,
                        value,
                    },
                    KeyboardEventKind::Aftertouch { value } => RtEvent::Aftertouch {
                        processor,
                        offset,
                        channel,
                        value,
                    },
                    KeyboardEventKind::PitchBend { value } => RtEvent::PitchBend {
                        processor,
                        offset,
                        channel,
                        value,
                    },
                    KeyboardEventKind::Modulation { value } => RtEvent::Modulation {
                        processor,
                        offset,
                        channel,
                        value,
                    },
                    KeyboardEventKind::WrappedMidi { data } => RtEvent::WrappedMidi {
                        processor,
                        offset,
                        data,
                    },
                })
            }
            EventPayload::ParameterChange(change) => {
                let processor = change.processor;
                let parameter = change.parameter;
                Some(match change.value {
                    ParameterValue::Bool(value) => RtEvent::BoolParameterChange {
                        processor,
                        parameter,
                        value,
                    },
                    ParameterValue::Int(value) => RtEvent::IntParameterChange {
                        processor,
                        parameter,
                        value,
                    },
                    ParameterValue::Float(value) => RtEvent::FloatParameterChange {
                        processor,
                        parameter,
                        value,
                    },
                })
            }
            EventPayload::StringPropertyChange {
                processor,
                property,
                value,
            } => Some(RtEvent::StringPropertyChange {
                processor: *processor,
                property: *property,
                value: Box::into_raw(Box::new(std::mem::take(value))),
            }),
            EventPayload::BlobPropertyChange {
                processor,
                property,
                value,
            } => Some(RtEvent::BlobPropertyChange {
                processor: *processor,
                property: *property,
                value: BlobData::from_boxed_slice(std::mem::take(value)),
            }),
            EventPayload::SetProcessorBypass { processor, bypass } => Some(RtEvent::SetBypass {
                processor: *processor,
                bypass: *bypass,
            }),
            EventPayload::SetEngineTempo(tempo) => Some(RtEvent::Tempo { tempo: *tempo }),
            EventPayload::SetEngineTimeSignature(signature) => Some(RtEvent::TimeSignature {
                signature: *signature,
            }),
            EventPayload::SetEnginePlayingMode(mode) => {
                Some(RtEvent::SetPlayingMode { mode: *mode })
            }
            EventPayload::SetEngineSyncMode(mode) => Some(RtEvent::SetSyncMode { mode: *mode }),
            EventPayload::AsyncWorkCompletion {
                processor,
                rt_event_id,
                return_value,
            } => Some(RtEvent::AsyncWorkCompletion {
                event_id: *rt_event_id,
                processor: *processor,
                return_value: *return_value,
            }),
            _ => None,
        }
    }

    /// Build an event from a notification coming off the outbound ring.
    /// Returns `None` for realtime events with no non-realtime counterpart.
    pub fn from_rt_event(rt_event: RtEvent, timestamp: Time) -> Option<Self> {
        match rt_event {
            RtEvent::NoteOn {
                processor,
                channel,
                note,
                velocity,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::NoteOn { note, velocity },
                timestamp,
            )),
            RtEvent::NoteOff {
                processor,
                channel,
                note,
                velocity,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::NoteOff { note, velocity },
                timestamp,
            )),
            RtEvent::NoteAftertouch {
                processor,
                channel,
                note,
                value,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::NoteAftertouch { note, value },
                timestamp,
            )),
            RtEvent::Aftertouch {
                processor,
                channel,
                value,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::Aftertouch { value },
                timestamp,
            )),
            RtEvent::PitchBend {
                processor,
                channel,
                value,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::PitchBend { value },
                timestamp,
            )),
            RtEvent::Modulation {
                processor,
                channel,
                value,
                ..
            } => Some(Self::keyboard(
                processor,
                channel,
                KeyboardEventKind::Modulation { value },
                timestamp,
            )),
            RtEvent::WrappedMidi {
                processor, data, ..
            } => Some(Self::keyboard(
                processor,
                0,
                KeyboardEventKind::WrappedMidi { data },
                timestamp,
            )),
            RtEvent::ClipNotification { channel, input } => Some(Self::new(
                EventPayload::ClippingNotification {
                    channel,
                    channel_type: if input {
                        ClipChannelType::Input
                    } else {
                        ClipChannelType::Output
                    },
                },
                timestamp,
            )),
            RtEvent::FloatParameterChange {
                processor,
                parameter,
                value,
            } => Some(Self::new(
                EventPayload::ParameterChangeNotification {
                    processor,
                    parameter,
                    value,
                },
                timestamp,
            )),
            RtEvent::AsyncWork {
                event_id,
                processor,
                callback,
                data,
            } => Some(Self::new(
                EventPayload::AsyncWork(AsyncWorkEvent::ProcessorWork {
                    processor,
                    rt_event_id: event_id,
                    callback,
                    data: WorkData(data),
                }),
                timestamp,
            )),
            _ => None,
        }
    }
}
