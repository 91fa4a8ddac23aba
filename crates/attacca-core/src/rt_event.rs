//! Trivially copyable events passed over the realtime queues.
//!
//! Everything in here is `Copy` and pointer-sized or smaller per field, so
//! events can live in the wait-free rings. Long-lived payloads (strings,
//! blobs, processors) travel as raw pointers: the sender gives up ownership
//! when the event is enqueued, and the receiver either takes it over or hands
//! it back through a [`RtEvent::AsyncDelete`] so the allocation is released
//! on a non-realtime thread.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use attacca_midi::MidiDataByte;

use crate::processor::Processor;
use crate::track::Track;
use crate::transport::{PlayingMode, SyncMode, TimeSignature};

/// Unique id of a processor, track or parameter. Ids are assigned from a
/// monotonically increasing counter and never reused in a process lifetime.
pub type ObjectId = u32;

/// Unique id correlating a returnable event with its completion.
pub type EventId = u64;

/// Process-wide processor id source. Id 0 is reserved for engine-level
/// timings, so the first processor gets id 1.
pub struct ProcessorIdGenerator;

static NEXT_PROCESSOR_ID: AtomicU32 = AtomicU32::new(1);

impl ProcessorIdGenerator {
    pub fn new_id() -> ObjectId {
        NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed)
    }
}

/// Process-wide event id source.
pub struct EventIdGenerator;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

impl EventIdGenerator {
    pub fn new_id() -> EventId {
        NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
    }
}

/// Outcome of handling an event, reported through completion events and
/// completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    HandledOk,
    Error,
    NotHandled,
    QueuedHandling,
    QueueFull,
    Timeout,
}

/// Opaque binary payload passed by pointer in events and properties.
#[derive(Debug, Clone, Copy)]
pub struct BlobData {
    pub size: usize,
    pub data: *mut u8,
}

impl BlobData {
    /// Take ownership of a boxed slice, leaking it into a raw payload. The
    /// matching [`BlobData::into_boxed_slice`] must run exactly once.
    pub fn from_boxed_slice(data: Box<[u8]>) -> Self {
        let size = data.len();
        Self {
            size,
            data: Box::into_raw(data) as *mut u8,
        }
    }

    /// Reclaim ownership. Must only be called once, on a non-realtime thread.
    ///
    /// # Safety
    /// `self` must have been produced by [`BlobData::from_boxed_slice`] and
    /// not reclaimed before.
    pub unsafe fn into_boxed_slice(self) -> Box<[u8]> {
        Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.data, self.size))
    }
}

/// Work function executed by the non-realtime worker on behalf of a
/// processor. Returns a status code delivered back in the completion event.
pub type AsyncWorkCallback = fn(data: *mut (), event_id: EventId) -> i32;

/// Ownership hand-backs from the audio thread: the payload must be
/// reclaimed and dropped by the event dispatcher.
#[derive(Debug, Clone, Copy)]
pub enum AsyncDeletePayload {
    String(*mut String),
    Blob(BlobData),
    Processor(*mut dyn Processor),
    Track(*mut Track),
}

/// Events crossing between the realtime and non-realtime parts.
#[derive(Debug, Clone, Copy)]
pub enum RtEvent {
    /* Keyboard events, addressed to a track or processor */
    NoteOn {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteOff {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteAftertouch {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        note: u8,
        value: f32,
    },
    Aftertouch {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        value: f32,
    },
    PitchBend {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        value: f32,
    },
    Modulation {
        processor: ObjectId,
        offset: usize,
        channel: u8,
        value: f32,
    },
    WrappedMidi {
        processor: ObjectId,
        offset: usize,
        data: MidiDataByte,
    },

    /* Parameter and property changes */
    BoolParameterChange {
        processor: ObjectId,
        parameter: ObjectId,
        value: bool,
    },
    IntParameterChange {
        processor: ObjectId,
        parameter: ObjectId,
        value: i32,
    },
    FloatParameterChange {
        processor: ObjectId,
        parameter: ObjectId,
        value: f32,
    },
    /// Ownership of the string travels with the event; released through
    /// [`RtEvent::AsyncDelete`] after delivery.
    StringPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: *mut String,
    },
    BlobPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: BlobData,
    },
    SetBypass {
        processor: ObjectId,
        bypass: bool,
    },

    /* Engine and transport events */
    Tempo {
        tempo: f32,
    },
    TimeSignature {
        signature: TimeSignature,
    },
    SetPlayingMode {
        mode: PlayingMode,
    },
    SetSyncMode {
        mode: SyncMode,
    },
    StopEngine {
        event_id: EventId,
    },

    /* Graph mutations, returnable */
    InsertTrack {
        event_id: EventId,
        track: *mut Track,
    },
    RemoveTrack {
        event_id: EventId,
        track: ObjectId,
    },
    InsertProcessor {
        event_id: EventId,
        track: ObjectId,
        processor: *mut dyn Processor,
    },
    RemoveProcessor {
        event_id: EventId,
        track: ObjectId,
        processor: ObjectId,
    },

    /* Audio -> control */
    EventCompletion {
        event_id: EventId,
        status: EventStatus,
    },
    ClipNotification {
        channel: usize,
        input: bool,
    },
    AsyncDelete {
        payload: AsyncDeletePayload,
    },

    /* Asynchronous processor work */
    AsyncWork {
        event_id: EventId,
        processor: ObjectId,
        callback: AsyncWorkCallback,
        data: *mut (),
    },
    AsyncWorkCompletion {
        event_id: EventId,
        processor: ObjectId,
        return_value: i32,
    },
}

// Raw pointers make the enum !Send by default. Events are only ever moved
// between threads through the rings, which transfer ownership of the
// pointed-to payloads along with the event.
unsafe impl Send for RtEvent {}

impl RtEvent {
    /// The processor a non-engine event is addressed to.
    pub fn processor_id(&self) -> Option<ObjectId> {
        match *self {
            RtEvent::NoteOn { processor, .. }
            | RtEvent::NoteOff { processor, .. }
            | RtEvent::NoteAftertouch { processor, .. }
            | RtEvent::Aftertouch { processor, .. }
            | RtEvent::PitchBend { processor, .. }
            | RtEvent::Modulation { processor, .. }
            | RtEvent::WrappedMidi { processor, .. }
            | RtEvent::BoolParameterChange { processor, .. }
            | RtEvent::IntParameterChange { processor, .. }
            | RtEvent::FloatParameterChange { processor, .. }
            | RtEvent::StringPropertyChange { processor, .. }
            | RtEvent::BlobPropertyChange { processor, .. }
            | RtEvent::SetBypass { processor, .. }
            | RtEvent::AsyncWorkCompletion { processor, .. } => Some(processor),
            _ => None,
        }
    }

    /// True for events the engine applies to its own state rather than
    /// routing to a processor.
    pub fn is_engine_event(&self) -> bool {
        matches!(
            self,
            RtEvent::Tempo { .. }
                | RtEvent::TimeSignature { .. }
                | RtEvent::SetPlayingMode { .. }
                | RtEvent::SetSyncMode { .. }
                | RtEvent::StopEngine { .. }
                | RtEvent::InsertTrack { .. }
                | RtEvent::RemoveTrack { .. }
                | RtEvent::InsertProcessor { .. }
                | RtEvent::RemoveProcessor { .. }
        )
    }

    /// True if the producer expects an [`RtEvent::EventCompletion`] back.
    pub fn is_returnable(&self) -> bool {
        self.returnable_id().is_some()
    }

    pub fn returnable_id(&self) -> Option<EventId> {
        match *self {
            RtEvent::StopEngine { event_id }
            | RtEvent::InsertTrack { event_id, .. }
            | RtEvent::RemoveTrack { event_id, .. }
            | RtEvent::InsertProcessor { event_id, .. }
            | RtEvent::RemoveProcessor { event_id, .. } => Some(event_id),
            _ => None,
        }
    }

    /// True for keyboard-type events (the ones a track fans out to its
    /// processor chain).
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self,
            RtEvent::NoteOn { .. }
                | RtEvent::NoteOff { .. }
                | RtEvent::NoteAftertouch { .. }
                | RtEvent::Aftertouch { .. }
                | RtEvent::PitchBend { .. }
                | RtEvent::Modulation { .. }
                | RtEvent::WrappedMidi { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generators_are_monotonic() {
        let first = ProcessorIdGenerator::new_id();
        let second = ProcessorIdGenerator::new_id();
        assert!(second > first);

        let first = EventIdGenerator::new_id();
        let second = EventIdGenerator::new_id();
        assert!(second > first);
    }

    #[test]
    fn test_event_classification() {
        let note = RtEvent::NoteOn {
            processor: 17,
            offset: 0,
            channel: 0,
            note: 60,
            velocity: 0.5,
        };
        assert_eq!(note.processor_id(), Some(17));
        assert!(note.is_keyboard_event());
        assert!(!note.is_engine_event());
        assert!(!note.is_returnable());

        let tempo = RtEvent::Tempo { tempo: 140.0 };
        assert!(tempo.is_engine_event());
        assert_eq!(tempo.processor_id(), None);

        let removal = RtEvent::RemoveTrack {
            event_id: 42,
            track: 3,
        };
        assert!(removal.is_engine_event());
        assert_eq!(removal.returnable_id(), Some(42));
    }

    #[test]
    fn test_blob_data_roundtrip() {
        let blob = BlobData::from_boxed_slice(vec![1u8, 2, 3].into_boxed_slice());
        assert_eq!(blob.size, 3);
        let data = unsafe { blob.into_boxed_slice() };
        assert_eq!(&data[..], &[1, 2, 3]);
    }
}
