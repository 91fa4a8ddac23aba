//! Realtime audio engine: a track graph rendered in fixed-size chunks,
//! driven by a host-provided audio callback and controlled through a
//! lock-free event plane.
//!
//! # Primary API
//!
//! - [`AudioEngine`]: the per-chunk orchestrator and its control surface
//! - [`EventDispatcher`] / [`EventSender`]: typed events in and out of the
//!   realtime part
//! - [`MidiDispatcher`]: raw MIDI bytes to typed events, and back out
//! - [`Transport`] / [`TransportView`]: musical time
//! - [`PerformanceTimer`]: per-node processing time statistics
//!
//! # Threading
//!
//! The audio thread calls [`AudioEngine::update_time`] and
//! [`AudioEngine::process_chunk`] and nothing else. While realtime mode is
//! enabled, every mutation travels as an [`RtEvent`] over wait-free queues
//! and is acknowledged the same way; with realtime off, control operations
//! apply directly. See the `engine` module docs for the full picture.

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod fifo;
pub mod host_control;
pub mod lockfree;
pub mod midi_dispatcher;
pub mod parameter;
pub mod performance;
pub mod plugins;
pub mod processor;
pub mod receiver;
pub mod rt_event;
pub mod track;
pub mod transport;
pub mod worker_pool;

pub use buffer::{ChunkBufferView, ChunkSampleBuffer, ControlBuffer, AUDIO_CHUNK_SIZE};
pub use config::HostConfig;
pub use dispatcher::{EventDispatcher, EventPoster, EventSender};
pub use engine::{AudioEngine, ClipDetector, MAX_RT_PROCESSOR_ID};
pub use error::{EngineError, EngineResult, MidiDispatcherError, MidiDispatcherResult};
pub use event::{
    ClipChannelType, CompletionCallback, EngineEvent, Event, EventPayload, KeyboardEvent,
    KeyboardEventKind, ParameterChangeEvent, ParameterValue, PluginType, Time, IMMEDIATE_PROCESS,
};
pub use fifo::{MpmcFifo, SpscFifo, MAX_EVENTS_IN_QUEUE};
pub use host_control::HostControl;
pub use midi_dispatcher::{ChannelFilter, MidiDispatcher, MidiDispatcherPoster, MidiFrontend};
pub use parameter::{ParameterDescriptor, ParameterRange, ParameterValues};
pub use performance::{PerformanceTimer, ProcessTimings, ENGINE_TIMING_ID};
pub use processor::{Processor, ProcessorInfo};
pub use rt_event::{EventId, EventStatus, ObjectId, RtEvent};
pub use track::Track;
pub use transport::{
    PlayingMode, SyncMode, TimeSignature, Transport, TransportView, DEFAULT_TEMPO,
};
