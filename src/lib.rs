//! # attacca - headless realtime audio host
//!
//! A realtime engine rendering a configurable graph of tracks and plugins
//! in fixed-size sample chunks, driven by a host-provided audio callback and
//! controlled through a lock-free event plane. Built for live use: the audio
//! thread never allocates, locks against non-realtime code, or blocks.
//!
//! ## Architecture
//!
//! - **attacca-core** - engine, tracks, transport, event plane, MIDI routing
//! - **attacca-midi** - byte-level MIDI decoding and encoding
//!
//! The facade in this crate wires the pieces together and exposes the
//! remote-control surface: queries read lock-free views, mutations route
//! through the event dispatcher.
//!
//! ## Quick start
//!
//! ```no_run
//! use attacca::prelude::*;
//!
//! let host = AttaccaEngine::builder()
//!     .sample_rate(48_000.0)
//!     .midi_inputs(1)
//!     .build()
//!     .unwrap();
//!
//! host.engine().set_audio_input_channels(2).unwrap();
//! host.engine().set_audio_output_channels(2).unwrap();
//!
//! host.create_track("main", 2).unwrap();
//! host.engine().connect_audio_input_channel(0, 0, "main").unwrap();
//! host.engine().connect_audio_output_channel(0, 0, "main").unwrap();
//!
//! host.midi()
//!     .connect_kb_to_track(0, "main", ChannelFilter::Omni)
//!     .unwrap();
//!
//! // The audio frontend then calls host.update_time + host.process_chunk
//! // once per block, and the MIDI frontend feeds host.send_midi.
//! ```

/// Re-export of attacca-core for direct access.
pub use attacca_core as core;

/// Re-export of attacca-midi for direct access.
pub use attacca_midi as midi;

mod builder;
mod engine;
mod error;

pub use builder::AttaccaEngineBuilder;
pub use engine::AttaccaEngine;
pub use error::{Error, Result};

pub use attacca_core::{
    AudioEngine, ChannelFilter, ChunkBufferView, ChunkSampleBuffer, ClipChannelType, ControlBuffer,
    EngineError, Event, EventDispatcher, EventPayload, EventPoster, EventSender, EventStatus,
    HostConfig, HostControl, KeyboardEvent, KeyboardEventKind, MidiDispatcher,
    MidiDispatcherError, MidiFrontend, ObjectId, ParameterDescriptor, ParameterRange,
    ParameterValue, PerformanceTimer, PlayingMode, PluginType, ProcessTimings, Processor,
    ProcessorInfo, RtEvent, SyncMode, Time, TimeSignature, Track, Transport, TransportView,
    AUDIO_CHUNK_SIZE, IMMEDIATE_PROCESS,
};

pub mod prelude {
    //! Everything needed to configure and drive a host.
    pub use crate::{
        AttaccaEngine, AttaccaEngineBuilder, ChannelFilter, ChunkSampleBuffer, ControlBuffer,
        Error, EventStatus, PlayingMode, PluginType, Result, SyncMode, TimeSignature,
        AUDIO_CHUNK_SIZE, IMMEDIATE_PROCESS,
    };
}
