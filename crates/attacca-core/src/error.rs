//! Error types for attacca-core.

use thiserror::Error;

/// Status returned by engine control operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("No processor or track with that name")]
    InvalidName,

    #[error("Channel index out of range")]
    InvalidChannelIndex,

    #[error("Plugin could not be instantiated")]
    InvalidPlugin,

    #[error("Unknown plugin uid")]
    InvalidPluginUid,

    #[error("No track with that name or id")]
    InvalidTrack,

    #[error("No parameter with that name or id")]
    InvalidParameter,

    #[error("A processor with that name already exists")]
    AlreadyExists,

    #[error("Realtime event queue is full")]
    QueueFull,

    #[error("Operation is not supported")]
    NotSupported,

    #[error("Operation is not valid in the current realtime state")]
    WrongState,

    #[error("Timed out waiting for the realtime thread")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Status returned by MIDI dispatcher connection operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiDispatcherError {
    #[error("MIDI input port out of range")]
    InvalidMidiInput,

    #[error("MIDI output port out of range")]
    InvalidMidiOutput,

    #[error("No track with that name")]
    InvalidTrackName,

    #[error("No processor with that name")]
    InvalidProcessor,

    #[error("No parameter with that name")]
    InvalidParameter,

    #[error("MIDI channel out of range")]
    InvalidChannel,
}

pub type MidiDispatcherResult<T> = std::result::Result<T, MidiDispatcherError>;
