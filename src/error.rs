//! Error type for the host facade.

use thiserror::Error;

use attacca_core::{EngineError, EventStatus, MidiDispatcherError};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Midi(#[from] MidiDispatcherError),

    #[error("event was not handled: {0:?}")]
    EventFailed(EventStatus),

    #[error("timed out waiting for event completion")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
