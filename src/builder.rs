//! Builder wiring the engine, event dispatcher and MIDI dispatcher together.

use std::sync::Arc;

use parking_lot::Mutex;

use attacca_core::{
    AudioEngine, EventDispatcher, HostConfig, MidiDispatcher, MidiDispatcherPoster,
};

use crate::engine::AttaccaEngine;
use crate::Result;

/// Builder for [`AttaccaEngine`].
///
/// # Example
///
/// ```no_run
/// use attacca::AttaccaEngine;
///
/// let host = AttaccaEngine::builder()
///     .sample_rate(48_000.0)
///     .rt_cores(2)
///     .midi_inputs(1)
///     .build()
///     .unwrap();
/// ```
pub struct AttaccaEngineBuilder {
    config: HostConfig,
    midi_inputs: usize,
    midi_outputs: usize,
}

impl Default for AttaccaEngineBuilder {
    fn default() -> Self {
        Self {
            config: HostConfig::default(),
            midi_inputs: 0,
            midi_outputs: 0,
        }
    }
}

impl AttaccaEngineBuilder {
    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Number of cores for audio processing; more than one enables the
    /// track-parallel worker pool.
    pub fn rt_cores(mut self, cores: usize) -> Self {
        self.config.rt_cpu_cores = cores;
        self
    }

    pub fn cv_inputs(mut self, ports: usize) -> Self {
        self.config.cv_inputs = ports;
        self
    }

    pub fn cv_outputs(mut self, ports: usize) -> Self {
        self.config.cv_outputs = ports;
        self
    }

    pub fn input_clip_detection(mut self, enabled: bool) -> Self {
        self.config.input_clip_detection = enabled;
        self
    }

    pub fn output_clip_detection(mut self, enabled: bool) -> Self {
        self.config.output_clip_detection = enabled;
        self
    }

    pub fn midi_inputs(mut self, ports: usize) -> Self {
        self.midi_inputs = ports;
        self
    }

    pub fn midi_outputs(mut self, ports: usize) -> Self {
        self.midi_outputs = ports;
        self
    }

    pub fn build(self) -> Result<AttaccaEngine> {
        let engine = Arc::new(AudioEngine::with_config(self.config)?);
        let dispatcher = EventDispatcher::new(engine.clone());
        let mut midi_dispatcher = MidiDispatcher::new(engine.clone(), dispatcher.sender());
        midi_dispatcher.set_midi_inputs(self.midi_inputs);
        midi_dispatcher.set_midi_outputs(self.midi_outputs);
        let midi = Arc::new(Mutex::new(midi_dispatcher));
        dispatcher.register_poster(Box::new(MidiDispatcherPoster(midi.clone())));
        Ok(AttaccaEngine::from_parts(engine, dispatcher, midi))
    }
}
