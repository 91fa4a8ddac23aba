//! The host facade: queries and commands over a running engine.
//!
//! All mutations route through the event dispatcher; queries read the
//! engine's lock-free views and registries directly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use attacca_core::{
    AudioEngine, ChunkSampleBuffer, ControlBuffer, EngineEvent, Event, EventDispatcher,
    EventPayload, EventStatus, HostControl, MidiDispatcher, ObjectId, PerformanceTimer,
    PlayingMode, PluginType, ProcessTimings, ProcessorInfo, SyncMode, Time, TimeSignature,
    TransportView, IMMEDIATE_PROCESS,
};

use crate::builder::AttaccaEngineBuilder;
use crate::error::{Error, Result};

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);

/// A complete headless host: audio engine, event dispatcher and MIDI
/// dispatcher, wired and running.
pub struct AttaccaEngine {
    engine: Arc<AudioEngine>,
    dispatcher: EventDispatcher,
    midi: Arc<Mutex<MidiDispatcher>>,
}

impl AttaccaEngine {
    pub fn builder() -> AttaccaEngineBuilder {
        AttaccaEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        engine: Arc<AudioEngine>,
        dispatcher: EventDispatcher,
        midi: Arc<Mutex<MidiDispatcher>>,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            midi,
        }
    }

    /// The engine itself, for the audio frontend driving `process_chunk`.
    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    /// The MIDI dispatcher, for connection setup and the MIDI frontend.
    pub fn midi(&self) -> MutexGuard<'_, MidiDispatcher> {
        self.midi.lock()
    }

    /// Context object for processors needing transport and event access.
    pub fn host_control(&self) -> HostControl {
        HostControl::new(self.engine.transport_view(), self.dispatcher.sender())
    }

    /* Audio frontend contract */

    pub fn process_chunk(
        &self,
        input: &ChunkSampleBuffer,
        output: &mut ChunkSampleBuffer,
        in_controls: &ControlBuffer,
        out_controls: &mut ControlBuffer,
    ) {
        self.engine
            .process_chunk(input, output, in_controls, out_controls);
    }

    pub fn update_time(&self, timestamp: Time, samples: i64) {
        self.engine.update_time(timestamp, samples);
    }

    pub fn set_output_latency(&self, latency: Duration) {
        self.engine.set_output_latency(latency);
    }

    pub fn enable_realtime(&self, enabled: bool) {
        self.engine.enable_realtime(enabled);
    }

    /* MIDI frontend contract */

    /// Feed one raw MIDI message from an input port.
    pub fn send_midi(&self, port: usize, data: &[u8], timestamp: Time) {
        self.midi.lock().send_midi(port, data, timestamp);
    }

    /* Queries */

    pub fn transport(&self) -> Arc<TransportView> {
        self.engine.transport_view()
    }

    pub fn processors(&self) -> Vec<ProcessorInfo> {
        self.engine.all_processors()
    }

    pub fn tracks(&self) -> Vec<ProcessorInfo> {
        self.engine.all_tracks()
    }

    pub fn processor_id_from_name(&self, name: &str) -> Result<ObjectId> {
        Ok(self.engine.processor_id_from_name(name)?)
    }

    pub fn parameter_value(&self, processor: ObjectId, parameter: ObjectId) -> Result<f32> {
        Ok(self.engine.parameter_value(processor, parameter)?)
    }

    pub fn performance_timer(&self) -> &PerformanceTimer {
        self.engine.performance_timer()
    }

    pub fn enable_timings(&self, enabled: bool) {
        self.engine.performance_timer().enable(enabled);
    }

    pub fn timings_for_node(&self, id: ObjectId) -> Option<ProcessTimings> {
        self.engine.performance_timer().timings_for_node(id)
    }

    /* Commands, routed through the event dispatcher */

    pub fn set_tempo(&self, tempo: f32) -> Result<()> {
        self.send_and_wait(EventPayload::SetEngineTempo(tempo))
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> Result<()> {
        self.send_and_wait(EventPayload::SetEngineTimeSignature(signature))
    }

    pub fn set_playing_mode(&self, mode: PlayingMode) -> Result<()> {
        self.send_and_wait(EventPayload::SetEnginePlayingMode(mode))
    }

    pub fn set_sync_mode(&self, mode: SyncMode) -> Result<()> {
        self.send_and_wait(EventPayload::SetEngineSyncMode(mode))
    }

    pub fn create_track(&self, name: &str, channels: usize) -> Result<ObjectId> {
        self.send_and_wait(EventPayload::Engine(EngineEvent::AddTrack {
            name: name.to_string(),
            channels,
        }))?;
        self.processor_id_from_name(name)
    }

    pub fn delete_track(&self, name: &str) -> Result<()> {
        self.send_and_wait(EventPayload::Engine(EngineEvent::RemoveTrack {
            name: name.to_string(),
        }))
    }

    pub fn add_plugin_to_track(
        &self,
        track: &str,
        uid: &str,
        name: &str,
        path: &str,
        plugin_type: PluginType,
    ) -> Result<ObjectId> {
        self.send_and_wait(EventPayload::Engine(EngineEvent::AddProcessor {
            track: track.to_string(),
            uid: uid.to_string(),
            name: name.to_string(),
            file: path.to_string(),
            plugin_type,
        }))?;
        self.processor_id_from_name(name)
    }

    pub fn remove_plugin_from_track(&self, track: &str, name: &str) -> Result<()> {
        self.send_and_wait(EventPayload::Engine(EngineEvent::RemoveProcessor {
            name: name.to_string(),
            track: track.to_string(),
        }))
    }

    /// Post a prepared event without waiting for its completion.
    pub fn post_event(&self, event: Event) -> bool {
        self.dispatcher.post_event(event)
    }

    /// Register an external sink for outbound events (notifications,
    /// keyboard data routed to MIDI outputs).
    pub fn register_poster(&self, poster: Box<dyn attacca_core::EventPoster>) {
        self.dispatcher.register_poster(poster);
    }

    fn send_and_wait(&self, payload: EventPayload) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let event = Event::new(payload, IMMEDIATE_PROCESS).with_completion(Box::new(
            move |status: EventStatus| {
                let _ = tx.send(status);
            },
        ));
        self.dispatcher.post_event(event);
        match rx.recv_timeout(COMPLETION_TIMEOUT) {
            Ok(EventStatus::HandledOk) => Ok(()),
            Ok(status) => Err(Error::EventFailed(status)),
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_mutation_roundtrip() {
        let host = AttaccaEngine::builder()
            .sample_rate(48_000.0)
            .midi_inputs(1)
            .build()
            .unwrap();
        let track = host.create_track("main", 2).unwrap();
        assert_eq!(host.processor_id_from_name("main").unwrap(), track);
        assert_eq!(host.tracks().len(), 1);

        let plugin = host
            .add_plugin_to_track("main", "core.gain", "g", "", PluginType::Internal)
            .unwrap();
        assert!(plugin > track);

        host.remove_plugin_from_track("main", "g").unwrap();
        host.delete_track("main").unwrap();
        assert!(host.tracks().is_empty());
    }

    #[test]
    fn test_duplicate_track_fails_through_dispatcher() {
        let host = AttaccaEngine::builder().build().unwrap();
        host.create_track("t", 2).unwrap();
        assert!(matches!(
            host.create_track("t", 2),
            Err(Error::EventFailed(EventStatus::Error))
        ));
    }

    #[test]
    fn test_tempo_command_applies_directly_when_not_realtime() {
        let host = AttaccaEngine::builder().build().unwrap();
        host.set_tempo(97.0).unwrap();
        // The direct path updates the transport but the view refreshes on
        // the next processed chunk
        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        host.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert_eq!(host.transport().tempo(), 97.0);
    }
}
