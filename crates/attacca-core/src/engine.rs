//! The realtime audio engine.
//!
//! # Structure
//!
//! ```text
//! control threads                        audio thread
//!      │                                      │
//!      ▼                                      ▼
//! ┌──────────────┐   internal / main-in   ┌───────────────────────┐
//! │ control ops  │──────SpscFifo─────────▶│ process_chunk         │
//! │ (registry,   │                        │  drain events         │
//! │  rt off:     │◀─────MpmcFifo──────────│  route cv/gate        │
//! │  direct)     │  main-out / control-out│  track graph          │
//! └──────────────┘                        │  transport advance    │
//!                                         └───────────────────────┘
//! ```
//!
//! While realtime is enabled every mutation reaches the realtime part as an
//! [`RtEvent`] over the inbound rings and is acknowledged over the outbound
//! ones; with realtime off, control operations lock the core and mutate it
//! directly. The core mutex is therefore uncontended whenever the audio
//! thread holds it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::buffer::{ChunkSampleBuffer, ControlBuffer, AUDIO_CHUNK_SIZE, MAX_ENGINE_CV_IO_PORTS};
use crate::config::HostConfig;
use crate::error::{EngineError, EngineResult};
use crate::fifo::{MpmcFifo, SpscFifo};
use crate::parameter::{ParameterRange, ParameterValues};
use crate::performance::{PerformanceTimer, ENGINE_TIMING_ID};
use crate::plugins::create_internal_plugin;
use crate::processor::{Processor, ProcessorInfo};
use crate::receiver::AsynchronousEventReceiver;
use crate::rt_event::{
    AsyncDeletePayload, EventIdGenerator, EventStatus, ObjectId, RtEvent,
};
use crate::track::Track;
use crate::transport::{PlayingMode, SyncMode, TimeSignature, Transport, TransportView};
use crate::worker_pool::WorkerPool;

/// Size of the sparse id-indexed realtime processor table.
pub const MAX_RT_PROCESSOR_ID: usize = 1000;

/// Upper bound on tracks in the audio graph; the graph vector is
/// pre-allocated so track insertion on the audio thread never allocates.
pub const MAX_TRACKS: usize = 32;

/// Gate ports map onto bits of a `u32`.
pub const MAX_GATE_PORTS: usize = 32;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

const STATE_STOPPED: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_RUNNING: u8 = 2;

/// Finds clipped samples and sends notifications, at most once per interval
/// (one second of samples) per channel.
pub struct ClipDetector {
    interval: u32,
    input_countdown: Vec<u32>,
    output_countdown: Vec<u32>,
}

impl ClipDetector {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            interval: sample_rate as u32,
            input_countdown: Vec::new(),
            output_countdown: Vec::new(),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.interval = sample_rate as u32;
    }

    pub fn set_input_channels(&mut self, channels: usize) {
        self.input_countdown = vec![0; channels];
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        self.output_countdown = vec![0; channels];
    }

    pub fn detect_clipped_samples(
        &mut self,
        buffer: &ChunkSampleBuffer,
        queue: &MpmcFifo<RtEvent>,
        audio_input: bool,
    ) {
        let countdowns = if audio_input {
            &mut self.input_countdown
        } else {
            &mut self.output_countdown
        };
        let channels = buffer.channel_count().min(countdowns.len());
        for channel in 0..channels {
            let countdown = &mut countdowns[channel];
            *countdown = countdown.saturating_sub(AUDIO_CHUNK_SIZE as u32);
            let clipped = buffer.channel(channel).iter().any(|s| s.abs() > 1.0);
            if clipped && *countdown == 0 {
                queue.push(RtEvent::ClipNotification {
                    channel,
                    input: audio_input,
                });
                *countdown = self.interval;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AudioConnection {
    engine_channel: usize,
    track_channel: usize,
    track: ObjectId,
}

#[derive(Debug, Clone, Copy)]
struct CvInConnection {
    processor: ObjectId,
    parameter: ObjectId,
    cv_port: usize,
    range: ParameterRange,
}

struct CvOutConnection {
    parameter: ObjectId,
    cv_port: usize,
    range: ParameterRange,
    values: Arc<ParameterValues>,
}

#[derive(Debug, Clone, Copy)]
struct GateConnection {
    processor: ObjectId,
    gate_port: usize,
    note: u8,
    channel: u8,
}

/// What a realtime table slot points at: a track in the graph, or a
/// processor inside the given track's chain.
#[derive(Debug, Clone, Copy)]
enum RtSlot {
    Track,
    PluginOf(ObjectId),
}

/// State touched by `process_chunk`. Owned by the audio thread while
/// realtime is enabled; mutated directly by control operations otherwise.
struct RtCore {
    audio_graph: Vec<Box<Track>>,
    realtime_processors: Vec<Option<RtSlot>>,
    in_audio_connections: Vec<AudioConnection>,
    out_audio_connections: Vec<AudioConnection>,
    cv_in_routes: Vec<CvInConnection>,
    cv_out_routes: Vec<CvOutConnection>,
    gate_in_routes: Vec<GateConnection>,
    gate_out_routes: Vec<GateConnection>,
    prev_gate_values: u32,
    outgoing_gate_values: u32,
    transport: Transport,
    clip_detector: ClipDetector,
    input_clip_detection: bool,
    output_clip_detection: bool,
    worker_pool: Option<WorkerPool>,
}

impl RtCore {
    fn track_by_id_mut(&mut self, id: ObjectId) -> Option<&mut Track> {
        self.audio_graph
            .iter_mut()
            .find(|t| t.id() == id)
            .map(|t| t.as_mut())
    }

    fn slot(&self, id: ObjectId) -> Option<RtSlot> {
        self.realtime_processors.get(id as usize).copied().flatten()
    }

    fn occupied_slots(&self) -> usize {
        self.realtime_processors
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    fn insert_track(&mut self, track: Box<Track>) -> Result<(), Box<Track>> {
        let id = track.id() as usize;
        if id >= self.realtime_processors.len()
            || self.realtime_processors[id].is_some()
            || self.audio_graph.len() == self.audio_graph.capacity()
        {
            return Err(track);
        }
        self.realtime_processors[id] = Some(RtSlot::Track);
        self.audio_graph.push(track);
        Ok(())
    }

    fn remove_track(&mut self, id: ObjectId) -> Option<Box<Track>> {
        let index = self.audio_graph.iter().position(|t| t.id() == id)?;
        self.realtime_processors[id as usize] = None;
        Some(self.audio_graph.remove(index))
    }

    fn insert_processor(
        &mut self,
        track_id: ObjectId,
        processor: Box<dyn Processor>,
    ) -> Result<(), Box<dyn Processor>> {
        let id = processor.id() as usize;
        if id >= self.realtime_processors.len() || self.realtime_processors[id].is_some() {
            return Err(processor);
        }
        let Some(track) = self.track_by_id_mut(track_id) else {
            return Err(processor);
        };
        track.add_processor(processor)?;
        self.realtime_processors[id] = Some(RtSlot::PluginOf(track_id));
        Ok(())
    }

    fn remove_processor(
        &mut self,
        track_id: ObjectId,
        processor_id: ObjectId,
    ) -> Option<Box<dyn Processor>> {
        let track = self.track_by_id_mut(track_id)?;
        let processor = track.remove_processor(processor_id)?;
        self.realtime_processors[processor_id as usize] = None;
        Some(processor)
    }

    /// Route an event to the processor its id addresses. Unknown ids are
    /// dropped. String and blob payloads are shipped back for release after
    /// delivery.
    fn route_event(&mut self, event: RtEvent, main_out: &MpmcFifo<RtEvent>) {
        if let Some(id) = event.processor_id() {
            match self.slot(id) {
                Some(RtSlot::Track) => {
                    if let Some(track) = self.track_by_id_mut(id) {
                        track.process_event(event);
                    }
                }
                Some(RtSlot::PluginOf(owner)) => {
                    if let Some(track) = self.track_by_id_mut(owner) {
                        track.process_event_targeted(id, event);
                    }
                }
                None => {}
            }
        }
        match event {
            RtEvent::StringPropertyChange { value, .. } => {
                main_out.push(RtEvent::AsyncDelete {
                    payload: AsyncDeletePayload::String(value),
                });
            }
            RtEvent::BlobPropertyChange { value, .. } => {
                main_out.push(RtEvent::AsyncDelete {
                    payload: AsyncDeletePayload::Blob(value),
                });
            }
            _ => {}
        }
    }

    /// Spec step 3 and 4: turn CV samples and gate edges into parameter and
    /// note events on the addressed processors.
    fn route_cv_gate_ins(&mut self, in_controls: &ControlBuffer, main_out: &MpmcFifo<RtEvent>) {
        for i in 0..self.cv_in_routes.len() {
            let route = self.cv_in_routes[i];
            let value = in_controls.cv_values[route.cv_port];
            self.route_event(
                RtEvent::FloatParameterChange {
                    processor: route.processor,
                    parameter: route.parameter,
                    value: route.range.denormalize(value),
                },
                main_out,
            );
        }

        let changed = in_controls.gate_values ^ self.prev_gate_values;
        if changed != 0 {
            for i in 0..self.gate_in_routes.len() {
                let route = self.gate_in_routes[i];
                let bit = 1u32 << route.gate_port;
                if changed & bit == 0 {
                    continue;
                }
                let event = if in_controls.gate_values & bit != 0 {
                    RtEvent::NoteOn {
                        processor: route.processor,
                        offset: 0,
                        channel: route.channel,
                        note: route.note,
                        velocity: 1.0,
                    }
                } else {
                    RtEvent::NoteOff {
                        processor: route.processor,
                        offset: 0,
                        channel: route.channel,
                        note: route.note,
                        velocity: 1.0,
                    }
                };
                self.route_event(event, main_out);
            }
        }
        self.prev_gate_values = in_controls.gate_values;
    }

    /// Spec step 6.
    fn copy_audio_to_tracks(&mut self, input: &ChunkSampleBuffer) {
        for track in &mut self.audio_graph {
            track.input_buffer_mut().clear();
        }
        for i in 0..self.in_audio_connections.len() {
            let connection = self.in_audio_connections[i];
            if connection.engine_channel >= input.channel_count() {
                continue;
            }
            if let Some(track) = self.track_by_id_mut(connection.track) {
                if connection.track_channel < track.channels() {
                    let samples = input.channel(connection.engine_channel);
                    track
                        .input_buffer_mut()
                        .replace_channel(connection.track_channel, samples);
                }
            }
        }
    }

    /// Spec step 8: summing when several tracks feed one engine channel.
    fn copy_audio_from_tracks(&self, output: &mut ChunkSampleBuffer) {
        for connection in &self.out_audio_connections {
            if connection.engine_channel >= output.channel_count() {
                continue;
            }
            if let Some(track) = self.audio_graph.iter().find(|t| t.id() == connection.track) {
                if connection.track_channel < track.channels() {
                    output.sum_channel(
                        connection.engine_channel,
                        track.output_buffer().channel(connection.track_channel),
                    );
                }
            }
        }
    }

    /// Spec steps 9 and 11: drain track out-queues, turning matching note
    /// events into gate bits and forwarding the rest to the outbound ring.
    fn process_outgoing_events(
        &mut self,
        main_out: &MpmcFifo<RtEvent>,
        out_controls: &mut ControlBuffer,
    ) {
        let gate_routes = &self.gate_out_routes;
        let outgoing_gates = &mut self.outgoing_gate_values;
        for track in &mut self.audio_graph {
            while let Some(event) = track.pop_output_event() {
                let gate_route = match event {
                    RtEvent::NoteOn {
                        processor,
                        channel,
                        note,
                        ..
                    }
                    | RtEvent::NoteOff {
                        processor,
                        channel,
                        note,
                        ..
                    } => gate_routes.iter().find(|r| {
                        r.processor == processor && r.channel == channel && r.note == note
                    }),
                    _ => None,
                };
                match (gate_route, event) {
                    (Some(route), RtEvent::NoteOn { .. }) => {
                        *outgoing_gates |= 1 << route.gate_port;
                    }
                    (Some(route), RtEvent::NoteOff { .. }) => {
                        *outgoing_gates &= !(1 << route.gate_port);
                    }
                    _ => {
                        main_out.push(event);
                    }
                }
            }
        }
        out_controls.gate_values = self.outgoing_gate_values;
    }

    /// Spec step 9: one sample per CV output per chunk.
    fn write_cv_outs(&self, out_controls: &mut ControlBuffer) {
        for route in &self.cv_out_routes {
            let value = route.values.get(route.parameter).unwrap_or(0.0);
            out_controls.cv_values[route.cv_port] = route.range.normalize(value);
        }
    }
}

struct Registry {
    names: HashMap<String, ObjectId>,
    processors: HashMap<ObjectId, ProcessorInfo>,
}

/// The audio engine: owns the track graph and the event plane around it.
///
/// The audio frontend drives it by calling [`AudioEngine::update_time`] and
/// [`AudioEngine::process_chunk`] once per block; everything else is a
/// control operation callable from non-realtime threads.
pub struct AudioEngine {
    core: Mutex<RtCore>,
    state: AtomicU8,
    registry: RwLock<Registry>,
    /// Engine-internal control events (graph mutations, stop).
    internal_in: SpscFifo<RtEvent>,
    /// External events from the dispatcher.
    main_in: SpscFifo<RtEvent>,
    main_out: Arc<MpmcFifo<RtEvent>>,
    control_out: Arc<MpmcFifo<RtEvent>>,
    receiver: AsynchronousEventReceiver,
    /// Serializes producers on the single-producer inbound rings.
    in_queue_lock: Mutex<()>,
    timer: PerformanceTimer,
    transport_view: Arc<TransportView>,
    sample_rate: f32,
    audio_inputs: AtomicUsize,
    audio_outputs: AtomicUsize,
    cv_inputs: AtomicUsize,
    cv_outputs: AtomicUsize,
}

impl AudioEngine {
    pub fn new(sample_rate: f32, rt_cpu_cores: usize) -> Self {
        Self::with_config(HostConfig {
            sample_rate,
            rt_cpu_cores,
            ..Default::default()
        })
        .expect("invalid engine configuration")
    }

    pub fn with_config(config: HostConfig) -> EngineResult<Self> {
        config.validate()?;
        let timer = PerformanceTimer::new(config.sample_rate, AUDIO_CHUNK_SIZE);
        let worker_pool = if config.rt_cpu_cores > 1 {
            Some(WorkerPool::new(config.rt_cpu_cores, timer.clone()))
        } else {
            None
        };
        let transport = Transport::new(config.sample_rate);
        let transport_view = transport.view();
        let main_out = Arc::new(MpmcFifo::new());
        let control_out = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(control_out.clone());
        let core = RtCore {
            audio_graph: Vec::with_capacity(MAX_TRACKS),
            realtime_processors: (0..MAX_RT_PROCESSOR_ID).map(|_| None).collect(),
            in_audio_connections: Vec::new(),
            out_audio_connections: Vec::new(),
            cv_in_routes: Vec::new(),
            cv_out_routes: Vec::new(),
            gate_in_routes: Vec::new(),
            gate_out_routes: Vec::new(),
            prev_gate_values: 0,
            outgoing_gate_values: 0,
            transport,
            clip_detector: ClipDetector::new(config.sample_rate),
            input_clip_detection: config.input_clip_detection,
            output_clip_detection: config.output_clip_detection,
            worker_pool,
        };
        Ok(Self {
            core: Mutex::new(core),
            state: AtomicU8::new(STATE_STOPPED),
            registry: RwLock::new(Registry {
                names: HashMap::new(),
                processors: HashMap::new(),
            }),
            internal_in: SpscFifo::new(),
            main_in: SpscFifo::new(),
            main_out,
            control_out,
            receiver,
            in_queue_lock: Mutex::new(()),
            timer,
            transport_view,
            sample_rate: config.sample_rate,
            audio_inputs: AtomicUsize::new(0),
            audio_outputs: AtomicUsize::new(0),
            cv_inputs: AtomicUsize::new(config.cv_inputs),
            cv_outputs: AtomicUsize::new(config.cv_outputs),
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// True while the engine expects mutations through the event plane.
    pub fn realtime(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_STOPPED
    }

    /// Switch between event-plane and direct mutation mode. Disabling while
    /// the audio callback is live posts a stop event that the audio thread
    /// acknowledges at its next chunk.
    pub fn enable_realtime(&self, enabled: bool) {
        if enabled {
            self.state
                .compare_exchange(
                    STATE_STOPPED,
                    STATE_STARTING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .ok();
            debug!("realtime mode enabled");
        } else {
            match self.state.load(Ordering::Acquire) {
                STATE_RUNNING => {
                    let event_id = EventIdGenerator::new_id();
                    let _guard = self.in_queue_lock.lock();
                    if !self.internal_in.push(RtEvent::StopEngine { event_id }) {
                        warn!("stop event dropped, internal queue full");
                    }
                }
                _ => self.state.store(STATE_STOPPED, Ordering::Release),
            }
        }
    }

    pub fn transport_view(&self) -> Arc<TransportView> {
        self.transport_view.clone()
    }

    pub fn performance_timer(&self) -> &PerformanceTimer {
        &self.timer
    }

    /// Pop one event from the outbound notification ring. Used by the event
    /// dispatcher's drain loop.
    pub fn pop_notification(&self) -> Option<RtEvent> {
        self.main_out.pop()
    }

    /* Audio frontend contract */

    /// Set the current time at the head of an audio chunk.
    pub fn update_time(&self, timestamp: Duration, samples: i64) {
        self.core.lock().transport.set_time(timestamp, samples);
    }

    pub fn set_output_latency(&self, latency: Duration) {
        self.core.lock().transport.set_latency(latency);
    }

    pub fn set_audio_input_channels(&self, channels: usize) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        self.audio_inputs.store(channels, Ordering::Release);
        self.core.lock().clip_detector.set_input_channels(channels);
        Ok(())
    }

    pub fn set_audio_output_channels(&self, channels: usize) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        self.audio_outputs.store(channels, Ordering::Release);
        self.core.lock().clip_detector.set_output_channels(channels);
        Ok(())
    }

    pub fn set_cv_input_channels(&self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CV_IO_PORTS {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.cv_inputs.store(channels, Ordering::Release);
        Ok(())
    }

    pub fn set_cv_output_channels(&self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CV_IO_PORTS {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.cv_outputs.store(channels, Ordering::Release);
        Ok(())
    }

    pub fn audio_input_channels(&self) -> usize {
        self.audio_inputs.load(Ordering::Acquire)
    }

    pub fn audio_output_channels(&self) -> usize {
        self.audio_outputs.load(Ordering::Acquire)
    }

    /// Process one chunk of audio. Called from the audio callback once per
    /// block; never allocates, never blocks on non-realtime code.
    pub fn process_chunk(
        &self,
        input: &ChunkSampleBuffer,
        output: &mut ChunkSampleBuffer,
        in_controls: &ControlBuffer,
        out_controls: &mut ControlBuffer,
    ) {
        let mut core_guard = self.core.lock();
        let core = &mut *core_guard;
        let chunk_timer = self.timer.start_timer();

        // 1 + 2: drain inbound event queues
        while let Some(event) = self.internal_in.pop() {
            self.handle_rt_event_locked(core, event);
        }
        while let Some(event) = self.main_in.pop() {
            self.handle_rt_event_locked(core, event);
        }

        // 3 + 4: control voltage and gate inputs
        core.route_cv_gate_ins(in_controls, &self.main_out);

        // 5: input clip detection
        if core.input_clip_detection {
            core.clip_detector
                .detect_clipped_samples(input, &self.main_out, true);
        }

        // 6: engine inputs into track inputs
        core.copy_audio_to_tracks(input);

        // 7: the track graph
        if let Some(pool) = &core.worker_pool {
            pool.process_tracks(&mut core.audio_graph);
        } else {
            for track in &mut core.audio_graph {
                let track_timer = self.timer.start_timer();
                track.render();
                self.timer.stop_timer(track_timer, track.id());
            }
        }

        // 8: track outputs into engine outputs
        output.clear();
        core.copy_audio_from_tracks(output);

        // 9 + 11: outgoing events, gate and CV outputs
        core.process_outgoing_events(&self.main_out, out_controls);
        core.write_cv_outs(out_controls);

        // 10: output clip detection
        if core.output_clip_detection {
            core.clip_detector
                .detect_clipped_samples(output, &self.main_out, false);
        }

        // 12: advance musical time
        core.transport.advance_chunk();

        self.timer.stop_timer(chunk_timer, ENGINE_TIMING_ID);
        self.state
            .compare_exchange(
                STATE_STARTING,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok();
    }

    /// Process an event in the realtime context. Must only be called from
    /// the audio thread, before `process_chunk`.
    pub fn send_rt_event(&self, event: RtEvent) {
        let mut core = self.core.lock();
        self.handle_rt_event_locked(&mut core, event);
    }

    /// Queue an event for the realtime thread from a non-realtime context.
    pub fn send_async_event(&self, event: RtEvent) -> EngineResult<()> {
        let _guard = self.in_queue_lock.lock();
        if self.main_in.push(event) {
            Ok(())
        } else {
            Err(EngineError::QueueFull)
        }
    }

    fn handle_rt_event_locked(&self, core: &mut RtCore, event: RtEvent) {
        if core.transport.handle_event(&event) {
            return;
        }
        match event {
            RtEvent::StopEngine { event_id } => {
                self.state.store(STATE_STOPPED, Ordering::Release);
                self.complete(event_id, EventStatus::HandledOk);
            }
            RtEvent::InsertTrack { event_id, track } => {
                let track = unsafe { Box::from_raw(track) };
                match core.insert_track(track) {
                    Ok(()) => self.complete(event_id, EventStatus::HandledOk),
                    Err(track) => {
                        self.main_out.push(RtEvent::AsyncDelete {
                            payload: AsyncDeletePayload::Track(Box::into_raw(track)),
                        });
                        self.complete(event_id, EventStatus::Error);
                    }
                }
            }
            RtEvent::RemoveTrack { event_id, track } => match core.remove_track(track) {
                Some(track) => {
                    self.main_out.push(RtEvent::AsyncDelete {
                        payload: AsyncDeletePayload::Track(Box::into_raw(track)),
                    });
                    self.complete(event_id, EventStatus::HandledOk);
                }
                None => self.complete(event_id, EventStatus::Error),
            },
            RtEvent::InsertProcessor {
                event_id,
                track,
                processor,
            } => {
                let processor = unsafe { Box::from_raw(processor) };
                match core.insert_processor(track, processor) {
                    Ok(()) => self.complete(event_id, EventStatus::HandledOk),
                    Err(processor) => {
                        self.main_out.push(RtEvent::AsyncDelete {
                            payload: AsyncDeletePayload::Processor(Box::into_raw(processor)),
                        });
                        self.complete(event_id, EventStatus::Error);
                    }
                }
            }
            RtEvent::RemoveProcessor {
                event_id,
                track,
                processor,
            } => match core.remove_processor(track, processor) {
                Some(processor) => {
                    self.main_out.push(RtEvent::AsyncDelete {
                        payload: AsyncDeletePayload::Processor(Box::into_raw(processor)),
                    });
                    self.complete(event_id, EventStatus::HandledOk);
                }
                None => self.complete(event_id, EventStatus::Error),
            },
            other => core.route_event(other, &self.main_out),
        }
    }

    fn complete(&self, event_id: u64, status: EventStatus) {
        self.control_out
            .push(RtEvent::EventCompletion { event_id, status });
    }

    /* Track and processor management */

    pub fn create_track(&self, name: &str, channel_count: usize) -> EngineResult<ObjectId> {
        if channel_count == 0 || channel_count > 2 {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.register_and_insert_track(Track::new(name, channel_count))
    }

    pub fn create_multibus_track(
        &self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<ObjectId> {
        if input_busses == 0 || output_busses == 0 || input_busses.max(output_busses) > 4 {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.register_and_insert_track(Track::new_multibus(name, input_busses, output_busses))
    }

    fn register_and_insert_track(&self, mut track: Track) -> EngineResult<ObjectId> {
        track.set_sample_rate(self.sample_rate);
        let id = track.id();
        if id as usize >= MAX_RT_PROCESSOR_ID {
            return Err(EngineError::InvalidPlugin);
        }
        {
            let mut registry = self.registry.write();
            if registry.names.contains_key(track.name()) {
                return Err(EngineError::AlreadyExists);
            }
            let info = ProcessorInfo::from_processor(&track, None);
            registry.names.insert(info.name.clone(), id);
            registry.processors.insert(id, info);
        }
        let track = Box::new(track);
        if self.realtime() {
            let event_id = EventIdGenerator::new_id();
            let raw = Box::into_raw(track);
            let pushed = {
                let _guard = self.in_queue_lock.lock();
                self.internal_in.push(RtEvent::InsertTrack {
                    event_id,
                    track: raw,
                })
            };
            if !pushed {
                drop(unsafe { Box::from_raw(raw) });
                self.deregister(id);
                return Err(EngineError::QueueFull);
            }
            if !self.receiver.wait_for_response(event_id, RESPONSE_TIMEOUT) {
                return Err(EngineError::Timeout);
            }
        } else if let Err(track) = self.core.lock().insert_track(track) {
            drop(track);
            self.deregister(id);
            return Err(EngineError::InvalidPlugin);
        }
        debug!(track = id, "track created");
        Ok(id)
    }

    pub fn delete_track(&self, track_name: &str) -> EngineResult<()> {
        let id = {
            let registry = self.registry.read();
            let id = *registry
                .names
                .get(track_name)
                .ok_or(EngineError::InvalidTrack)?;
            let info = registry.processors.get(&id).ok_or(EngineError::InvalidTrack)?;
            if !info.is_track {
                return Err(EngineError::InvalidTrack);
            }
            if registry
                .processors
                .values()
                .any(|p| p.owner_track == Some(id))
            {
                // The track must be emptied first
                return Err(EngineError::NotSupported);
            }
            id
        };
        if self.realtime() {
            let event_id = EventIdGenerator::new_id();
            let pushed = {
                let _guard = self.in_queue_lock.lock();
                self.internal_in
                    .push(RtEvent::RemoveTrack { event_id, track: id })
            };
            if !pushed {
                return Err(EngineError::QueueFull);
            }
            if !self.receiver.wait_for_response(event_id, RESPONSE_TIMEOUT) {
                return Err(EngineError::Timeout);
            }
        } else if self.core.lock().remove_track(id).is_none() {
            return Err(EngineError::InvalidTrack);
        }
        self.deregister(id);
        debug!(track = id, "track deleted");
        Ok(())
    }

    pub fn add_plugin_to_track(
        &self,
        track_name: &str,
        plugin_uid: &str,
        plugin_name: &str,
        _plugin_path: &str,
        plugin_type: crate::event::PluginType,
    ) -> EngineResult<ObjectId> {
        if plugin_type != crate::event::PluginType::Internal {
            // External plugin loaders live outside the core
            return Err(EngineError::InvalidPlugin);
        }
        let track_id = self.track_id_from_name(track_name)?;
        let plugin = create_internal_plugin(plugin_uid, plugin_name)
            .ok_or(EngineError::InvalidPluginUid)?;
        let id = plugin.id();
        if id as usize >= MAX_RT_PROCESSOR_ID {
            return Err(EngineError::InvalidPlugin);
        }
        {
            let mut registry = self.registry.write();
            if registry.names.contains_key(plugin_name) {
                return Err(EngineError::AlreadyExists);
            }
            let info = ProcessorInfo::from_processor(plugin.as_ref(), Some(track_id));
            registry.names.insert(info.name.clone(), id);
            registry.processors.insert(id, info);
        }
        if self.realtime() {
            let event_id = EventIdGenerator::new_id();
            let raw = Box::into_raw(plugin);
            let pushed = {
                let _guard = self.in_queue_lock.lock();
                self.internal_in.push(RtEvent::InsertProcessor {
                    event_id,
                    track: track_id,
                    processor: raw,
                })
            };
            if !pushed {
                drop(unsafe { Box::from_raw(raw) });
                self.deregister(id);
                return Err(EngineError::QueueFull);
            }
            if !self.receiver.wait_for_response(event_id, RESPONSE_TIMEOUT) {
                return Err(EngineError::Timeout);
            }
        } else if self.core.lock().insert_processor(track_id, plugin).is_err() {
            self.deregister(id);
            return Err(EngineError::InvalidPlugin);
        }
        debug!(processor = id, track = track_id, "plugin added");
        Ok(id)
    }

    pub fn remove_plugin_from_track(
        &self,
        track_name: &str,
        plugin_name: &str,
    ) -> EngineResult<()> {
        let track_id = self.track_id_from_name(track_name)?;
        let plugin_id = {
            let registry = self.registry.read();
            let id = *registry
                .names
                .get(plugin_name)
                .ok_or(EngineError::InvalidName)?;
            let info = registry
                .processors
                .get(&id)
                .ok_or(EngineError::InvalidName)?;
            if info.owner_track != Some(track_id) {
                return Err(EngineError::InvalidName);
            }
            id
        };
        if self.realtime() {
            let event_id = EventIdGenerator::new_id();
            let pushed = {
                let _guard = self.in_queue_lock.lock();
                self.internal_in.push(RtEvent::RemoveProcessor {
                    event_id,
                    track: track_id,
                    processor: plugin_id,
                })
            };
            if !pushed {
                return Err(EngineError::QueueFull);
            }
            if !self.receiver.wait_for_response(event_id, RESPONSE_TIMEOUT) {
                return Err(EngineError::Timeout);
            }
        } else if self
            .core
            .lock()
            .remove_processor(track_id, plugin_id)
            .is_none()
        {
            return Err(EngineError::InvalidName);
        }
        self.deregister(plugin_id);
        Ok(())
    }

    fn deregister(&self, id: ObjectId) {
        let mut registry = self.registry.write();
        if let Some(info) = registry.processors.remove(&id) {
            registry.names.remove(&info.name);
        }
    }

    fn track_id_from_name(&self, name: &str) -> EngineResult<ObjectId> {
        let registry = self.registry.read();
        let id = *registry.names.get(name).ok_or(EngineError::InvalidTrack)?;
        match registry.processors.get(&id) {
            Some(info) if info.is_track => Ok(id),
            _ => Err(EngineError::InvalidTrack),
        }
    }

    /* Queries */

    pub fn processor_id_from_name(&self, name: &str) -> EngineResult<ObjectId> {
        self.registry
            .read()
            .names
            .get(name)
            .copied()
            .ok_or(EngineError::InvalidName)
    }

    pub fn processor_name_from_id(&self, id: ObjectId) -> EngineResult<String> {
        self.registry
            .read()
            .processors
            .get(&id)
            .map(|info| info.name.clone())
            .ok_or(EngineError::InvalidName)
    }

    pub fn parameter_id_from_name(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> EngineResult<ObjectId> {
        let id = self.processor_id_from_name(processor_name)?;
        self.registry
            .read()
            .processors
            .get(&id)
            .and_then(|info| info.parameter_id_from_name(parameter_name))
            .ok_or(EngineError::InvalidParameter)
    }

    pub fn parameter_name_from_id(
        &self,
        processor_name: &str,
        parameter_id: ObjectId,
    ) -> EngineResult<String> {
        let id = self.processor_id_from_name(processor_name)?;
        self.registry
            .read()
            .processors
            .get(&id)
            .and_then(|info| info.parameter_name_from_id(parameter_id).map(String::from))
            .ok_or(EngineError::InvalidParameter)
    }

    pub fn parameter_value(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
    ) -> EngineResult<f32> {
        self.registry
            .read()
            .processors
            .get(&processor_id)
            .ok_or(EngineError::InvalidName)?
            .values
            .get(parameter_id)
            .ok_or(EngineError::InvalidParameter)
    }

    pub fn processor_info(&self, id: ObjectId) -> EngineResult<ProcessorInfo> {
        self.registry
            .read()
            .processors
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvalidName)
    }

    pub fn all_processors(&self) -> Vec<ProcessorInfo> {
        self.registry.read().processors.values().cloned().collect()
    }

    pub fn all_tracks(&self) -> Vec<ProcessorInfo> {
        let mut tracks: Vec<ProcessorInfo> = self
            .registry
            .read()
            .processors
            .values()
            .filter(|info| info.is_track)
            .cloned()
            .collect();
        tracks.sort_by_key(|info| info.id);
        tracks
    }

    pub fn n_channels_in_track(&self, index: usize) -> EngineResult<usize> {
        self.core
            .lock()
            .audio_graph
            .get(index)
            .map(|t| t.channels())
            .ok_or(EngineError::InvalidTrack)
    }

    /// Number of occupied slots in the realtime processor table.
    pub fn realtime_processor_count(&self) -> usize {
        self.core.lock().occupied_slots()
    }

    /* Connections */

    pub fn connect_audio_input_channel(
        &self,
        input_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        let track = self.track_id_from_name(track_name)?;
        let track_channels = self.processor_info(track)?.input_channels;
        if input_channel >= self.audio_inputs.load(Ordering::Acquire)
            || track_channel >= track_channels
        {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.core.lock().in_audio_connections.push(AudioConnection {
            engine_channel: input_channel,
            track_channel,
            track,
        });
        Ok(())
    }

    pub fn connect_audio_output_channel(
        &self,
        output_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        let track = self.track_id_from_name(track_name)?;
        let track_channels = self.processor_info(track)?.output_channels;
        if output_channel >= self.audio_outputs.load(Ordering::Acquire)
            || track_channel >= track_channels
        {
            return Err(EngineError::InvalidChannelIndex);
        }
        self.core
            .lock()
            .out_audio_connections
            .push(AudioConnection {
                engine_channel: output_channel,
                track_channel,
                track,
            });
        Ok(())
    }

    /// Connect a stereo pair: engine bus n covers channels 2n and 2n+1.
    pub fn connect_audio_input_bus(
        &self,
        input_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.connect_audio_input_channel(2 * input_bus, 2 * track_bus, track_name)?;
        self.connect_audio_input_channel(2 * input_bus + 1, 2 * track_bus + 1, track_name)
    }

    pub fn connect_audio_output_bus(
        &self,
        output_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.connect_audio_output_channel(2 * output_bus, 2 * track_bus, track_name)?;
        self.connect_audio_output_channel(2 * output_bus + 1, 2 * track_bus + 1, track_name)
    }

    pub fn connect_cv_to_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        cv_input_id: usize,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        if cv_input_id >= self.cv_inputs.load(Ordering::Acquire) {
            return Err(EngineError::InvalidChannelIndex);
        }
        let processor = self.processor_id_from_name(processor_name)?;
        let info = self.processor_info(processor)?;
        let parameter = info
            .parameter_id_from_name(parameter_name)
            .ok_or(EngineError::InvalidParameter)?;
        let range = info.descriptors[parameter as usize].range;
        self.core.lock().cv_in_routes.push(CvInConnection {
            processor,
            parameter,
            cv_port: cv_input_id,
            range,
        });
        Ok(())
    }

    pub fn connect_cv_from_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        cv_output_id: usize,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        if cv_output_id >= self.cv_outputs.load(Ordering::Acquire) {
            return Err(EngineError::InvalidChannelIndex);
        }
        let processor = self.processor_id_from_name(processor_name)?;
        let info = self.processor_info(processor)?;
        let parameter = info
            .parameter_id_from_name(parameter_name)
            .ok_or(EngineError::InvalidParameter)?;
        let range = info.descriptors[parameter as usize].range;
        self.core.lock().cv_out_routes.push(CvOutConnection {
            parameter,
            cv_port: cv_output_id,
            range,
            values: info.values,
        });
        Ok(())
    }

    pub fn connect_gate_to_processor(
        &self,
        processor_name: &str,
        gate_input_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        if gate_input_id >= MAX_GATE_PORTS || note_no > 127 || channel > 15 {
            return Err(EngineError::InvalidChannelIndex);
        }
        let processor = self.processor_id_from_name(processor_name)?;
        self.core.lock().gate_in_routes.push(GateConnection {
            processor,
            gate_port: gate_input_id,
            note: note_no,
            channel,
        });
        Ok(())
    }

    pub fn connect_gate_from_processor(
        &self,
        processor_name: &str,
        gate_output_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        if self.realtime() {
            return Err(EngineError::WrongState);
        }
        if gate_output_id >= MAX_GATE_PORTS || note_no > 127 || channel > 15 {
            return Err(EngineError::InvalidChannelIndex);
        }
        let processor = self.processor_id_from_name(processor_name)?;
        self.core.lock().gate_out_routes.push(GateConnection {
            processor,
            gate_port: gate_output_id,
            note: note_no,
            channel,
        });
        Ok(())
    }

    pub fn connect_gate_to_sync(&self, _gate_input_id: usize, _ppq_ticks: u32) -> EngineResult<()> {
        Err(EngineError::NotSupported)
    }

    pub fn connect_sync_to_gate(&self, _gate_output_id: usize, _ppq_ticks: u32) -> EngineResult<()> {
        Err(EngineError::NotSupported)
    }

    /* Transport control */

    pub fn set_tempo(&self, tempo: f32) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::Tempo { tempo })
        } else {
            self.core.lock().transport.set_tempo(tempo);
            Ok(())
        }
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::TimeSignature { signature })
        } else {
            self.core.lock().transport.set_time_signature(signature);
            Ok(())
        }
    }

    pub fn set_transport_mode(&self, mode: PlayingMode) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::SetPlayingMode { mode })
        } else {
            self.core.lock().transport.set_playing_mode(mode);
            Ok(())
        }
    }

    pub fn set_tempo_sync_mode(&self, mode: SyncMode) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::SetSyncMode { mode })
        } else {
            self.core.lock().transport.set_sync_mode(mode);
            Ok(())
        }
    }

    /* Clip detection */

    pub fn enable_input_clip_detection(&self, enabled: bool) {
        self.core.lock().input_clip_detection = enabled;
    }

    pub fn enable_output_clip_detection(&self, enabled: bool) {
        self.core.lock().output_clip_detection = enabled;
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        // Drain queued ownership-transfer events so their payloads are not
        // leaked if the dispatcher never saw them.
        while let Some(event) = self.main_out.pop() {
            if let RtEvent::AsyncDelete { payload } = event {
                unsafe { drop_payload(payload) };
            }
        }
        let drain = |fifo: &SpscFifo<RtEvent>| {
            while let Some(event) = fifo.pop() {
                match event {
                    RtEvent::InsertTrack { track, .. } => drop(unsafe { Box::from_raw(track) }),
                    RtEvent::InsertProcessor { processor, .. } => {
                        drop(unsafe { Box::from_raw(processor) })
                    }
                    RtEvent::StringPropertyChange { value, .. } => {
                        drop(unsafe { Box::from_raw(value) })
                    }
                    RtEvent::BlobPropertyChange { value, .. } => {
                        drop(unsafe { value.into_boxed_slice() })
                    }
                    _ => {}
                }
            }
        };
        drain(&self.internal_in);
        drain(&self.main_in);
    }
}

/// Reclaim and drop a payload handed back from the audio thread.
///
/// # Safety
/// The payload must not have been reclaimed before.
pub unsafe fn drop_payload(payload: AsyncDeletePayload) {
    match payload {
        AsyncDeletePayload::String(ptr) => drop(Box::from_raw(ptr)),
        AsyncDeletePayload::Blob(blob) => drop(blob.into_boxed_slice()),
        AsyncDeletePayload::Processor(ptr) => drop(Box::from_raw(ptr)),
        AsyncDeletePayload::Track(ptr) => drop(Box::from_raw(ptr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PluginType;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn engine_with_track() -> (AudioEngine, ObjectId) {
        let engine = AudioEngine::new(SAMPLE_RATE, 1);
        engine.set_audio_input_channels(2).unwrap();
        engine.set_audio_output_channels(2).unwrap();
        let track = engine.create_track("t", 2).unwrap();
        engine.connect_audio_input_channel(0, 0, "t").unwrap();
        engine.connect_audio_input_channel(1, 1, "t").unwrap();
        engine.connect_audio_output_channel(0, 0, "t").unwrap();
        engine.connect_audio_output_channel(1, 1, "t").unwrap();
        (engine, track)
    }

    fn process_silence(engine: &AudioEngine) {
        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
    }

    #[test]
    fn test_passthrough_track_processing() {
        let (engine, _) = engine_with_track();
        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(output.channel(0).iter().all(|&s| s == 0.5));
        assert!(output.channel(1).iter().all(|&s| s == -0.5));
    }

    #[test]
    fn test_registry_and_rt_table_agree() {
        let (engine, track_id) = engine_with_track();
        assert_eq!(engine.all_processors().len(), 1);
        assert_eq!(engine.realtime_processor_count(), 1);

        let plugin_id = engine
            .add_plugin_to_track("t", "core.gain", "g", "", PluginType::Internal)
            .unwrap();
        assert_eq!(engine.all_processors().len(), 2);
        assert_eq!(engine.realtime_processor_count(), 2);
        assert_eq!(engine.processor_name_from_id(plugin_id).unwrap(), "g");
        assert_eq!(engine.processor_id_from_name("t").unwrap(), track_id);

        engine.remove_plugin_from_track("t", "g").unwrap();
        engine.delete_track("t").unwrap();
        assert_eq!(engine.all_processors().len(), 0);
        assert_eq!(engine.realtime_processor_count(), 0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (engine, _) = engine_with_track();
        assert_eq!(engine.create_track("t", 2), Err(EngineError::AlreadyExists));
    }

    #[test]
    fn test_unknown_plugin_uid_rejected() {
        let (engine, _) = engine_with_track();
        assert_eq!(
            engine.add_plugin_to_track("t", "core.nope", "x", "", PluginType::Internal),
            Err(EngineError::InvalidPluginUid)
        );
        assert_eq!(
            engine.add_plugin_to_track("t", "core.gain", "x", "", PluginType::Vst2x),
            Err(EngineError::InvalidPlugin)
        );
    }

    #[test]
    fn test_graph_mutation_through_event_plane() {
        let engine = Arc::new(AudioEngine::new(SAMPLE_RATE, 1));
        engine.set_audio_input_channels(2).unwrap();
        engine.set_audio_output_channels(2).unwrap();
        engine.enable_realtime(true);

        // A stand-in audio callback pumping chunks in the background
        let pump_engine = engine.clone();
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let pump_running = running.clone();
        let pump = std::thread::spawn(move || {
            while pump_running.load(Ordering::Acquire) {
                process_silence(&pump_engine);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let track_id = engine.create_track("live", 2).unwrap();
        assert_eq!(engine.realtime_processor_count(), 1);
        let plugin_id = engine
            .add_plugin_to_track("live", "core.gain", "g", "", PluginType::Internal)
            .unwrap();
        assert!(plugin_id > track_id);
        assert_eq!(engine.realtime_processor_count(), 2);

        engine.remove_plugin_from_track("live", "g").unwrap();
        engine.delete_track("live").unwrap();
        assert_eq!(engine.realtime_processor_count(), 0);

        running.store(false, Ordering::Release);
        pump.join().unwrap();
    }

    #[test]
    fn test_tempo_event_applied_at_next_chunk() {
        let (engine, _) = engine_with_track();
        engine.enable_realtime(true);
        engine.set_tempo(140.0).unwrap();
        let view = engine.transport_view();
        assert_eq!(view.tempo(), crate::transport::DEFAULT_TEMPO);
        process_silence(&engine);
        assert_eq!(view.tempo(), 140.0);
    }

    #[test]
    fn test_queue_full_backpressure() {
        let (engine, track_id) = engine_with_track();
        engine.enable_realtime(true);
        // Fill the main-in ring to capacity
        for _ in 0..engine.main_in.capacity() {
            engine
                .send_async_event(RtEvent::FloatParameterChange {
                    processor: track_id,
                    parameter: 0,
                    value: 1.0,
                })
                .unwrap();
        }
        assert_eq!(
            engine.send_async_event(RtEvent::FloatParameterChange {
                processor: track_id,
                parameter: 0,
                value: 1.0,
            }),
            Err(EngineError::QueueFull)
        );
        // Draining the ring makes room again
        process_silence(&engine);
        assert!(engine
            .send_async_event(RtEvent::FloatParameterChange {
                processor: track_id,
                parameter: 0,
                value: 1.0,
            })
            .is_ok());
    }

    #[test]
    fn test_sample_count_monotonic_across_chunks() {
        let (engine, _) = engine_with_track();
        let view = engine.transport_view();
        let mut previous = view.current_samples();
        for _ in 0..8 {
            process_silence(&engine);
            let current = view.current_samples();
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn test_clip_detection_fires_once_per_interval() {
        let (engine, _) = engine_with_track();
        engine.enable_input_clip_detection(true);
        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.5);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();

        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        match engine.pop_notification() {
            Some(RtEvent::ClipNotification { channel, input }) => {
                assert_eq!(channel, 0);
                assert!(input);
            }
            other => panic!("expected clip notification, got {other:?}"),
        }
        // Within the same interval no further notification fires
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(engine.pop_notification().is_none());
    }

    #[test]
    fn test_clip_threshold_is_strictly_above_full_scale() {
        let (engine, _) = engine_with_track();
        engine.enable_input_clip_detection(true);
        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(engine.pop_notification().is_none());
    }

    #[test]
    fn test_cv_routing_to_parameter() {
        let (engine, _) = engine_with_track();
        engine.set_cv_input_channels(2).unwrap();
        let gain_id = engine
            .add_plugin_to_track("t", "core.gain", "g", "", PluginType::Internal)
            .unwrap();
        engine.connect_cv_to_parameter("g", "gain", 1).unwrap();

        let mut controls = ControlBuffer::default();
        controls.cv_values[1] = 0.25; // denormalized onto [0, 2] -> 0.5
        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);

        assert_eq!(engine.parameter_value(gain_id, 0).unwrap(), 0.5);
    }

    #[test]
    fn test_gate_input_edges_become_notes() {
        let (engine, track_id) = engine_with_track();
        engine.connect_gate_to_processor("t", 0, 60, 0).unwrap();

        let mut controls = ControlBuffer::default();
        controls.set_gate(0, true);
        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);

        // The note-on was mirrored through the track's out-queue
        match engine.pop_notification() {
            Some(RtEvent::NoteOn {
                processor, note, ..
            }) => {
                assert_eq!(processor, track_id);
                assert_eq!(note, 60);
            }
            other => panic!("expected note on, got {other:?}"),
        }

        // No edge, no event
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(engine.pop_notification().is_none());

        controls.set_gate(0, false);
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(matches!(
            engine.pop_notification(),
            Some(RtEvent::NoteOff { .. })
        ));
    }

    #[test]
    fn test_gate_output_follows_note_events() {
        let (engine, track_id) = engine_with_track();
        engine.connect_gate_from_processor("t", 2, 60, 0).unwrap();

        engine.send_rt_event(RtEvent::NoteOn {
            processor: track_id,
            offset: 0,
            channel: 0,
            note: 60,
            velocity: 1.0,
        });
        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        let controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(out_controls.gate(2));

        engine.send_rt_event(RtEvent::NoteOff {
            processor: track_id,
            offset: 0,
            channel: 0,
            note: 60,
            velocity: 0.0,
        });
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);
        assert!(!out_controls.gate(2));
    }

    #[test]
    fn test_connections_rejected_while_realtime() {
        let (engine, _) = engine_with_track();
        engine.enable_realtime(true);
        assert_eq!(
            engine.connect_audio_input_channel(0, 0, "t"),
            Err(EngineError::WrongState)
        );
        assert_eq!(
            engine.set_audio_input_channels(4),
            Err(EngineError::WrongState)
        );
    }

    #[test]
    fn test_invalid_connection_arguments() {
        let (engine, _) = engine_with_track();
        assert_eq!(
            engine.connect_audio_input_channel(7, 0, "t"),
            Err(EngineError::InvalidChannelIndex)
        );
        assert_eq!(
            engine.connect_audio_input_channel(0, 7, "t"),
            Err(EngineError::InvalidChannelIndex)
        );
        assert_eq!(
            engine.connect_audio_input_channel(0, 0, "missing"),
            Err(EngineError::InvalidTrack)
        );
        assert_eq!(
            engine.connect_gate_to_sync(0, 24),
            Err(EngineError::NotSupported)
        );
    }

    #[test]
    fn test_multicore_matches_single_core() {
        let build = |cores: usize, suffix: &str| {
            let engine = AudioEngine::new(SAMPLE_RATE, cores);
            engine.set_audio_input_channels(2).unwrap();
            engine.set_audio_output_channels(2).unwrap();
            let a = format!("a{suffix}");
            let b = format!("b{suffix}");
            engine.create_track(&a, 1).unwrap();
            engine.create_track(&b, 1).unwrap();
            engine.connect_audio_input_channel(0, 0, &a).unwrap();
            engine.connect_audio_input_channel(1, 0, &b).unwrap();
            engine.connect_audio_output_channel(0, 0, &a).unwrap();
            engine.connect_audio_output_channel(1, 0, &b).unwrap();
            engine
        };
        let single = build(1, "s");
        let multi = build(2, "m");

        let mut input = ChunkSampleBuffer::new(2);
        for (i, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = (i as f32 * 0.1).sin();
        }
        for (i, sample) in input.channel_mut(1).iter_mut().enumerate() {
            *sample = (i as f32 * 0.05).cos();
        }

        let controls = ControlBuffer::default();
        let mut single_out = ChunkSampleBuffer::new(2);
        let mut multi_out = ChunkSampleBuffer::new(2);
        let mut out_controls = ControlBuffer::default();
        single.process_chunk(&input, &mut single_out, &controls, &mut out_controls);
        multi.process_chunk(&input, &mut multi_out, &controls, &mut out_controls);

        assert_eq!(single_out.channel(0), multi_out.channel(0));
        assert_eq!(single_out.channel(1), multi_out.channel(1));
    }
}
