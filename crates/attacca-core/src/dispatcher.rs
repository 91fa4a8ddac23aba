//! The non-realtime event dispatcher.
//!
//! A background thread drains typed events from its inbox and decides per
//! event: convert to an [`RtEvent`] and push onto the engine's main-in ring
//! (realtime on), process directly against the engine (realtime off),
//! execute engine mutations synchronously, or hand long-running work to the
//! async worker thread. The same loop drains the engine's outbound ring,
//! reclaiming ownership payloads and fanning notifications out to registered
//! posters.
//!
//! A full main-in ring is backpressure: the realtime event is parked in a
//! retry queue and re-sent on following ticks, and only fails (through the
//! originating event's completion callback) after the retry budget is spent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::AudioEngine;
use crate::error::EngineError;
use crate::event::{
    AsyncWorkEvent, EngineEvent, Event, EventPayload, CompletionCallback, IMMEDIATE_PROCESS,
};
use crate::rt_event::{AsyncDeletePayload, EventStatus, RtEvent};

const TICK_INTERVAL: Duration = Duration::from_millis(1);
const MAX_SEND_RETRIES: u32 = 100;

/// A sink for events leaving the engine (notifications, routed keyboard
/// events). The MIDI dispatcher's output side is one of these.
pub trait EventPoster: Send {
    fn process(&mut self, event: &Event);
}

/// Cloneable handle used by event producers (MIDI dispatcher, control
/// surfaces, the host facade) to queue events for dispatch.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Create a detached sender/receiver pair, used by unit tests that want
    /// to capture posted events without running a dispatcher.
    pub fn channel() -> (Self, Receiver<Event>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn post(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

struct PendingRtEvent {
    event: RtEvent,
    completion: Option<CompletionCallback>,
    attempts: u32,
}

struct DispatcherLoop {
    engine: Arc<AudioEngine>,
    inbox: Receiver<Event>,
    worker_tx: Sender<Event>,
    posters: Arc<Mutex<Vec<Box<dyn EventPoster>>>>,
    running: Arc<AtomicBool>,
    retry_queue: VecDeque<PendingRtEvent>,
}

impl DispatcherLoop {
    fn run(mut self) {
        debug!("event dispatcher started");
        while self.running.load(Ordering::Acquire) {
            match self.inbox.recv_timeout(TICK_INTERVAL) {
                Ok(event) => self.handle_event(event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(event) = self.inbox.try_recv() {
                self.handle_event(event);
            }
            self.drain_outbound();
            self.retry_pending();
        }
        debug!("event dispatcher stopped");
    }

    fn handle_event(&mut self, mut event: Event) {
        if event.is_async_work_event() {
            let _ = self.worker_tx.send(event);
            return;
        }
        if event.is_engine_event() {
            let status = self.execute_engine_event(&event);
            finish(event, status);
            return;
        }
        if event.maps_to_rt_event() {
            let completion = event.take_completion();
            let rt_event = match event.to_rt_event(0) {
                Some(rt_event) => rt_event,
                None => {
                    complete(completion, EventStatus::Error);
                    return;
                }
            };
            if self.engine.realtime() {
                self.send_or_park(rt_event, completion);
            } else {
                self.engine.send_rt_event(rt_event);
                complete(completion, EventStatus::HandledOk);
            }
            return;
        }
        // Program support lives in the (external) plugin shims
        if matches!(event.payload(), EventPayload::ProgramChange { .. }) {
            finish(event, EventStatus::NotHandled);
        } else {
            self.post_to_posters(&event);
            finish(event, EventStatus::HandledOk);
        }
    }

    fn send_or_park(&mut self, rt_event: RtEvent, completion: Option<CompletionCallback>) {
        match self.engine.send_async_event(rt_event) {
            Ok(()) => complete(completion, EventStatus::HandledOk),
            Err(EngineError::QueueFull) => {
                self.retry_queue.push_back(PendingRtEvent {
                    event: rt_event,
                    completion,
                    attempts: 0,
                });
            }
            Err(_) => complete(completion, EventStatus::Error),
        }
    }

    fn retry_pending(&mut self) {
        for _ in 0..self.retry_queue.len() {
            let mut pending = match self.retry_queue.pop_front() {
                Some(pending) => pending,
                None => return,
            };
            match self.engine.send_async_event(pending.event) {
                Ok(()) => complete(pending.completion, EventStatus::HandledOk),
                Err(_) => {
                    pending.attempts += 1;
                    if pending.attempts >= MAX_SEND_RETRIES {
                        warn!("dropping realtime event after {MAX_SEND_RETRIES} retries");
                        reclaim_rt_payload(pending.event);
                        complete(pending.completion, EventStatus::QueueFull);
                    } else {
                        self.retry_queue.push_back(pending);
                    }
                }
            }
        }
    }

    fn execute_engine_event(&self, event: &Event) -> EventStatus {
        let EventPayload::Engine(engine_event) = event.payload() else {
            return EventStatus::Error;
        };
        let result = match engine_event {
            EngineEvent::AddTrack { name, channels } => self
                .engine
                .create_track(name, *channels)
                .map(|_| ()),
            EngineEvent::AddMultibusTrack {
                name,
                input_busses,
                output_busses,
            } => self
                .engine
                .create_multibus_track(name, *input_busses, *output_busses)
                .map(|_| ()),
            EngineEvent::RemoveTrack { name } => self.engine.delete_track(name),
            EngineEvent::AddProcessor {
                track,
                uid,
                name,
                file,
                plugin_type,
            } => self
                .engine
                .add_plugin_to_track(track, uid, name, file, *plugin_type)
                .map(|_| ()),
            EngineEvent::RemoveProcessor { name, track } => {
                self.engine.remove_plugin_from_track(track, name)
            }
        };
        match result {
            Ok(()) => EventStatus::HandledOk,
            Err(error) => {
                debug!(%error, "engine event failed");
                EventStatus::Error
            }
        }
    }

    fn drain_outbound(&mut self) {
        while let Some(rt_event) = self.engine.pop_notification() {
            match rt_event {
                RtEvent::AsyncDelete { payload } => {
                    let work = unsafe { payload_to_work(payload) };
                    let _ = self
                        .worker_tx
                        .send(Event::new(EventPayload::AsyncWork(work), IMMEDIATE_PROCESS));
                }
                other => {
                    if let Some(event) = Event::from_rt_event(other, IMMEDIATE_PROCESS) {
                        if event.is_async_work_event() {
                            let _ = self.worker_tx.send(event);
                        } else {
                            self.post_to_posters(&event);
                        }
                    }
                }
            }
        }
    }

    fn post_to_posters(&self, event: &Event) {
        let mut posters = self.posters.lock();
        for poster in posters.iter_mut() {
            poster.process(event);
        }
    }
}

fn finish(mut event: Event, status: EventStatus) {
    complete(event.take_completion(), status);
}

fn complete(completion: Option<CompletionCallback>, status: EventStatus) {
    if let Some(callback) = completion {
        callback(status);
    }
}

/// Take back ownership of payloads embedded in an undeliverable rt event.
fn reclaim_rt_payload(event: RtEvent) {
    match event {
        RtEvent::StringPropertyChange { value, .. } => drop(unsafe { Box::from_raw(value) }),
        RtEvent::BlobPropertyChange { value, .. } => drop(unsafe { value.into_boxed_slice() }),
        _ => {}
    }
}

/// Convert an ownership hand-back into a deletion job for the worker.
unsafe fn payload_to_work(payload: AsyncDeletePayload) -> AsyncWorkEvent {
    match payload {
        AsyncDeletePayload::String(ptr) => AsyncWorkEvent::DeleteString(Box::from_raw(ptr)),
        AsyncDeletePayload::Blob(blob) => AsyncWorkEvent::DeleteBlob(blob.into_boxed_slice()),
        AsyncDeletePayload::Processor(ptr) => AsyncWorkEvent::DeleteProcessor(Box::from_raw(ptr)),
        AsyncDeletePayload::Track(ptr) => AsyncWorkEvent::DeleteTrack(Box::from_raw(ptr)),
    }
}

fn worker_loop(jobs: Receiver<Event>, sender: EventSender) {
    while let Ok(event) = jobs.recv() {
        if let EventPayload::AsyncWork(work) = event.into_payload() {
            match work {
                AsyncWorkEvent::ProcessorWork {
                    processor,
                    rt_event_id,
                    callback,
                    data,
                } => {
                    let return_value = callback(data.0, rt_event_id);
                    sender.post(Event::new(
                        EventPayload::AsyncWorkCompletion {
                            processor,
                            rt_event_id,
                            return_value,
                        },
                        IMMEDIATE_PROCESS,
                    ));
                }
                // Deletions: dropping the payload is the whole job
                AsyncWorkEvent::DeleteBlob(_)
                | AsyncWorkEvent::DeleteString(_)
                | AsyncWorkEvent::DeleteProcessor(_)
                | AsyncWorkEvent::DeleteTrack(_) => {}
            }
        }
    }
}

/// Owns the dispatcher and async-worker threads.
pub struct EventDispatcher {
    sender: EventSender,
    running: Arc<AtomicBool>,
    posters: Arc<Mutex<Vec<Box<dyn EventPoster>>>>,
    dispatcher_thread: Option<JoinHandle<()>>,
    worker_tx: Option<Sender<Event>>,
    worker_thread: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        let (tx, rx) = unbounded();
        let sender = EventSender { tx };
        let (worker_tx, worker_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let posters: Arc<Mutex<Vec<Box<dyn EventPoster>>>> = Arc::new(Mutex::new(Vec::new()));

        let dispatcher_loop = DispatcherLoop {
            engine,
            inbox: rx,
            worker_tx: worker_tx.clone(),
            posters: posters.clone(),
            running: running.clone(),
            retry_queue: VecDeque::new(),
        };
        let dispatcher_thread = std::thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || dispatcher_loop.run())
            .expect("failed to spawn event dispatcher");

        let worker_sender = sender.clone();
        let worker_thread = std::thread::Builder::new()
            .name("async-worker".to_string())
            .spawn(move || worker_loop(worker_rx, worker_sender))
            .expect("failed to spawn async worker");

        Self {
            sender,
            running,
            posters,
            dispatcher_thread: Some(dispatcher_thread),
            worker_tx: Some(worker_tx),
            worker_thread: Some(worker_thread),
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Queue an event for dispatch.
    pub fn post_event(&self, event: Event) -> bool {
        self.sender.post(event)
    }

    pub fn register_poster(&self, poster: Box<dyn EventPoster>) {
        self.posters.lock().push(poster);
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher_thread.take() {
            let _ = handle.join();
        }
        // Closing the job channel ends the worker
        self.worker_tx.take();
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ParameterValue;
    use std::sync::mpsc;

    fn test_engine() -> Arc<AudioEngine> {
        let engine = Arc::new(AudioEngine::new(48_000.0, 1));
        engine.set_audio_input_channels(2).unwrap();
        engine.set_audio_output_channels(2).unwrap();
        engine
    }

    fn wait_for_status(rx: &mpsc::Receiver<EventStatus>) -> EventStatus {
        rx.recv_timeout(Duration::from_secs(2)).expect("no completion")
    }

    #[test]
    fn test_engine_event_executes_and_completes() {
        let engine = test_engine();
        let dispatcher = EventDispatcher::new(engine.clone());
        let (tx, rx) = mpsc::channel();
        let event = Event::new(
            EventPayload::Engine(EngineEvent::AddTrack {
                name: "t".to_string(),
                channels: 2,
            }),
            IMMEDIATE_PROCESS,
        )
        .with_completion(Box::new(move |status| {
            tx.send(status).unwrap();
        }));
        dispatcher.post_event(event);
        assert_eq!(wait_for_status(&rx), EventStatus::HandledOk);
        assert!(engine.processor_id_from_name("t").is_ok());
    }

    #[test]
    fn test_failed_engine_event_reports_error() {
        let engine = test_engine();
        let dispatcher = EventDispatcher::new(engine);
        let (tx, rx) = mpsc::channel();
        let event = Event::new(
            EventPayload::Engine(EngineEvent::RemoveTrack {
                name: "missing".to_string(),
            }),
            IMMEDIATE_PROCESS,
        )
        .with_completion(Box::new(move |status| {
            tx.send(status).unwrap();
        }));
        dispatcher.post_event(event);
        assert_eq!(wait_for_status(&rx), EventStatus::Error);
    }

    #[test]
    fn test_rt_mappable_event_processed_directly_when_not_realtime() {
        let engine = test_engine();
        engine.create_track("t", 2).unwrap();
        let track_id = engine.processor_id_from_name("t").unwrap();
        let dispatcher = EventDispatcher::new(engine.clone());
        let (tx, rx) = mpsc::channel();
        let event = Event::parameter_change(
            track_id,
            0, // track gain
            ParameterValue::Float(0.25),
            IMMEDIATE_PROCESS,
        )
        .with_completion(Box::new(move |status| {
            tx.send(status).unwrap();
        }));
        dispatcher.post_event(event);
        assert_eq!(wait_for_status(&rx), EventStatus::HandledOk);
        assert_eq!(engine.parameter_value(track_id, 0).unwrap(), 0.25);
    }

    struct CapturePoster {
        tx: mpsc::Sender<usize>,
    }

    impl EventPoster for CapturePoster {
        fn process(&mut self, event: &Event) {
            if let EventPayload::ClippingNotification { channel, .. } = event.payload() {
                let _ = self.tx.send(*channel);
            }
        }
    }

    #[test]
    fn test_notifications_fan_out_to_posters() {
        let engine = test_engine();
        engine.enable_input_clip_detection(true);
        let dispatcher = EventDispatcher::new(engine.clone());
        let (tx, rx) = mpsc::channel();
        dispatcher.register_poster(Box::new(CapturePoster { tx }));

        let mut input = crate::buffer::ChunkSampleBuffer::new(2);
        input.channel_mut(1).fill(1.5);
        let mut output = crate::buffer::ChunkSampleBuffer::new(2);
        let controls = crate::buffer::ControlBuffer::default();
        let mut out_controls = crate::buffer::ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &controls, &mut out_controls);

        let channel = rx.recv_timeout(Duration::from_secs(2)).expect("no notification");
        assert_eq!(channel, 1);
    }
}
