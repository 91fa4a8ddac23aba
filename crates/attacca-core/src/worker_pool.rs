//! Worker pool spreading track processing over multiple cores.
//!
//! One track per worker per chunk: the audio thread hands each track to a
//! worker round-robin, then blocks on the completion barrier before touching
//! the track outputs. Tracks never share processors, so workers never touch
//! the same data. Worker threads must follow the same rules as the audio
//! thread: no allocation, no locks shared with non-realtime code.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::JoinHandle;

use crate::performance::PerformanceTimer;
use crate::processor::Processor;
use crate::track::Track;

/// More jobs than tracks can ever be queued per chunk.
const JOB_QUEUE_CAPACITY: usize = 64;

/// Raw pointer to a track, shipped to a worker for the duration of one
/// chunk. The barrier in [`WorkerPool::process_tracks`] guarantees the
/// pointer is not used after the call returns.
struct TrackJob(*mut Track);

unsafe impl Send for TrackJob {}

enum JobMessage {
    Process(TrackJob),
    Shutdown,
}

struct Worker {
    jobs: Sender<JobMessage>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    done: Receiver<()>,
}

impl WorkerPool {
    pub fn new(cores: usize, timer: PerformanceTimer) -> Self {
        let (done_tx, done) = bounded(JOB_QUEUE_CAPACITY * cores);
        let workers = (0..cores)
            .map(|index| {
                let (jobs_tx, jobs_rx) = bounded::<JobMessage>(JOB_QUEUE_CAPACITY);
                let worker_done = done_tx.clone();
                let worker_timer = timer.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("audio-worker-{index}"))
                    .spawn(move || worker_loop(jobs_rx, worker_done, worker_timer))
                    .expect("failed to spawn audio worker");
                Worker {
                    jobs: jobs_tx,
                    handle: Some(handle),
                }
            })
            .collect();
        Self { workers, done }
    }

    pub fn cores(&self) -> usize {
        self.workers.len()
    }

    /// Process every track on the pool and join on completion. The send side
    /// never blocks (job queues are deeper than the track limit); the
    /// receive side is the chunk's join barrier.
    pub fn process_tracks(&self, tracks: &mut [Box<Track>]) {
        let mut dispatched = 0;
        for (index, track) in tracks.iter_mut().enumerate() {
            let worker = &self.workers[index % self.workers.len()];
            if worker
                .jobs
                .try_send(JobMessage::Process(TrackJob(track.as_mut() as *mut Track)))
                .is_ok()
            {
                dispatched += 1;
            }
        }
        for _ in 0..dispatched {
            let _ = self.done.recv();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            let _ = worker.jobs.send(JobMessage::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(jobs: Receiver<JobMessage>, done: Sender<()>, timer: PerformanceTimer) {
    while let Ok(message) = jobs.recv() {
        match message {
            JobMessage::Process(job) => {
                let track = unsafe { &mut *job.0 };
                let start = timer.start_timer();
                track.render();
                timer.stop_timer(start, track.id());
                let _ = done.send(());
            }
            JobMessage::Shutdown => break,
        }
    }
}
