//! Musical time bookkeeping: tempo, time signature, play state and beat
//! position, advanced once per audio chunk with per-sample interpolation.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::AUDIO_CHUNK_SIZE;
use crate::lockfree::{AtomicCounter, AtomicDouble, AtomicFloat};
use crate::rt_event::RtEvent;

pub const DEFAULT_TEMPO: f32 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayingMode {
    Stopped,
    #[default]
    Playing,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Internal,
    Midi,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Length of one bar in quarter notes.
    #[inline]
    pub fn beats_per_bar(&self) -> f64 {
        4.0 * self.numerator as f64 / self.denominator as f64
    }
}

/// Lock-free mirror of the transport state, refreshed once per chunk, for
/// non-realtime readers. Values are approximate by one chunk at most.
#[derive(Debug, Default)]
pub struct TransportView {
    tempo: AtomicFloat,
    beat_count: AtomicDouble,
    bar_beats: AtomicDouble,
    sample_count: AtomicCounter,
    playing_mode: AtomicU8,
    sync_mode: AtomicU8,
    signature: AtomicU64,
}

impl TransportView {
    pub fn tempo(&self) -> f32 {
        self.tempo.get()
    }

    pub fn current_beats(&self) -> f64 {
        self.beat_count.get()
    }

    pub fn current_bar_beats(&self) -> f64 {
        self.bar_beats.get()
    }

    pub fn current_samples(&self) -> i64 {
        self.sample_count.get()
    }

    pub fn playing_mode(&self) -> PlayingMode {
        match self.playing_mode.load(Ordering::Acquire) {
            0 => PlayingMode::Stopped,
            2 => PlayingMode::Recording,
            _ => PlayingMode::Playing,
        }
    }

    pub fn sync_mode(&self) -> SyncMode {
        match self.sync_mode.load(Ordering::Acquire) {
            1 => SyncMode::Midi,
            2 => SyncMode::Link,
            _ => SyncMode::Internal,
        }
    }

    pub fn time_signature(&self) -> TimeSignature {
        let packed = self.signature.load(Ordering::Acquire);
        TimeSignature {
            numerator: (packed >> 32) as u32,
            denominator: packed as u32,
        }
    }

    pub fn playing(&self) -> bool {
        self.playing_mode() != PlayingMode::Stopped
    }
}

/// The musical time authority, owned by the realtime part of the engine.
///
/// All setters are realtime-thread-only; non-realtime callers change tempo,
/// signature and modes through the event plane, and read state through the
/// shared [`TransportView`].
#[derive(Debug)]
pub struct Transport {
    sample_count: i64,
    time: Duration,
    latency: Duration,
    tempo: f32,
    current_bar_beat_count: f64,
    beat_count: f64,
    bar_start_beat_count: f64,
    beats_per_chunk: f64,
    beats_per_bar: f64,
    sample_rate: f32,
    sync_mode: SyncMode,
    time_signature: TimeSignature,
    mode: PlayingMode,
    view: Arc<TransportView>,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        let time_signature = TimeSignature::default();
        let transport = Self {
            sample_count: 0,
            time: Duration::ZERO,
            latency: Duration::ZERO,
            tempo: DEFAULT_TEMPO,
            current_bar_beat_count: 0.0,
            beat_count: 0.0,
            bar_start_beat_count: 0.0,
            beats_per_chunk: 0.0,
            beats_per_bar: time_signature.beats_per_bar(),
            sample_rate,
            sync_mode: SyncMode::default(),
            time_signature,
            mode: PlayingMode::default(),
            view: Arc::new(TransportView::default()),
        };
        transport.update_view();
        transport
    }

    pub fn view(&self) -> Arc<TransportView> {
        self.view.clone()
    }

    /// Align wall clock and absolute sample count at the head of a chunk.
    /// Called by the audio frontend once per chunk.
    pub fn set_time(&mut self, timestamp: Duration, samples: i64) {
        self.time = timestamp + self.latency;
        self.sample_count = samples;
    }

    /// Output latency of the audio path, as reported by the frontend.
    pub fn set_latency(&mut self, output_latency: Duration) {
        self.latency = output_latency;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo;
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        self.time_signature = signature;
        self.beats_per_bar = signature.beats_per_bar();
    }

    pub fn set_playing_mode(&mut self, mode: PlayingMode) {
        self.mode = mode;
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        self.sync_mode = mode;
    }

    /// Apply a transport-related realtime event. Returns true if the event
    /// was a transport event.
    pub fn handle_event(&mut self, event: &RtEvent) -> bool {
        match *event {
            RtEvent::Tempo { tempo } => self.set_tempo(tempo),
            RtEvent::TimeSignature { signature } => self.set_time_signature(signature),
            RtEvent::SetPlayingMode { mode } => self.set_playing_mode(mode),
            RtEvent::SetSyncMode { mode } => self.set_sync_mode(mode),
            _ => return false,
        }
        true
    }

    /// Advance musical time by one chunk. Called by the engine at the end of
    /// `process_chunk`; the updated state is visible from the next chunk on.
    pub fn advance_chunk(&mut self) {
        self.beats_per_chunk =
            AUDIO_CHUNK_SIZE as f64 / self.sample_rate as f64 * (self.tempo as f64 / 60.0);

        if self.playing() {
            self.beat_count += self.beats_per_chunk;
            while self.beat_count >= self.bar_start_beat_count + self.beats_per_bar {
                self.bar_start_beat_count += self.beats_per_bar;
            }
            self.current_bar_beat_count = self.beat_count - self.bar_start_beat_count;
        }

        self.sample_count += AUDIO_CHUNK_SIZE as i64;
        self.time += Duration::from_secs_f64(AUDIO_CHUNK_SIZE as f64 / self.sample_rate as f64);
        self.update_view();
    }

    pub fn playing(&self) -> bool {
        self.mode != PlayingMode::Stopped
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.mode
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn current_tempo(&self) -> f32 {
        self.tempo
    }

    pub fn current_time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    /// Time at which sample 0 of the current chunk reaches an output.
    pub fn current_process_time(&self) -> Duration {
        self.time
    }

    /// Samples processed before sample 0 of the current chunk.
    pub fn current_samples(&self) -> i64 {
        self.sample_count
    }

    /// Position in quarter notes within the current bar, `samples` into the
    /// current chunk. For 4/4 time the result is in [0, 4).
    pub fn current_bar_beats(&self, samples: usize) -> f64 {
        let position = self.current_bar_beat_count + self.beat_offset(samples);
        position % self.beats_per_bar
    }

    /// Continuous, monotonically increasing position in quarter notes,
    /// `samples` into the current chunk.
    pub fn current_beats(&self, samples: usize) -> f64 {
        self.beat_count + self.beat_offset(samples)
    }

    /// Start of the current bar in quarter notes.
    pub fn current_bar_start_beats(&self) -> f64 {
        self.bar_start_beat_count
    }

    pub fn beats_per_chunk(&self) -> f64 {
        self.beats_per_chunk
    }

    #[inline]
    fn beat_offset(&self, samples: usize) -> f64 {
        samples as f64 / self.sample_rate as f64 * (self.tempo as f64 / 60.0)
    }

    fn update_view(&self) {
        self.view.tempo.set(self.tempo);
        self.view.beat_count.set(self.beat_count);
        self.view.bar_beats.set(self.current_bar_beat_count);
        self.view.sample_count.set(self.sample_count);
        self.view
            .playing_mode
            .store(self.mode as u8, Ordering::Release);
        self.view
            .sync_mode
            .store(self.sync_mode as u8, Ordering::Release);
        self.view.signature.store(
            (self.time_signature.numerator as u64) << 32 | self.time_signature.denominator as u64,
            Ordering::Release,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48_000.0;

    #[test]
    fn test_defaults() {
        let transport = Transport::new(SAMPLE_RATE);
        assert_eq!(transport.current_tempo(), DEFAULT_TEMPO);
        assert_eq!(transport.current_time_signature(), TimeSignature::new(4, 4));
        assert_eq!(transport.playing_mode(), PlayingMode::Playing);
        assert_eq!(transport.sync_mode(), SyncMode::Internal);
        assert!(transport.playing());
    }

    #[test]
    fn test_beats_advance_per_chunk() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.advance_chunk();
        // 64 samples at 48 kHz and 120 bpm
        let expected = 64.0 / 48_000.0 * 2.0;
        assert!((transport.current_beats(0) - expected).abs() < 1e-9);

        let diff = transport.current_beats(AUDIO_CHUNK_SIZE) - transport.current_beats(0);
        assert!((diff - transport.beats_per_chunk()).abs() < 1e-9);
    }

    #[test]
    fn test_sample_count_is_monotonic() {
        let mut transport = Transport::new(SAMPLE_RATE);
        let mut previous = transport.current_samples();
        for _ in 0..32 {
            transport.advance_chunk();
            assert!(transport.current_samples() > previous);
            previous = transport.current_samples();
        }
        assert_eq!(previous, 32 * AUDIO_CHUNK_SIZE as i64);
    }

    #[test]
    fn test_bar_position_wraps_at_bar_boundary() {
        let mut transport = Transport::new(SAMPLE_RATE);
        // Two bars of 4/4 at 120 bpm = 8 beats = 4 s = 192000 samples
        let chunks = 192_000 / AUDIO_CHUNK_SIZE;
        for _ in 0..chunks {
            transport.advance_chunk();
        }
        assert!((transport.current_beats(0) - 8.0).abs() < 1e-6);
        assert!(transport.current_bar_beats(0) < 4.0);
        assert!((transport.current_bar_start_beats() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_time_signature_changes_bar_length() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.set_time_signature(TimeSignature::new(6, 8));
        // 6/8 has a bar length of 3 quarter notes
        let chunks = 96_000 / AUDIO_CHUNK_SIZE; // 4 beats at 120 bpm
        for _ in 0..chunks {
            transport.advance_chunk();
        }
        assert!((transport.current_bar_start_beats() - 3.0).abs() < 1e-6);
        assert!((transport.current_bar_beats(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stopped_transport_freezes_beats() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.set_playing_mode(PlayingMode::Stopped);
        transport.advance_chunk();
        assert_eq!(transport.current_beats(0), 0.0);
        // Samples still advance while stopped
        assert_eq!(transport.current_samples(), AUDIO_CHUNK_SIZE as i64);
    }

    #[test]
    fn test_rt_event_handling() {
        let mut transport = Transport::new(SAMPLE_RATE);
        assert!(transport.handle_event(&RtEvent::Tempo { tempo: 140.0 }));
        assert_eq!(transport.current_tempo(), 140.0);
        assert!(transport.handle_event(&RtEvent::SetPlayingMode {
            mode: PlayingMode::Stopped
        }));
        assert!(!transport.playing());
        assert!(!transport.handle_event(&RtEvent::ClipNotification {
            channel: 0,
            input: true
        }));
    }

    #[test]
    fn test_view_mirrors_state() {
        let mut transport = Transport::new(SAMPLE_RATE);
        let view = transport.view();
        transport.set_tempo(150.0);
        transport.set_sync_mode(SyncMode::Link);
        transport.advance_chunk();
        assert_eq!(view.tempo(), 150.0);
        assert_eq!(view.sync_mode(), SyncMode::Link);
        assert_eq!(view.current_samples(), AUDIO_CHUNK_SIZE as i64);
        assert_eq!(view.time_signature(), TimeSignature::new(4, 4));
        assert!(view.playing());
    }
}
