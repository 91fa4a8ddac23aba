//! Tracks: processors that own an ordered chain of child processors and
//! mix the chain's result into their output busses.

use std::sync::Arc;

use crate::buffer::ChunkSampleBuffer;
use crate::fifo::SpscFifo;
use crate::parameter::{ParameterDescriptor, ParameterValues};
use crate::processor::{Processor, ProcessorData};
use crate::rt_event::{ObjectId, RtEvent};

/// Upper bound on processors per track; the chain vector is pre-allocated to
/// this so insertion on the audio thread never allocates.
pub const MAX_TRACK_PROCESSORS: usize = 32;

/// Upper bound on channels per track (4 stereo busses).
pub const TRACK_MAX_CHANNELS: usize = 8;

/// A track in the audio graph.
///
/// Processing feeds each child processor's output into the next through two
/// scratch buffers, adapting mismatched channel counts by zero-fill or
/// summation, then applies per-bus gain and pan plus mute into the track
/// output. Keyboard events addressed to the track are fanned out to every
/// child and mirrored into the track's out-queue so downstream MIDI and gate
/// outputs see them.
pub struct Track {
    data: ProcessorData,
    processors: Vec<Box<dyn Processor>>,
    input_buffer: ChunkSampleBuffer,
    output_buffer: ChunkSampleBuffer,
    scratch_a: ChunkSampleBuffer,
    scratch_b: ChunkSampleBuffer,
    input_busses: usize,
    output_busses: usize,
    output_events: SpscFifo<RtEvent>,
    sample_rate: f32,
}

fn bus_gain_id(bus: usize) -> ObjectId {
    (2 * bus) as ObjectId
}

fn bus_pan_id(bus: usize) -> ObjectId {
    (2 * bus + 1) as ObjectId
}

fn mute_id(output_busses: usize) -> ObjectId {
    (2 * output_busses) as ObjectId
}

fn track_parameters(output_busses: usize) -> Vec<ParameterDescriptor> {
    let mut descriptors = Vec::with_capacity(2 * output_busses + 1);
    for bus in 0..output_busses {
        let suffix = if bus == 0 {
            String::new()
        } else {
            format!("_bus_{bus}")
        };
        descriptors.push(ParameterDescriptor::new(
            bus_gain_id(bus),
            &format!("gain{suffix}"),
            0.0,
            2.0,
            1.0,
        ));
        descriptors.push(ParameterDescriptor::new(
            bus_pan_id(bus),
            &format!("pan{suffix}"),
            -1.0,
            1.0,
            0.0,
        ));
    }
    descriptors.push(ParameterDescriptor::new(
        mute_id(output_busses),
        "mute",
        0.0,
        1.0,
        0.0,
    ));
    descriptors
}

impl Track {
    /// Create a track with up to two channels on a single bus.
    pub fn new(name: &str, channels: usize) -> Self {
        assert!(channels >= 1 && channels <= 2);
        Self::with_busses(name, channels, 1, 1)
    }

    /// Create a track with multiple stereo input and output busses.
    pub fn new_multibus(name: &str, input_busses: usize, output_busses: usize) -> Self {
        let channels = 2 * input_busses.max(output_busses);
        assert!(channels <= TRACK_MAX_CHANNELS);
        Self::with_busses(name, channels, input_busses, output_busses)
    }

    fn with_busses(name: &str, channels: usize, input_busses: usize, output_busses: usize) -> Self {
        let mut data = ProcessorData::new(name, track_parameters(output_busses));
        data.set_input_channels(channels);
        data.set_output_channels(channels);
        Self {
            data,
            processors: Vec::with_capacity(MAX_TRACK_PROCESSORS),
            input_buffer: ChunkSampleBuffer::new(channels),
            output_buffer: ChunkSampleBuffer::new(channels),
            scratch_a: ChunkSampleBuffer::with_capacity(TRACK_MAX_CHANNELS, channels),
            scratch_b: ChunkSampleBuffer::with_capacity(TRACK_MAX_CHANNELS, channels),
            input_busses,
            output_busses,
            output_events: SpscFifo::new(),
            sample_rate: 0.0,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.input_channels()
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn input_buffer_mut(&mut self) -> &mut ChunkSampleBuffer {
        &mut self.input_buffer
    }

    pub fn output_buffer(&self) -> &ChunkSampleBuffer {
        &self.output_buffer
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn has_processor(&self, id: ObjectId) -> bool {
        self.processors.iter().any(|p| p.id() == id)
    }

    /// Append a processor to the end of the chain. Fails when the
    /// pre-allocated chain is full. Does not allocate.
    pub fn add_processor(&mut self, mut processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        if self.processors.len() == self.processors.capacity() {
            return Err(processor);
        }
        if self.sample_rate > 0.0 {
            processor.set_sample_rate(self.sample_rate);
        }
        self.processors.push(processor);
        Ok(())
    }

    /// Extract a processor from the chain, handing ownership back.
    pub fn remove_processor(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        let index = self.processors.iter().position(|p| p.id() == id)?;
        Some(self.processors.remove(index))
    }

    /// Deliver an event to the track itself or to a child processor by id.
    /// Returns false if the id matches neither.
    pub fn process_event_targeted(&mut self, target: ObjectId, event: RtEvent) -> bool {
        if target == self.id() {
            self.process_event(event);
            return true;
        }
        for processor in &mut self.processors {
            if processor.id() == target {
                processor.process_event(event);
                return true;
            }
        }
        false
    }

    /// Drain events emitted by this track during the current chunk.
    pub fn pop_output_event(&mut self) -> Option<RtEvent> {
        self.output_events.pop()
    }

    /// Process the chunk held in the track input buffer into the track
    /// output buffer. Called by the engine once per chunk.
    pub fn render(&mut self) {
        if self.data.bypassed() {
            self.output_buffer.copy_or_zero_from(&self.input_buffer);
            return;
        }
        self.scratch_a
            .set_channel_count(self.input_buffer.channel_count());
        self.scratch_a.copy_or_zero_from(&self.input_buffer);
        self.process_chain();
        finalize_output(
            &self.scratch_a,
            &self.data.values(),
            self.output_busses,
            &mut self.output_buffer,
        );
    }

    fn process_chain(&mut self) {
        for processor in &mut self.processors {
            if processor.bypassed() {
                continue;
            }
            let wanted = processor.input_channels().min(TRACK_MAX_CHANNELS);
            if self.scratch_a.channel_count() != wanted {
                self.scratch_b.set_channel_count(wanted);
                self.scratch_b.adapt_from(&self.scratch_a);
                std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
            }
            self.scratch_b
                .set_channel_count(processor.output_channels().min(TRACK_MAX_CHANNELS));
            self.scratch_b.clear();
            processor.process_audio(&self.scratch_a, &mut self.scratch_b);
            std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
        }
    }
}

/// Mix the processed chain into the track output: channel adaptation, then
/// per-bus gain and balance-style pan, then mute.
fn finalize_output(
    processed: &ChunkSampleBuffer,
    values: &Arc<ParameterValues>,
    output_busses: usize,
    output: &mut ChunkSampleBuffer,
) {
    output.adapt_from(processed);
    if values.get(mute_id(output_busses)).unwrap_or(0.0) > 0.5 {
        output.clear();
        return;
    }
    for bus in 0..output_busses {
        let gain = values.get(bus_gain_id(bus)).unwrap_or(1.0);
        let pan = values.get(bus_pan_id(bus)).unwrap_or(0.0);
        let left_gain = gain * (1.0 - pan.max(0.0));
        let right_gain = gain * (1.0 + pan.min(0.0));
        let left = 2 * bus;
        let right = left + 1;
        if left < output.channel_count() {
            for sample in output.channel_mut(left) {
                *sample *= left_gain;
            }
        }
        if right < output.channel_count() {
            for sample in output.channel_mut(right) {
                *sample *= right_gain;
            }
        }
    }
}

impl Processor for Track {
    fn id(&self) -> ObjectId {
        self.data.id()
    }

    fn name(&self) -> &str {
        self.data.name()
    }

    fn set_name(&mut self, name: &str) {
        self.data.set_name(name);
    }

    fn input_channels(&self) -> usize {
        self.data.input_channels()
    }

    fn output_channels(&self) -> usize {
        self.data.output_channels()
    }

    fn set_input_channels(&mut self, channels: usize) {
        self.data.set_input_channels(channels);
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data.set_output_channels(channels);
    }

    fn parameters(&self) -> &[ParameterDescriptor] {
        self.data.descriptors()
    }

    fn parameter_values(&self) -> Arc<ParameterValues> {
        self.data.values()
    }

    fn process_event(&mut self, event: RtEvent) {
        if self.data.handle_common_event(&event) {
            return;
        }
        if event.is_keyboard_event() {
            for processor in &mut self.processors {
                processor.process_event(event);
            }
            let _ = self.output_events.push(event);
        }
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        self.scratch_a.set_channel_count(input.channel_count());
        self.scratch_a.copy_or_zero_from(input);
        self.process_chain();
        finalize_output(
            &self.scratch_a,
            &self.data.values(),
            self.output_busses,
            output,
        );
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for processor in &mut self.processors {
            processor.set_sample_rate(sample_rate);
        }
    }

    fn bypassed(&self) -> bool {
        self.data.bypassed()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.data.set_bypassed(bypassed);
    }

    fn is_track(&self) -> bool {
        true
    }
}
