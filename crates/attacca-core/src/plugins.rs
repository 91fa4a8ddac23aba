//! Internal plugins shipped with the engine, instantiated by uid.

use std::sync::Arc;

use crate::buffer::ChunkSampleBuffer;
use crate::parameter::{ParameterDescriptor, ParameterValues};
use crate::processor::{Processor, ProcessorData};
use crate::rt_event::{ObjectId, RtEvent};

pub const PASSTHROUGH_PLUGIN_UID: &str = "core.passthrough";
pub const GAIN_PLUGIN_UID: &str = "core.gain";

/// Instantiate an internal plugin by uid, or `None` for unknown uids.
pub fn create_internal_plugin(uid: &str, name: &str) -> Option<Box<dyn Processor>> {
    match uid {
        PASSTHROUGH_PLUGIN_UID => Some(Box::new(PassthroughPlugin::new(name))),
        GAIN_PLUGIN_UID => Some(Box::new(GainPlugin::new(name))),
        _ => None,
    }
}

/// Copies its input to its output, adapting channel counts.
#[derive(Debug)]
pub struct PassthroughPlugin {
    data: ProcessorData,
}

impl PassthroughPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            data: ProcessorData::new(name, Vec::new()),
        }
    }
}

impl Processor for PassthroughPlugin {
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
        self.data.handle_common_event(&event);
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        output.copy_or_zero_from(input);
    }

    fn bypassed(&self) -> bool {
        self.data.bypassed()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.data.set_bypassed(bypassed);
    }
}

const GAIN_PARAMETER_ID: ObjectId = 0;

/// Scales its input by a single "gain" parameter.
#[derive(Debug)]
pub struct GainPlugin {
    data: ProcessorData,
}

impl GainPlugin {
    pub fn new(name: &str) -> Self {
        let descriptors = vec![ParameterDescriptor::new(
            GAIN_PARAMETER_ID,
            "gain",
            0.0,
            2.0,
            1.0,
        )];
        Self {
            data: ProcessorData::new(name, descriptors),
        }
    }
}

impl Processor for GainPlugin {
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
        self.data.handle_common_event(&event);
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        let gain = self
            .data
            .parameter_value(GAIN_PARAMETER_ID)
            .unwrap_or(1.0);
        output.copy_or_zero_from(input);
        let channels = output.channel_count();
        for ch in 0..channels {
            for sample in output.channel_mut(ch) {
                *sample *= gain;
            }
        }
    }

    fn bypassed(&self) -> bool {
        self.data.bypassed()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.data.set_bypassed(bypassed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_by_uid() {
        assert!(create_internal_plugin(PASSTHROUGH_PLUGIN_UID, "p").is_some());
        assert!(create_internal_plugin(GAIN_PLUGIN_UID, "g").is_some());
        assert!(create_internal_plugin("core.unknown", "u").is_none());
    }

    #[test]
    fn test_passthrough_copies_input() {
        let mut plugin = PassthroughPlugin::new("pass");
        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);
        let mut output = ChunkSampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.5);
        assert_eq!(output.channel(1)[0], -0.5);
    }

    #[test]
    fn test_gain_scales_input() {
        let mut plugin = GainPlugin::new("gain");
        plugin.process_event(RtEvent::FloatParameterChange {
            processor: plugin.id(),
            parameter: GAIN_PARAMETER_ID,
            value: 0.5,
        });
        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = ChunkSampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.5);
        assert_eq!(output.channel(1)[0], 0.0);
    }

    #[test]
    fn test_gain_default_is_unity() {
        let mut plugin = GainPlugin::new("gain");
        let mut input = ChunkSampleBuffer::new(1);
        input.channel_mut(0).fill(0.25);
        let mut output = ChunkSampleBuffer::new(1);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.25);
    }
}
