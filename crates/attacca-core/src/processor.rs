//! The polymorphic audio node interface and shared processor plumbing.

use std::sync::Arc;

use crate::buffer::ChunkSampleBuffer;
use crate::parameter::{ParameterDescriptor, ParameterValues};
use crate::rt_event::{ObjectId, ProcessorIdGenerator, RtEvent};

/// An audio node in the engine graph: internal plugin, external plugin shim
/// or track. Created on non-realtime threads, then handed over to the
/// realtime part through the event plane; `process_event` and
/// `process_audio` run on the audio thread and must not allocate or block.
pub trait Processor: Send {
    fn id(&self) -> ObjectId;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: &str);

    fn input_channels(&self) -> usize;

    fn output_channels(&self) -> usize;

    fn set_input_channels(&mut self, channels: usize);

    fn set_output_channels(&mut self, channels: usize);

    fn parameters(&self) -> &[ParameterDescriptor];

    /// Shared current parameter values. Single writer (this processor, on
    /// the audio thread); other threads may read stale values.
    fn parameter_values(&self) -> Arc<ParameterValues>;

    /// Typed events routed to this processor's id are delivered here, in
    /// arrival order, before `process_audio` within the same chunk.
    fn process_event(&mut self, event: RtEvent);

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer);

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn bypassed(&self) -> bool;

    fn set_bypassed(&mut self, bypassed: bool);

    fn is_track(&self) -> bool {
        false
    }
}

/// State every processor carries: identity, channel configuration, bypass
/// flag and the parameter set. Concrete processors embed this and delegate.
#[derive(Debug)]
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    input_channels: usize,
    output_channels: usize,
    bypassed: bool,
    descriptors: Vec<ParameterDescriptor>,
    values: Arc<ParameterValues>,
}

impl ProcessorData {
    pub fn new(name: &str, descriptors: Vec<ParameterDescriptor>) -> Self {
        let values = ParameterValues::from_descriptors(&descriptors);
        Self {
            id: ProcessorIdGenerator::new_id(),
            name: name.to_string(),
            input_channels: 2,
            output_channels: 2,
            bypassed: false,
            descriptors,
            values,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    #[inline]
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn set_input_channels(&mut self, channels: usize) {
        self.input_channels = channels;
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        self.output_channels = channels;
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn values(&self) -> Arc<ParameterValues> {
        self.values.clone()
    }

    #[inline]
    pub fn parameter_value(&self, parameter: ObjectId) -> Option<f32> {
        self.values.get(parameter)
    }

    #[inline]
    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    /// Handle bypass and parameter change events common to all processors.
    /// Values are clamped to the parameter's declared range before storing.
    /// Returns true if the event was consumed.
    pub fn handle_common_event(&mut self, event: &RtEvent) -> bool {
        match *event {
            RtEvent::SetBypass { bypass, .. } => {
                self.bypassed = bypass;
                true
            }
            RtEvent::FloatParameterChange {
                parameter, value, ..
            } => {
                self.store_parameter(parameter, value);
                true
            }
            RtEvent::IntParameterChange {
                parameter, value, ..
            } => {
                self.store_parameter(parameter, value as f32);
                true
            }
            RtEvent::BoolParameterChange {
                parameter, value, ..
            } => {
                self.store_parameter(parameter, if value { 1.0 } else { 0.0 });
                true
            }
            _ => false,
        }
    }

    fn store_parameter(&mut self, parameter: ObjectId, value: f32) {
        if let Some(descriptor) = self.descriptors.get(parameter as usize) {
            self.values.set(parameter, descriptor.range.clamp(value));
        }
    }
}

/// Registry-side description of a processor, shared with query paths while
/// the processor itself lives in the realtime part.
#[derive(Debug, Clone)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub is_track: bool,
    /// Track owning this processor, if it sits in a track chain.
    pub owner_track: Option<ObjectId>,
    pub input_channels: usize,
    pub output_channels: usize,
    pub descriptors: Vec<ParameterDescriptor>,
    pub values: Arc<ParameterValues>,
}

impl ProcessorInfo {
    pub fn from_processor(processor: &dyn Processor, owner_track: Option<ObjectId>) -> Self {
        Self {
            id: processor.id(),
            name: processor.name().to_string(),
            is_track: processor.is_track(),
            owner_track,
            input_channels: processor.input_channels(),
            output_channels: processor.output_channels(),
            descriptors: processor.parameters().to_vec(),
            values: processor.parameter_values(),
        }
    }

    pub fn parameter_id_from_name(&self, name: &str) -> Option<ObjectId> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id)
    }

    pub fn parameter_name_from_id(&self, id: ObjectId) -> Option<&str> {
        self.descriptors
            .get(id as usize)
            .map(|d| d.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_data_identity() {
        let a = ProcessorData::new("a", Vec::new());
        let b = ProcessorData::new("b", Vec::new());
        assert!(b.id() > a.id());
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn test_common_events_update_state() {
        let descriptors = vec![ParameterDescriptor::new(0, "gain", 0.0, 2.0, 1.0)];
        let mut data = ProcessorData::new("p", descriptors);

        assert!(data.handle_common_event(&RtEvent::SetBypass {
            processor: data.id(),
            bypass: true
        }));
        assert!(data.bypassed());

        assert!(data.handle_common_event(&RtEvent::FloatParameterChange {
            processor: data.id(),
            parameter: 0,
            value: 1.5
        }));
        assert_eq!(data.parameter_value(0), Some(1.5));

        // Out of range values clamp to the descriptor range
        data.handle_common_event(&RtEvent::FloatParameterChange {
            processor: data.id(),
            parameter: 0,
            value: 10.0,
        });
        assert_eq!(data.parameter_value(0), Some(2.0));

        assert!(!data.handle_common_event(&RtEvent::Tempo { tempo: 99.0 }));
    }
}
