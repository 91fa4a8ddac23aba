//! Fixed-size planar sample buffers processed one chunk at a time.

/// Number of samples processed per audio callback.
pub const AUDIO_CHUNK_SIZE: usize = 64;

/// Number of control voltage ports supported on the engine's own I/O.
pub const MAX_ENGINE_CV_IO_PORTS: usize = 4;

/// A planar block of `AUDIO_CHUNK_SIZE` single-precision samples per channel.
///
/// Channel data is stored contiguously, one region per channel, so a
/// contiguous range of channels can be viewed without copying. The channel
/// capacity is fixed at construction; the live channel count can be lowered
/// or raised within it without reallocating, which is what the track chain
/// uses to adapt between processors with different channel configurations.
#[derive(Debug, Clone)]
pub struct ChunkSampleBuffer {
    data: Vec<f32>,
    channels: usize,
}

impl ChunkSampleBuffer {
    pub fn new(channels: usize) -> Self {
        Self::with_capacity(channels, channels)
    }

    pub fn with_capacity(capacity: usize, channels: usize) -> Self {
        assert!(channels <= capacity);
        Self {
            data: vec![0.0; capacity * AUDIO_CHUNK_SIZE],
            channels,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn channel_capacity(&self) -> usize {
        self.data.len() / AUDIO_CHUNK_SIZE
    }

    /// Change the live channel count within the allocated capacity.
    pub fn set_channel_count(&mut self, channels: usize) {
        assert!(channels <= self.channel_capacity());
        self.channels = channels;
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        debug_assert!(index < self.channels);
        &self.data[index * AUDIO_CHUNK_SIZE..(index + 1) * AUDIO_CHUNK_SIZE]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        debug_assert!(index < self.channels);
        &mut self.data[index * AUDIO_CHUNK_SIZE..(index + 1) * AUDIO_CHUNK_SIZE]
    }

    pub fn clear(&mut self) {
        let live = self.channels * AUDIO_CHUNK_SIZE;
        self.data[..live].fill(0.0);
    }

    /// Borrow a contiguous range of channels as a read-only sub-buffer.
    pub fn view(&self, first_channel: usize, channels: usize) -> ChunkBufferView<'_> {
        debug_assert!(first_channel + channels <= self.channels);
        ChunkBufferView {
            data: &self.data
                [first_channel * AUDIO_CHUNK_SIZE..(first_channel + channels) * AUDIO_CHUNK_SIZE],
            channels,
        }
    }

    /// Replace one channel with the given samples.
    pub fn replace_channel(&mut self, index: usize, samples: &[f32]) {
        self.channel_mut(index).copy_from_slice(samples);
    }

    /// Sum the given samples into one channel.
    pub fn sum_channel(&mut self, index: usize, samples: &[f32]) {
        for (out, sample) in self.channel_mut(index).iter_mut().zip(samples) {
            *out += sample;
        }
    }

    /// Copy as many channels as both buffers have in common, zeroing the rest.
    pub fn copy_or_zero_from(&mut self, source: &ChunkSampleBuffer) {
        let common = self.channels.min(source.channels);
        for ch in 0..common {
            self.replace_channel(ch, source.channel(ch));
        }
        for ch in common..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Adapt `source` into this buffer's channel configuration: extra source
    /// channels are folded down by summation, missing ones are zero-filled.
    pub fn adapt_from(&mut self, source: &ChunkSampleBuffer) {
        self.clear();
        if self.channels == 0 {
            return;
        }
        for ch in 0..source.channels {
            self.sum_channel(ch % self.channels, source.channel(ch));
        }
    }

    /// Fill from interleaved frames, one sample per channel per frame.
    pub fn from_interleaved(&mut self, frames: &[f32]) {
        debug_assert_eq!(frames.len(), self.channels * AUDIO_CHUNK_SIZE);
        for ch in 0..self.channels {
            let channels = self.channels;
            let dest = self.channel_mut(ch);
            for (i, sample) in dest.iter_mut().enumerate() {
                *sample = frames[i * channels + ch];
            }
        }
    }

    /// Write out as interleaved frames.
    pub fn to_interleaved(&self, frames: &mut [f32]) {
        debug_assert_eq!(frames.len(), self.channels * AUDIO_CHUNK_SIZE);
        for ch in 0..self.channels {
            for (i, sample) in self.channel(ch).iter().enumerate() {
                frames[i * self.channels + ch] = *sample;
            }
        }
    }
}

/// Non-owning view over a channel range of a [`ChunkSampleBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkBufferView<'a> {
    data: &'a [f32],
    channels: usize,
}

impl<'a> ChunkBufferView<'a> {
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &'a [f32] {
        debug_assert!(index < self.channels);
        &self.data[index * AUDIO_CHUNK_SIZE..(index + 1) * AUDIO_CHUNK_SIZE]
    }
}

/// Control voltage and gate data accompanying one audio chunk: one float per
/// CV port and one bit per gate port.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBuffer {
    pub cv_values: [f32; MAX_ENGINE_CV_IO_PORTS],
    pub gate_values: u32,
}

impl ControlBuffer {
    #[inline]
    pub fn gate(&self, port: usize) -> bool {
        self.gate_values & (1 << port) != 0
    }

    #[inline]
    pub fn set_gate(&mut self, port: usize, high: bool) {
        if high {
            self.gate_values |= 1 << port;
        } else {
            self.gate_values &= !(1 << port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_access_and_clear() {
        let mut buffer = ChunkSampleBuffer::new(2);
        buffer.channel_mut(0).fill(0.5);
        buffer.channel_mut(1).fill(-0.5);
        assert_eq!(buffer.channel(0)[AUDIO_CHUNK_SIZE - 1], 0.5);
        assert_eq!(buffer.channel(1)[0], -0.5);
        buffer.clear();
        assert_eq!(buffer.channel(0)[0], 0.0);
    }

    #[test]
    fn test_view_is_contiguous_channel_range() {
        let mut buffer = ChunkSampleBuffer::new(4);
        buffer.channel_mut(2).fill(0.25);
        let view = buffer.view(2, 2);
        assert_eq!(view.channel_count(), 2);
        assert_eq!(view.channel(0)[0], 0.25);
        assert_eq!(view.channel(1)[0], 0.0);
    }

    #[test]
    fn test_adapt_folds_down_and_zero_fills() {
        let mut source = ChunkSampleBuffer::new(3);
        source.channel_mut(0).fill(1.0);
        source.channel_mut(1).fill(2.0);
        source.channel_mut(2).fill(4.0);

        // 3 channels into 2: channel 2 folds onto channel 0
        let mut dest = ChunkSampleBuffer::new(2);
        dest.adapt_from(&source);
        assert_eq!(dest.channel(0)[0], 5.0);
        assert_eq!(dest.channel(1)[0], 2.0);

        // 2 channels into 3: last channel zero-filled
        let mut wide = ChunkSampleBuffer::new(3);
        wide.adapt_from(&dest);
        assert_eq!(wide.channel(0)[0], 5.0);
        assert_eq!(wide.channel(1)[0], 2.0);
        assert_eq!(wide.channel(2)[0], 0.0);
    }

    #[test]
    fn test_interleaved_roundtrip() {
        let mut frames = vec![0.0; 2 * AUDIO_CHUNK_SIZE];
        for (i, frame) in frames.chunks_mut(2).enumerate() {
            frame[0] = i as f32;
            frame[1] = -(i as f32);
        }
        let mut buffer = ChunkSampleBuffer::new(2);
        buffer.from_interleaved(&frames);
        assert_eq!(buffer.channel(0)[3], 3.0);
        assert_eq!(buffer.channel(1)[3], -3.0);

        let mut out = vec![0.0; 2 * AUDIO_CHUNK_SIZE];
        buffer.to_interleaved(&mut out);
        assert_eq!(out, frames);
    }

    #[test]
    fn test_control_buffer_gates() {
        let mut controls = ControlBuffer::default();
        controls.set_gate(3, true);
        assert!(controls.gate(3));
        assert!(!controls.gate(2));
        controls.set_gate(3, false);
        assert_eq!(controls.gate_values, 0);
    }
}
