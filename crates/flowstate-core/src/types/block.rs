//! Fixed-size blocks of interleaved audio.

use super::StreamProperties;

/// A fixed-length run of interleaved `f32` frames.
///
/// Blocks are moved, never shared: whichever pipeline stage holds one owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Interleaved samples, `frames * channels` long.
    samples: Vec<f32>,
    /// Samples per frame.
    channels: u16,
    /// Frames per second.
    sample_rate: u32,
    /// Stream position of the first frame.
    start_frame: u64,
}

impl AudioBlock {
    /// Wrap interleaved samples.
    ///
    /// A trailing partial frame is dropped so the block always holds whole frames.
    pub fn from_interleaved(mut samples: Vec<f32>, props: StreamProperties) -> Self {
        let channels = props.channel_count().max(1);
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            samples,
            channels: props.channels.max(1),
            sample_rate: props.sample_rate,
            start_frame: 0,
        }
    }

    /// An all-zero block of `frames` frames.
    pub fn silence(frames: usize, props: StreamProperties) -> Self {
        Self::from_interleaved(vec![0.0; frames * props.channel_count()], props)
    }

    /// Tag the block with the stream position of its first frame.
    #[must_use]
    pub const fn with_start_frame(mut self, start_frame: u64) -> Self {
        self.start_frame = start_frame;
        self
    }

    /// Number of frames in the block.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Number of channels.
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate the block was decoded at.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stream position of the first frame.
    pub const fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Stream properties of this block.
    pub const fn properties(&self) -> StreamProperties {
        StreamProperties {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Whether the block matches the given shape.
    pub fn has_shape(&self, frames: usize, channels: u16) -> bool {
        self.channels == channels && self.frames() == frames
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Iterate over frames as channel slices.
    pub fn frames_iter(&self) -> std::slice::ChunksExact<'_, f32> {
        self.samples.chunks_exact(self.channels as usize)
    }

    /// Iterate mutably over frames as channel slices.
    pub fn frames_iter_mut(&mut self) -> std::slice::ChunksExactMut<'_, f32> {
        self.samples.chunks_exact_mut(self.channels as usize)
    }

    /// Copy of one channel's samples.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        self.frames_iter()
            .filter_map(|frame| frame.get(channel).copied())
            .collect()
    }

    /// Whether every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }

    /// Whether every sample is finite.
    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|s| s.is_finite())
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Zero every sample in place.
    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// Zero-pad (or truncate) to exactly `frames` frames.
    pub fn resize_frames(&mut self, frames: usize) {
        self.samples.resize(frames * self.channels as usize, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEREO: StreamProperties = StreamProperties {
        sample_rate: 44_100,
        channels: 2,
    };

    #[test]
    fn test_silence_shape() {
        let block = AudioBlock::silence(256, STEREO);
        assert!(block.has_shape(256, 2));
        assert_eq!(block.samples().len(), 512);
        assert!(block.is_silent());
    }

    #[test]
    fn test_partial_frame_dropped() {
        let block = AudioBlock::from_interleaved(vec![0.1, 0.2, 0.3], STEREO);
        assert_eq!(block.frames(), 1);
        assert_eq!(block.samples(), &[0.1, 0.2]);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_channel_extraction_and_padding() {
        let mut block =
            AudioBlock::from_interleaved(vec![1.0, -1.0, 2.0, -2.0], STEREO).with_start_frame(10);
        assert_eq!(block.channel(0), vec![1.0, 2.0]);
        assert_eq!(block.channel(1), vec![-1.0, -2.0]);
        assert_eq!(block.peak(), 2.0);
        assert_eq!(block.start_frame(), 10);

        block.resize_frames(4);
        assert!(block.has_shape(4, 2));
        assert_eq!(&block.samples()[4..], &[0.0; 4]);
    }
}
