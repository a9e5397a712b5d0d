//! Channel adaptation policy.
//!
//! One rule, applied wherever a block's channel count differs from what the
//! next stage is configured for:
//! - mono to N channels duplicates the mono sample into every channel
//! - N channels to mono averages each frame
//! - any other mismatch passes the block through unchanged

use flowstate_core::{AudioBlock, StreamProperties};
use tracing::{debug, trace};

/// What [`adapt_channels`] did to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptation {
    /// Channel counts already matched.
    Unchanged,
    /// Mono duplicated into every channel.
    Upmixed,
    /// Frames averaged down to mono.
    Downmixed,
    /// Unsupported mismatch, block passed through as-is.
    PassedThrough,
}

/// Adapt `block` to `target_channels` according to the policy above.
pub fn adapt_channels(block: AudioBlock, target_channels: u16) -> (AudioBlock, Adaptation) {
    let source_channels = block.channels();
    match classify(source_channels, target_channels) {
        Adaptation::Unchanged => (block, Adaptation::Unchanged),
        Adaptation::PassedThrough => {
            trace!(
                "Channel mismatch: expected {target_channels}, got {source_channels}; passing through"
            );
            (block, Adaptation::PassedThrough)
        }
        adaptation => {
            debug!("Adapting block from {source_channels} to {target_channels} channels");
            let props = StreamProperties {
                sample_rate: block.sample_rate(),
                channels: target_channels,
            };
            let start = block.start_frame();
            let samples = adapt_interleaved(block.samples(), source_channels, target_channels);
            (
                AudioBlock::from_interleaved(samples, props).with_start_frame(start),
                adaptation,
            )
        }
    }
}

/// Adapt raw interleaved samples between channel counts.
///
/// Unsupported mismatches return the input unchanged.
pub fn adapt_interleaved(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    match classify(from, to) {
        Adaptation::Upmixed => samples
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(to as usize))
            .collect(),
        Adaptation::Downmixed => {
            let width = from as usize;
            samples
                .chunks_exact(width)
                .map(|frame| frame.iter().sum::<f32>() / width as f32)
                .collect()
        }
        Adaptation::Unchanged | Adaptation::PassedThrough => samples.to_vec(),
    }
}

const fn classify(from: u16, to: u16) -> Adaptation {
    if from == to {
        Adaptation::Unchanged
    } else if from == 1 && to > 1 {
        Adaptation::Upmixed
    } else if to == 1 && from > 1 {
        Adaptation::Downmixed
    } else {
        Adaptation::PassedThrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block(samples: Vec<f32>, channels: u16) -> AudioBlock {
        AudioBlock::from_interleaved(
            samples,
            StreamProperties {
                sample_rate: 44_100,
                channels,
            },
        )
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let (out, how) = adapt_channels(block(vec![0.1, 0.2, 0.3], 1), 2);
        assert_eq!(how, Adaptation::Upmixed);
        assert_eq!(out.channels(), 2);
        assert_eq!(out.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_stereo_to_mono_averages() {
        let (out, how) = adapt_channels(block(vec![1.0, 0.0, 0.5, -0.5], 2), 1);
        assert_eq!(how, Adaptation::Downmixed);
        assert_eq!(out.samples(), &[0.5, 0.0]);
    }

    #[test]
    fn test_other_mismatch_passes_through() {
        let input = block(vec![0.0; 12], 6);
        let (out, how) = adapt_channels(input.clone(), 2);
        assert_eq!(how, Adaptation::PassedThrough);
        assert_eq!(out, input);
    }

    #[test]
    fn test_start_frame_preserved() {
        let input = block(vec![0.0; 4], 1).with_start_frame(77);
        let (out, _) = adapt_channels(input, 2);
        assert_eq!(out.start_frame(), 77);
    }

    proptest! {
        #[test]
        fn prop_upmix_channels_identical(
            mono in proptest::collection::vec(-1.0f32..1.0, 1..256),
            channels in 2u16..8,
        ) {
            let (out, _) = adapt_channels(block(mono.clone(), 1), channels);
            prop_assert_eq!(out.frames(), mono.len());
            for ch in 0..channels as usize {
                prop_assert_eq!(out.channel(ch), mono.clone());
            }
        }

        #[test]
        fn prop_downmix_is_frame_average(
            left in proptest::collection::vec(-1.0f32..1.0, 1..256),
        ) {
            let right: Vec<f32> = left.iter().map(|s| -s * 0.5).collect();
            let interleaved: Vec<f32> = left.iter().zip(&right).flat_map(|(l, r)| [*l, *r]).collect();
            let (out, _) = adapt_channels(block(interleaved, 2), 1);
            for (i, s) in out.samples().iter().enumerate() {
                prop_assert!((s - (left[i] + right[i]) / 2.0).abs() < 1e-6);
            }
        }
    }
}
