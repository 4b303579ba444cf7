//! Crossfade length computation.
//!
//! A pure function from the configured crossfade parameters and the
//! current audio format to an overlap length in chunks. The player stages
//! that many chunks of the ending song and mixes them with the first
//! chunks of the next song.

use crate::config::CrossFadeConfig;
use chorus_common::AudioFormat;

/// Number of whole chunks the crossfade overlap spans.
///
/// Returns 0 (no crossfade) when the duration is zero, the formats of the
/// two songs differ, or the overlap would not fill a single chunk. The
/// result is capped so the overlap can never exhaust the pipe.
pub fn calculate_chunks(
    config: &CrossFadeConfig,
    format: AudioFormat,
    next_format: AudioFormat,
    chunk_frames: usize,
    buffer_chunks: usize,
) -> usize {
    if config.duration.is_zero() {
        return 0;
    }

    if format != next_format {
        // mixing requires identical formats
        return 0;
    }

    // MixRamp overlaps at analyzed loudness points instead; its delay
    // shortens the plain crossfade window
    let effective = config.duration.saturating_sub(config.mixramp_delay);
    if effective.is_zero() {
        return 0;
    }

    let frames = format.time_to_frames(effective) as usize;
    let chunks = frames / chunk_frames;

    chunks.min(buffer_chunks.saturating_sub(1) / 2)
}

/// Mix weight of the next song for overlap chunk `index` of `total`.
pub fn mix_ratio(index: usize, total: usize) -> f32 {
    debug_assert!(total > 0);
    (index + 1) as f32 / (total + 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_common::SongTime;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44100, 2)
    }

    fn config(duration_ms: u64) -> CrossFadeConfig {
        CrossFadeConfig {
            duration: SongTime::from_millis(duration_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_duration_disables() {
        assert_eq!(calculate_chunks(&config(0), fmt(), fmt(), 1024, 172), 0);
    }

    #[test]
    fn test_format_mismatch_disables() {
        let other = AudioFormat::new(48000, 2);
        assert_eq!(calculate_chunks(&config(2000), fmt(), other, 1024, 172), 0);
    }

    #[test]
    fn test_two_seconds_at_44100() {
        // 2s = 88200 frames = 86 chunks of 1024
        assert_eq!(calculate_chunks(&config(2000), fmt(), fmt(), 1024, 400), 86);
    }

    #[test]
    fn test_capped_by_buffer() {
        let n = calculate_chunks(&config(60_000), fmt(), fmt(), 1024, 172);
        assert!(n <= 85);
    }

    #[test]
    fn test_mixramp_delay_shortens() {
        let mut c = config(2000);
        c.mixramp_delay = SongTime::from_millis(1000);
        let full = calculate_chunks(&config(2000), fmt(), fmt(), 1024, 400);
        let shortened = calculate_chunks(&c, fmt(), fmt(), 1024, 400);
        assert!(shortened < full);
        assert!(shortened > 0);
    }

    #[test]
    fn test_mix_ratio_monotonic() {
        let ratios: Vec<f32> = (0..5).map(|i| mix_ratio(i, 5)).collect();
        assert!(ratios.windows(2).all(|w| w[0] < w[1]));
        assert!(ratios[0] > 0.0);
        assert!(*ratios.last().unwrap() < 1.0);
    }
}
