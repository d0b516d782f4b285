//! Voice-note metadata for outbound audio: Ogg/Opus duration scan and a deterministic
//! placeholder waveform.

use crate::domain::DomainError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const WAVEFORM_SAMPLES: usize = 64;
/// Used when neither the caller nor the container tells us the length.
pub const DEFAULT_AUDIO_SECONDS: u32 = 30;
const MAX_AUDIO_SECONDS: f64 = 300.0;
const OPUS_SAMPLE_RATE: f64 = 48_000.0;
const PAGE_HEADER_LEN: usize = 27;

/// Duration in whole seconds (rounded up, clamped to 1..=300) and a placeholder waveform.
///
/// Walks the Ogg pages, reads the pre-skip from the `OpusHead` packet and takes the last
/// non-zero granule position as the end of the stream.
pub fn analyze_ogg_opus(data: &[u8]) -> Result<(u32, Vec<u8>), DomainError> {
    if data.len() < 4 || &data[..4] != b"OggS" {
        return Err(DomainError::Media("not an ogg stream".into()));
    }
    let mut last_granule: u64 = 0;
    let mut pre_skip: u64 = 0;
    let mut i = 0;
    while i + PAGE_HEADER_LEN < data.len() {
        if &data[i..i + 4] != b"OggS" {
            i += 1;
            continue;
        }
        let mut gran = [0u8; 8];
        gran.copy_from_slice(&data[i + 6..i + 14]);
        let granule = u64::from_le_bytes(gran);
        let segments = data[i + 26] as usize;
        let body_start = i + PAGE_HEADER_LEN + segments;
        if body_start > data.len() {
            break;
        }
        let body_len: usize = data[i + PAGE_HEADER_LEN..body_start]
            .iter()
            .map(|s| *s as usize)
            .sum();
        let body_end = (body_start + body_len).min(data.len());
        let body = &data[body_start..body_end];
        if body.len() >= 12 && &body[..8] == b"OpusHead" {
            pre_skip = u16::from_le_bytes([body[10], body[11]]) as u64;
        }
        // -1 marks a page with no finished packet
        if granule != 0 && granule != u64::MAX {
            last_granule = granule;
        }
        i = body_end;
    }

    let seconds = if last_granule > 0 {
        let secs = last_granule.saturating_sub(pre_skip) as f64 / OPUS_SAMPLE_RATE;
        secs.clamp(1.0, MAX_AUDIO_SECONDS).ceil() as u32
    } else {
        DEFAULT_AUDIO_SECONDS
    };
    Ok((seconds, placeholder_waveform(seconds)))
}

/// 64 samples in 0..=100, seeded by the duration so the same length draws the same shape.
pub fn placeholder_waveform(seconds: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seconds as u64);
    let base_amp = 35.0_f64;
    let freq = seconds.min(120) as f64 / 30.0;
    (0..WAVEFORM_SAMPLES)
        .map(|i| {
            let pos = i as f64 / WAVEFORM_SAMPLES as f64;
            let mut val = base_amp * (pos * std::f64::consts::PI * freq * 8.0).sin()
                + (base_amp / 2.0) * (pos * std::f64::consts::PI * freq * 16.0).sin();
            val += (rng.r#gen::<f64>() - 0.5) * 15.0;
            val = val * (0.7 + 0.3 * (pos * std::f64::consts::PI).sin()) + 50.0;
            val.clamp(0.0, 100.0) as u8
        })
        .collect()
}
