//! Audio format conversion between captured audio, the canonical wire
//! format, and playback PCM.
//!
//! The backend accepts exactly one container: a 44-byte RIFF/WAVE header
//! (PCM format tag 1, mono, 16-bit) followed by little-endian samples.
//! Replies come back as headerless 16-bit little-endian mono PCM at 24 kHz.
//! Both directions travel base64-encoded because the transport carries only
//! text frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Cursor;

/// Sample rate of outgoing utterances.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of incoming synthesized replies.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("WAV container error: {0}")]
    Container(#[from] hound::Error),

    #[error("transport text error: {0}")]
    TransportText(#[from] base64::DecodeError),

    #[error("audio payload is empty")]
    Empty,
}

/// Mono PCM audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of the buffer in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

/// Decode a captured WAV blob into canonical 16 kHz mono PCM.
///
/// The container may carry any sample rate and channel count; only the
/// first channel is kept, and the result is resampled by linear
/// interpolation to [`TARGET_SAMPLE_RATE`].
pub fn decode_to_pcm(blob: &[u8]) -> Result<PcmBuffer, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(blob))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    // Normalize to f32 regardless of the stored sample format.
    let source: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .step_by(channels)
            .collect(),
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .step_by(channels)
                .map(|s| s as f32 / full_scale)
                .collect()
        }
    };

    if source.is_empty() {
        return Err(DecodeError::Empty);
    }

    let resampled = resample_linear(&source, spec.sample_rate, TARGET_SAMPLE_RATE);
    let samples = resampled.iter().map(|&s| quantize(s)).collect();

    Ok(PcmBuffer::new(samples, TARGET_SAMPLE_RATE))
}

/// Resample mono f32 audio by linear interpolation.
///
/// Output length is exactly `round(len * to_rate / from_rate)`.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let src_len = samples.len();
    let out_len = (src_len as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * src_len as f64 / out_len as f64;
            let index = pos.floor() as usize;
            let fraction = (pos - index as f64) as f32;

            if index + 1 < src_len {
                samples[index] * (1.0 - fraction) + samples[index + 1] * fraction
            } else {
                samples[index]
            }
        })
        .collect()
}

/// Clamp and quantize a float sample to signed 16-bit range.
fn quantize(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Build the canonical WAV payload: a fixed 44-byte header followed by the
/// little-endian sample stream. Total size is `44 + 2 * samples.len()`.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_size = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;

    let mut wav = Vec::with_capacity(44 + samples.len() * 2);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(&pcm_to_bytes(samples));

    wav
}

/// Encode bytes as transport-safe text.
pub fn to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport-safe text back to bytes. Inverse of
/// [`to_transport_text`] for every byte sequence.
pub fn from_transport_text(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text)?)
}

/// Decode a transport-text reply payload: raw 16-bit little-endian mono PCM
/// at [`PLAYBACK_SAMPLE_RATE`].
pub fn decode_playback_audio(text: &str) -> Result<PcmBuffer, DecodeError> {
    let bytes = from_transport_text(text)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(PcmBuffer::new(bytes_to_pcm(&bytes), PLAYBACK_SAMPLE_RATE))
}

/// Convert i16 samples to little-endian bytes.
pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Convert little-endian bytes to i16 samples. A trailing odd byte is
/// dropped.
pub fn bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
