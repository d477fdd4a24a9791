//! Spectrum analyser feeding the voice activity decision.
//!
//! Mirrors the behavior of a Web-Audio analyser node: a windowed
//! 2048-point FFT over the most recent capture samples, time-smoothed
//! magnitudes, and frequency bins scaled to bytes over a fixed decibel
//! range. The VAD energy measure is the RMS of those byte bins normalized
//! by the maximum bin value.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

/// Decibel value mapped to bin value 0.
const MIN_DECIBELS: f32 = -100.0;

/// Decibel value mapped to bin value 255.
const MAX_DECIBELS: f32 = -30.0;

/// Windowed FFT analyser with time-smoothed byte frequency bins.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    /// Most recent `fft_size` input samples, oldest first.
    recent: VecDeque<f32>,
    /// Smoothed magnitude spectrum from previous reads.
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            smoothing,
            window: blackman_window(fft_size),
            recent: VecDeque::with_capacity(fft_size),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    /// Number of frequency bins produced per read.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed capture samples into the rolling analysis window.
    pub fn push(&mut self, samples: &[i16]) {
        for &s in samples {
            if self.recent.len() == self.fft_size {
                self.recent.pop_front();
            }
            self.recent.push_back(f32::from(s) / 32768.0);
        }
    }

    /// Compute the current byte frequency-bin array.
    ///
    /// Missing samples (before the window has filled) are treated as
    /// silence, matching an analyser read right after stream start.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(self.fft_size);
        let pad = self.fft_size - self.recent.len();
        buffer.extend(std::iter::repeat(Complex::new(0.0, 0.0)).take(pad));
        for (i, &s) in self.recent.iter().enumerate() {
            buffer.push(Complex::new(s * self.window[pad + i], 0.0));
        }

        self.fft.process(&mut buffer);

        let tau = self.smoothing;
        let scale = 1.0 / self.fft_size as f32;
        buffer
            .iter()
            .take(self.bin_count())
            .zip(self.smoothed.iter_mut())
            .map(|(bin, prev)| {
                let magnitude = bin.norm() * scale;
                *prev = tau * *prev + (1.0 - tau) * magnitude;
                byte_from_magnitude(*prev)
            })
            .collect()
    }
}

/// RMS over byte frequency bins, normalized by the maximum bin value.
/// Always in [0, 1].
pub fn normalized_rms(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: f64 = bins.iter().map(|&b| f64::from(b) * f64::from(b)).sum();
    ((sum / bins.len() as f64).sqrt() / 255.0) as f32
}

fn byte_from_magnitude(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
                + 0.08 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, rate: f32, amplitude: f32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / rate;
                (amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin() * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn silence_has_zero_energy() {
        let mut analyser = SpectrumAnalyser::new(2048, 0.8);
        analyser.push(&vec![0i16; 4096]);
        let bins = analyser.byte_frequency_data();
        assert!(bins.iter().all(|&b| b == 0));
        assert_eq!(normalized_rms(&bins), 0.0);
    }

    #[test]
    fn loud_tone_exceeds_threshold() {
        let mut analyser = SpectrumAnalyser::new(2048, 0.8);
        analyser.push(&sine(440.0, 16_000.0, 0.5, 2048));
        let bins = analyser.byte_frequency_data();
        assert!(normalized_rms(&bins) > 0.01);
    }

    #[test]
    fn normalized_rms_bounds() {
        assert_eq!(normalized_rms(&[]), 0.0);
        assert_eq!(normalized_rms(&[255; 1024]), 1.0);
        let mixed: Vec<u8> = (0..=255).collect();
        let rms = normalized_rms(&mixed);
        assert!(rms > 0.0 && rms < 1.0);
    }

    #[test]
    fn threshold_boundary() {
        // All bins at 3 → rms 3/255 ≈ 0.0118, just above the 0.01 default.
        assert!(normalized_rms(&[3; 1024]) > 0.01);
        // All bins at 2 → rms 2/255 ≈ 0.0078, below it.
        assert!(normalized_rms(&[2; 1024]) < 0.01);
    }

    #[test]
    fn partial_window_is_padded() {
        let mut analyser = SpectrumAnalyser::new(2048, 0.8);
        analyser.push(&sine(440.0, 16_000.0, 0.5, 200));
        // Must not panic and must still produce a full bin array.
        let bins = analyser.byte_frequency_data();
        assert_eq!(bins.len(), 1024);
    }

    #[test]
    fn smoothing_decays_after_signal_stops() {
        let mut analyser = SpectrumAnalyser::new(2048, 0.8);
        analyser.push(&sine(440.0, 16_000.0, 0.8, 2048));
        let loud = normalized_rms(&analyser.byte_frequency_data());

        analyser.push(&vec![0i16; 2048]);
        let first_quiet = normalized_rms(&analyser.byte_frequency_data());
        for _ in 0..40 {
            analyser.push(&vec![0i16; 2048]);
            analyser.byte_frequency_data();
        }
        let settled = normalized_rms(&analyser.byte_frequency_data());

        assert!(loud > 0.01);
        assert!(first_quiet <= loud);
        assert!(settled < first_quiet);
    }
}
