//! Voice activity detection over a live microphone stream.
//!
//! Owns one capture stream and a spectrum analyser; each `sample()` call
//! drains whatever frames the device produced since the last call and
//! reports whether the current spectral energy looks like speech. The
//! stream and analyser are released together when the detector is dropped.

use tracing::debug;

use crate::analyzer::{normalized_rms, SpectrumAnalyser};
use crate::config::VadConfig;
use crate::device::{DeviceError, MicStream};

pub struct VoiceActivityDetector {
    stream: MicStream,
    analyser: SpectrumAnalyser,
    threshold: f32,
}

impl VoiceActivityDetector {
    /// Acquire a microphone stream and attach the analyser.
    pub fn open(app_name: &str, sample_rate: u32, cfg: &VadConfig) -> Result<Self, DeviceError> {
        let stream = MicStream::open(app_name, sample_rate)?;
        debug!(sample_rate, threshold = cfg.threshold, "voice activity detector opened");
        Ok(Self::with_stream(stream, cfg))
    }

    fn with_stream(stream: MicStream, cfg: &VadConfig) -> Self {
        Self {
            stream,
            analyser: SpectrumAnalyser::new(cfg.fft_size, cfg.smoothing),
            threshold: cfg.threshold,
        }
    }

    /// Read the current energy measure and decide whether speech is
    /// present. Intended to run on the controller's fixed cadence.
    pub fn sample(&mut self) -> bool {
        while let Some(frame) = self.stream.try_frame() {
            self.analyser.push(&frame);
        }
        let bins = self.analyser.byte_frequency_data();
        normalized_rms(&bins) > self.threshold
    }

    #[cfg(test)]
    pub(crate) fn for_test(stream: MicStream, cfg: &VadConfig) -> Self {
        Self::with_stream(stream, cfg)
    }
}
