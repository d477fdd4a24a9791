//! Tuning configuration for the audio pipeline and session.
//!
//! The constants here are sensitivity choices, not protocol constants: the
//! wire format (16 kHz WAV out, 24 kHz PCM in) lives in `codec`.

use std::time::Duration;

/// Configuration for the voice activity detector.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized RMS energy above which a sample counts as speech.
    /// 0.001 is very sensitive, 0.1 barely triggers on a raised voice.
    pub threshold: f32,

    /// FFT length of the analyser window.
    pub fft_size: usize,

    /// Time-smoothing constant applied to successive magnitude spectra,
    /// in [0, 1). Higher values smooth more.
    pub smoothing: f32,

    /// Interval between VAD samples in milliseconds.
    pub sample_interval_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            fft_size: 2048,
            smoothing: 0.8,
            sample_interval_ms: 100,
        }
    }
}

/// Configuration for the active-listening controller.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Minimum duration of sustained speech before a recording opens.
    pub min_speech_ms: u64,

    /// Duration of sustained silence before an open recording closes.
    pub silence_ms: u64,

    /// Settle delay before listening resumes after the assistant finishes
    /// speaking, so the output tail is not picked up as speech.
    pub resume_settle_ms: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            min_speech_ms: 500,
            silence_ms: 1500,
            resume_settle_ms: 500,
        }
    }
}

impl ListenConfig {
    pub fn min_speech(&self) -> Duration {
        Duration::from_millis(self.min_speech_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn resume_settle(&self) -> Duration {
        Duration::from_millis(self.resume_settle_ms)
    }
}

/// Top-level session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend WebSocket endpoint.
    pub server_url: String,

    /// Delay between reconnection attempts after the transport drops.
    pub reconnect_delay_ms: u64,

    /// Sample rate requested from the capture device.
    pub capture_rate: u32,

    pub vad: VadConfig,
    pub listen: ListenConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:3001/ws".to_string(),
            reconnect_delay_ms: 3000,
            capture_rate: 16_000,
            vad: VadConfig::default(),
            listen: ListenConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Build a config from the environment, falling back to defaults.
    /// `REVOICE_SERVER_URL` overrides the backend endpoint.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("REVOICE_SERVER_URL") {
            cfg.server_url = url;
        }
        cfg
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
