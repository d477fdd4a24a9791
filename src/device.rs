//! PulseAudio device streams.
//!
//! Capture and playback both use the blocking simple API on dedicated OS
//! threads, bridged to the async session over channels. Each stream is an
//! owned value with one teardown path: dropping a [`MicStream`] raises its
//! shutdown flag and the worker thread exits on its next read; playback is
//! interrupted through an explicit stop flag.
//!
//! Echo cancellation and noise suppression are provided by the PulseAudio
//! filter stack when available; the streams here request plain 16-bit mono
//! at the configured rate.

use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::codec::{bytes_to_pcm, pcm_to_bytes, PcmBuffer};

/// Error type for device access and I/O.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("microphone unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("audio output unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("playback write failed: {0}")]
    Write(String),
}

/// How a playback run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

/// An open microphone capture stream.
///
/// A worker thread reads 100 ms frames from the device and pushes them over
/// a bounded channel. Dropping the stream releases the device.
pub struct MicStream {
    rx: mpsc::Receiver<Vec<i16>>,
    shutdown: Arc<AtomicBool>,
    sample_rate: u32,
}

impl MicStream {
    /// Open the default capture device at the given rate, mono S16LE.
    pub fn open(app_name: &str, sample_rate: u32) -> Result<Self, DeviceError> {
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let app = app_name.to_string();

        std::thread::spawn(move || {
            capture_worker(&app, sample_rate, frame_tx, ready_tx, worker_shutdown);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                rx: frame_rx,
                shutdown,
                sample_rate,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::CaptureUnavailable(
                "capture thread exited before opening".to_string(),
            )),
        }
    }

    /// Await the next 100 ms capture frame. `None` once the device stream
    /// has ended.
    pub async fn next_frame(&mut self) -> Option<Vec<i16>> {
        self.rx.recv().await
    }

    /// Take one pending frame without waiting.
    pub fn try_frame(&mut self) -> Option<Vec<i16>> {
        self.rx.try_recv().ok()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Build a stream from a raw frame channel. Used by tests to stand in
    /// for a real device.
    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Vec<i16>>, sample_rate: u32) -> Self {
        Self {
            rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            sample_rate,
        }
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn capture_worker(
    app_name: &str,
    sample_rate: u32,
    tx: mpsc::Sender<Vec<i16>>,
    ready: std::sync::mpsc::Sender<Result<(), DeviceError>>,
    shutdown: Arc<AtomicBool>,
) {
    let spec = Spec {
        format: Format::S16le,
        channels: 1,
        rate: sample_rate,
    };

    let simple = match Simple::new(
        None, // default server
        app_name,
        Direction::Record,
        None, // default device
        "capture",
        &spec,
        None, // default channel map
        None, // default buffering
    ) {
        Ok(simple) => {
            let _ = ready.send(Ok(()));
            simple
        }
        Err(e) => {
            let _ = ready.send(Err(DeviceError::CaptureUnavailable(format!("{e}"))));
            return;
        }
    };

    // 100 ms of S16LE mono per read.
    let mut buffer = vec![0u8; (sample_rate / 10) as usize * 2];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if let Err(e) = simple.read(&mut buffer) {
            error!("capture read failed: {e}");
            break;
        }
        if tx.blocking_send(bytes_to_pcm(&buffer)).is_err() {
            // Receiver dropped, stream torn down.
            break;
        }
    }
    debug!("capture thread stopped");
}

/// Play a PCM buffer through the default output device, blocking until it
/// finishes or `stop` is raised.
///
/// Audio is written in 100 ms slices so an interruption takes effect
/// promptly; on interruption the sink buffer is flushed rather than
/// drained.
pub fn play_blocking(
    app_name: &str,
    pcm: &PcmBuffer,
    stop: &AtomicBool,
) -> Result<PlaybackOutcome, DeviceError> {
    let spec = Spec {
        format: Format::S16le,
        channels: 1,
        rate: pcm.sample_rate,
    };

    let simple = Simple::new(
        None,
        app_name,
        Direction::Playback,
        None,
        "playback",
        &spec,
        None,
        None,
    )
    .map_err(|e| DeviceError::PlaybackUnavailable(format!("{e}")))?;

    let slice = (pcm.sample_rate / 10).max(1) as usize;
    for chunk in pcm.samples.chunks(slice) {
        if stop.load(Ordering::Relaxed) {
            let _ = simple.flush();
            return Ok(PlaybackOutcome::Interrupted);
        }
        simple
            .write(&pcm_to_bytes(chunk))
            .map_err(|e| DeviceError::Write(format!("{e}")))?;
    }

    if stop.load(Ordering::Relaxed) {
        let _ = simple.flush();
        return Ok(PlaybackOutcome::Interrupted);
    }

    simple
        .drain()
        .map_err(|e| DeviceError::Write(format!("{e}")))?;
    Ok(PlaybackOutcome::Completed)
}
