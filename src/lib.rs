//! revoice: a native voice-assistant client.
//!
//! Captures microphone audio, detects speech activity locally, streams
//! recorded utterances to a conversation backend over a WebSocket, and
//! plays back synthesized replies, with barge-in. The pipeline is a set of
//! small state machines owned by a single session task; see `session` for
//! the wiring.

#![forbid(unsafe_code)]

/// Spectrum analyser and the VAD energy measure
pub mod analyzer;
/// Conversion between capture blobs, the canonical WAV wire format,
/// transport text, and playback PCM
pub mod codec;
/// Tuning configuration
pub mod config;
/// PulseAudio capture and playback streams
pub mod device;
/// Events passed between tasks
pub mod events;
/// Debounced start/stop of recording over VAD samples
pub mod listening;
/// Assistant playback state
pub mod playback;
/// Wire protocol with the backend
pub mod protocol;
/// One microphone recording, open to finalized blob
pub mod recording;
/// The session broker owning all state machines
pub mod session;
/// WebSocket transport with fixed-delay reconnection
pub mod transport;
/// Microphone-backed voice activity detection
pub mod vad;
