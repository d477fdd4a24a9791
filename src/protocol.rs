//! Wire protocol with the conversation backend.
//!
//! Every frame is a JSON object tagged by a `type` field. Audio payloads
//! travel as transport text (base64): outgoing utterances as the canonical
//! WAV container, incoming replies as raw 24 kHz 16-bit mono PCM.

use serde::{Deserialize, Serialize};

/// Messages sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Opens the logical session; sent once per connection.
    StartSession,
    /// One complete utterance as a transport-text WAV payload.
    SendAudio { audio: String },
    /// The user cut off an in-progress assistant reply.
    Interrupt,
}

/// Messages received from the backend. Tags this client does not know
/// fold into [`ServerEvent::Unknown`] and are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The logical session is ready for audio.
    SessionStarted,
    /// A synthesized reply: transport-text raw PCM at 24 kHz.
    AudioResponse { audio: String },
    /// Fallback reply when synthesis failed on the backend.
    TextResponse { text: String },
    /// The assistant finished one reply.
    TurnComplete,
    /// Backend-reported error; the session stays alive.
    Error { message: String },
    /// Terminal state for the logical session.
    SessionEnded,
    #[serde(other)]
    Unknown,
}
