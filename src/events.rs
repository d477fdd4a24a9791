use crate::protocol::ServerEvent;

/// Connection lifecycle and inbound traffic, as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt is underway.
    Connecting,
    /// The socket opened and `start_session` was sent.
    Opened,
    /// A parsed frame from the backend.
    Server(ServerEvent),
    /// The socket closed or errored; a reconnect is scheduled.
    Closed,
}

/// User-initiated controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    /// The microphone control: interrupts the assistant if it is speaking,
    /// then toggles active listening.
    MicPressed,
    /// Toggle local playback muting.
    MutePressed,
    /// Tear the session down.
    Shutdown,
}
