//! Session broker: the single owner of every state machine.
//!
//! All coordination (VAD cadence, recording lifecycle, playback turns,
//! transport phases, user controls) happens in one task whose handlers
//! run to completion, so the machines guard each other without locks.
//! Observers get a read-only projection of the state through a watch
//! channel; the machines here are the source of truth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::SessionConfig;
use crate::device::{self, DeviceError, PlaybackOutcome};
use crate::events::{TransportEvent, UiCommand};
use crate::listening::{ActiveListeningController, ListenAction};
use crate::playback::PlaybackController;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::recording::RecordingSession;
use crate::transport::TransportHandle;
use crate::vad::VoiceActivityDetector;

/// Application name reported to the audio server.
pub const APP_NAME: &str = "revoice";

/// Connection lifecycle as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Error,
    Ended,
}

/// Read-only projection of the session machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: ConnectionPhase,
    pub speaking: bool,
    pub active_listening: bool,
    pub recording: bool,
    pub voice_activity: bool,
    pub muted: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            speaking: false,
            active_listening: false,
            recording: false,
            voice_activity: false,
            muted: false,
        }
    }
}

type PlaybackResult = Result<PlaybackOutcome, DeviceError>;

pub struct VoiceSession {
    cfg: SessionConfig,
    transport: TransportHandle,
    listening: ActiveListeningController,
    playback: PlaybackController,
    vad: Option<VoiceActivityDetector>,
    recording: Option<RecordingSession>,
    /// Stop flag of the playback run currently in flight.
    playback_stop: Option<Arc<AtomicBool>>,
    phase: ConnectionPhase,
    active_listening: bool,
    voice_activity: bool,
    muted: bool,
    state_tx: watch::Sender<SessionState>,
}

impl VoiceSession {
    pub fn new(
        cfg: SessionConfig,
        transport: TransportHandle,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let session = Self {
            listening: ActiveListeningController::new(cfg.listen.clone()),
            playback: PlaybackController::new(cfg.listen.resume_settle()),
            cfg,
            transport,
            vad: None,
            recording: None,
            playback_stop: None,
            phase: ConnectionPhase::Disconnected,
            active_listening: false,
            voice_activity: false,
            muted: false,
            state_tx,
        };
        (session, state_rx)
    }

    /// Drive the session until shutdown.
    pub async fn run(
        mut self,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut ui_rx: mpsc::UnboundedReceiver<UiCommand>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.cfg.vad.sample_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (done_tx, mut done_rx) = mpsc::channel::<PlaybackResult>(1);

        loop {
            let resume_at = self.playback.resume_at();

            tokio::select! {
                _ = ticker.tick() => self.on_tick(Instant::now()),

                event = transport_rx.recv() => match event {
                    Some(event) => self.on_transport_event(event, &done_tx),
                    None => break,
                },

                command = ui_rx.recv() => match command {
                    Some(UiCommand::Shutdown) | None => break,
                    Some(command) => self.on_ui(command),
                },

                result = done_rx.recv() => {
                    if let Some(result) = result {
                        self.on_playback_done(result, Instant::now());
                    }
                }

                _ = async {
                    match resume_at {
                        Some(at) => tokio::time::sleep_until(at.into()).await,
                        None => std::future::pending().await,
                    }
                }, if resume_at.is_some() => self.on_resume_due(),
            }
        }

        self.teardown();
    }

    /// One VAD cadence tick: sample energy, advance the debounce machine,
    /// and keep an open recording drained.
    fn on_tick(&mut self, now: Instant) {
        if let Some(recording) = self.recording.as_mut() {
            recording.drain_available();
        }

        let Some(vad) = self.vad.as_mut() else {
            return;
        };
        let speech = vad.sample();
        self.voice_activity = speech;

        // A recording cycle never starts or advances without a live
        // connection to carry its result.
        if self.is_connected() {
            match self.listening.on_sample(speech, now) {
                Some(ListenAction::OpenRecording) => self.open_recording(),
                Some(ListenAction::CloseRecording) => self.close_recording_and_send(),
                None => {}
            }
        }
        self.publish();
    }

    fn open_recording(&mut self) {
        if self.recording.is_some() {
            return;
        }
        match RecordingSession::open(APP_NAME, self.cfg.capture_rate) {
            Ok(session) => {
                info!("utterance recording started");
                self.recording = Some(session);
            }
            Err(e) => {
                // Hands-free path: log, never block the flow.
                warn!("could not open recording: {e}");
                self.listening.reset();
            }
        }
    }

    /// Finalize the open recording and ship it to the backend.
    fn close_recording_and_send(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        let blob = recording.finish();

        let pcm = match codec::decode_to_pcm(&blob) {
            Ok(pcm) => pcm,
            Err(e) => {
                // Aborts this utterance only; the pipeline is already idle.
                warn!("utterance dropped, decode failed: {e}");
                return;
            }
        };

        let wav = codec::encode_wav(&pcm.samples, codec::TARGET_SAMPLE_RATE);
        info!(bytes = wav.len(), "sending utterance");
        self.transport.send(ClientEvent::SendAudio {
            audio: codec::to_transport_text(&wav),
        });
    }

    fn on_transport_event(&mut self, event: TransportEvent, done_tx: &mpsc::Sender<PlaybackResult>) {
        match event {
            TransportEvent::Connecting => {
                self.phase = ConnectionPhase::Connecting;
            }
            TransportEvent::Opened => {
                self.phase = ConnectionPhase::Connected;
            }
            TransportEvent::Closed => {
                self.phase = ConnectionPhase::Disconnected;
                // An utterance in flight has nowhere to go.
                self.discard_recording();
                self.listening.reset();
            }
            TransportEvent::Server(event) => self.on_server_event(event, done_tx),
        }
        self.publish();
    }

    fn on_server_event(&mut self, event: ServerEvent, done_tx: &mpsc::Sender<PlaybackResult>) {
        match event {
            ServerEvent::SessionStarted => {
                info!("session ready");
                self.phase = ConnectionPhase::Ready;
            }
            ServerEvent::AudioResponse { audio } => {
                if self.muted {
                    debug!("muted, dropping reply audio");
                } else {
                    self.start_playback(&audio, done_tx);
                }
            }
            ServerEvent::TextResponse { text } => {
                info!("assistant replied in text: {text}");
            }
            ServerEvent::TurnComplete => {
                debug!("turn complete");
                if !self.playback.is_speaking() && self.active_listening {
                    self.start_listening(false);
                }
            }
            ServerEvent::Error { message } => {
                error!("server error: {message}");
                self.phase = ConnectionPhase::Error;
            }
            ServerEvent::SessionEnded => {
                info!("session ended by server");
                self.phase = ConnectionPhase::Ended;
            }
            ServerEvent::Unknown => debug!("ignoring unknown server event"),
        }
    }

    /// Decode a reply and play it, stopping listening for the duration.
    fn start_playback(&mut self, audio: &str, done_tx: &mpsc::Sender<PlaybackResult>) {
        let pcm = match codec::decode_playback_audio(audio) {
            Ok(pcm) => pcm,
            Err(e) => {
                // This reply is lost; the pipeline stays idle.
                error!("undecodable reply audio: {e}");
                return;
            }
        };

        if !self.playback.on_reply_started() {
            warn!("reply arrived while one is playing, ignoring");
            return;
        }

        // The assistant has the floor: release the microphone entirely.
        self.stop_listening();
        self.discard_recording();

        info!(duration_ms = pcm.duration_ms(), "assistant speaking");
        let stop = Arc::new(AtomicBool::new(false));
        self.playback_stop = Some(Arc::clone(&stop));
        let done_tx = done_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = device::play_blocking(APP_NAME, &pcm, &stop);
            let _ = done_tx.blocking_send(result);
        });
    }

    fn on_playback_done(&mut self, result: PlaybackResult, now: Instant) {
        self.playback_stop = None;
        match result {
            Ok(PlaybackOutcome::Completed) => {
                self.playback.on_finished(now, self.active_listening);
            }
            Ok(PlaybackOutcome::Interrupted) => {
                // The interrupt handler already transitioned the machine.
            }
            Err(e) => {
                // A failed reply must not leave the session stuck speaking.
                error!("playback failed: {e}");
                self.playback.on_finished(now, self.active_listening);
            }
        }
        self.publish();
    }

    /// The post-reply settle delay elapsed.
    fn on_resume_due(&mut self) {
        self.playback.clear_resume();
        if self.active_listening && self.is_connected() {
            self.start_listening(false);
        }
        self.publish();
    }

    fn on_ui(&mut self, command: UiCommand) {
        match command {
            UiCommand::MicPressed => self.on_mic_pressed(),
            UiCommand::MutePressed => {
                self.muted = !self.muted;
                info!(muted = self.muted, "output mute toggled");
            }
            UiCommand::Shutdown => unreachable!("handled by the run loop"),
        }
        self.publish();
    }

    fn on_mic_pressed(&mut self) {
        if !self.is_connected() {
            warn!("not connected to the backend yet");
            return;
        }

        if self.playback.is_speaking() {
            // Barge-in: cut the reply off before touching listening state.
            info!("interrupting assistant");
            self.transport.send(ClientEvent::Interrupt);
            self.playback.on_interrupted();
            if let Some(stop) = self.playback_stop.take() {
                stop.store(true, Ordering::Relaxed);
            }
        }

        if self.active_listening {
            self.active_listening = false;
            // An utterance already under way is worth finishing.
            self.close_recording_and_send();
            self.stop_listening();
            info!("active listening disabled");
        } else {
            self.active_listening = true;
            self.start_listening(true);
            info!("active listening enabled");
        }
    }

    /// Bring up the VAD stream. `manual` selects how loudly a device
    /// failure is surfaced.
    fn start_listening(&mut self, manual: bool) {
        if self.vad.is_some() || self.playback.is_speaking() {
            return;
        }
        match VoiceActivityDetector::open(APP_NAME, self.cfg.capture_rate, &self.cfg.vad) {
            Ok(vad) => {
                self.vad = Some(vad);
                self.listening.reset();
                self.playback.clear_resume();
                debug!("listening started");
            }
            Err(e) if manual => {
                error!("microphone unavailable, check permissions: {e}");
            }
            Err(e) => {
                warn!("could not resume listening: {e}");
            }
        }
    }

    /// Release the VAD stream and cancel every pending deadline. Safe to
    /// call at any time; nothing fires after it returns.
    fn stop_listening(&mut self) {
        self.vad = None;
        self.listening.reset();
        self.voice_activity = false;
    }

    fn discard_recording(&mut self) {
        if let Some(recording) = self.recording.take() {
            debug!(samples = recording.sample_count(), "discarding open recording");
        }
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.phase,
            ConnectionPhase::Connected | ConnectionPhase::Ready
        )
    }

    fn teardown(&mut self) {
        if let Some(stop) = self.playback_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        self.active_listening = false;
        self.stop_listening();
        self.discard_recording();
        self.publish();
        info!("session torn down");
    }

    fn publish(&self) {
        let state = SessionState {
            phase: self.phase,
            speaking: self.playback.is_speaking(),
            active_listening: self.active_listening,
            recording: self.recording.is_some() || self.listening.is_recording(),
            voice_activity: self.voice_activity,
            muted: self.muted,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (
        VoiceSession,
        watch::Receiver<SessionState>,
        mpsc::UnboundedReceiver<ClientEvent>,
        mpsc::Sender<PlaybackResult>,
    ) {
        let (handle, out_rx, _flag) = TransportHandle::for_test(true);
        let (session, state_rx) = VoiceSession::new(SessionConfig::default(), handle);
        let (done_tx, _done_rx) = mpsc::channel(1);
        (session, state_rx, out_rx, done_tx)
    }

    #[tokio::test]
    async fn transport_lifecycle_drives_the_phase() {
        let (mut session, state_rx, _out, done_tx) = session();

        session.on_transport_event(TransportEvent::Connecting, &done_tx);
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Connecting);

        session.on_transport_event(TransportEvent::Opened, &done_tx);
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Connected);

        session.on_transport_event(
            TransportEvent::Server(ServerEvent::SessionStarted),
            &done_tx,
        );
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Ready);

        session.on_transport_event(TransportEvent::Closed, &done_tx);
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn server_error_and_end_surface_as_phases() {
        let (mut session, state_rx, _out, done_tx) = session();
        session.on_transport_event(TransportEvent::Opened, &done_tx);

        session.on_transport_event(
            TransportEvent::Server(ServerEvent::Error {
                message: "backend exploded".to_string(),
            }),
            &done_tx,
        );
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Error);

        session.on_transport_event(TransportEvent::Server(ServerEvent::SessionEnded), &done_tx);
        assert_eq!(state_rx.borrow().phase, ConnectionPhase::Ended);
    }

    #[tokio::test]
    async fn muted_session_drops_reply_audio() {
        let (mut session, state_rx, _out, done_tx) = session();
        session.on_transport_event(TransportEvent::Opened, &done_tx);
        session.on_ui(UiCommand::MutePressed);
        assert!(state_rx.borrow().muted);

        let audio = codec::to_transport_text(&codec::pcm_to_bytes(&[100i16; 2400]));
        session.on_transport_event(
            TransportEvent::Server(ServerEvent::AudioResponse { audio }),
            &done_tx,
        );
        // No playback was started.
        assert!(!state_rx.borrow().speaking);
        assert!(session.playback_stop.is_none());

        session.on_ui(UiCommand::MutePressed);
        assert!(!state_rx.borrow().muted);
    }

    #[tokio::test]
    async fn undecodable_reply_leaves_the_pipeline_idle() {
        let (mut session, state_rx, _out, done_tx) = session();
        session.on_transport_event(TransportEvent::Opened, &done_tx);

        session.on_transport_event(
            TransportEvent::Server(ServerEvent::AudioResponse {
                audio: "!!! not base64 !!!".to_string(),
            }),
            &done_tx,
        );
        assert!(!state_rx.borrow().speaking);
    }

    #[tokio::test]
    async fn mic_press_while_disconnected_does_nothing() {
        let (mut session, state_rx, mut out, _done_tx) = session();

        session.on_ui(UiCommand::MicPressed);
        assert!(!state_rx.borrow().active_listening);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn interrupt_is_sent_when_barging_in() {
        let (mut session, state_rx, mut out, done_tx) = session();
        session.on_transport_event(TransportEvent::Opened, &done_tx);

        // Force the speaking state without touching a real device, with
        // listening enabled so the press lands on the disable path.
        session.active_listening = true;
        assert!(session.playback.on_reply_started());
        let stop = Arc::new(AtomicBool::new(false));
        session.playback_stop = Some(Arc::clone(&stop));

        session.on_ui(UiCommand::MicPressed);

        assert_eq!(out.try_recv().unwrap(), ClientEvent::Interrupt);
        assert!(stop.load(Ordering::Relaxed));
        assert!(!session.playback.is_speaking());
        // Interruption never schedules an auto-resume, and the press also
        // disabled active listening.
        assert!(session.playback.resume_at().is_none());
        assert!(!state_rx.borrow().active_listening);
    }

    #[tokio::test]
    async fn turn_complete_without_listening_enabled_is_inert() {
        let (mut session, state_rx, _out, done_tx) = session();
        session.on_transport_event(TransportEvent::Opened, &done_tx);

        session.on_transport_event(TransportEvent::Server(ServerEvent::TurnComplete), &done_tx);
        assert!(!state_rx.borrow().active_listening);
        assert!(session.vad.is_none());
    }

    #[tokio::test]
    async fn playback_failure_folds_into_completion() {
        let (mut session, state_rx, _out, _done_tx) = session();
        assert!(session.playback.on_reply_started());
        session.active_listening = true;

        let now = Instant::now();
        session.on_playback_done(
            Err(DeviceError::PlaybackUnavailable("no sink".to_string())),
            now,
        );

        assert!(!state_rx.borrow().speaking);
        // Failure behaves like natural completion: resume is scheduled.
        assert_eq!(
            session.playback.resume_at(),
            Some(now + Duration::from_millis(500))
        );
    }
}
