//! WebSocket transport to the conversation backend.
//!
//! One background task owns the connection for its whole life: connect,
//! announce the session, pump frames both ways, and on any close or error
//! schedule exactly one reconnect attempt after a fixed delay, forever,
//! until the session shuts down. Outgoing events are accepted through a
//! cloneable [`TransportHandle`] whose `send` is a silent no-op while the
//! connection is down; nothing queues across reconnects.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::events::TransportEvent;
use crate::protocol::{ClientEvent, ServerEvent};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sending side of the transport, safe to clone into controllers.
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Queue an event for the current connection. Dropped silently while
    /// disconnected; callers gate audio on [`Self::is_connected`].
    pub fn send(&self, event: ClientEvent) {
        if !self.is_connected() {
            debug!("dropping outgoing event while disconnected");
            return;
        }
        let _ = self.tx.send(event);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        connected: bool,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::new(AtomicBool::new(connected));
        (
            Self {
                tx,
                connected: Arc::clone(&flag),
            },
            rx,
            flag,
        )
    }
}

/// Fixed-delay reconnect schedule. At most one attempt is armed at a time;
/// duplicate arms while a timer is pending are rejected.
struct Reconnector {
    delay: Duration,
    armed: bool,
}

impl Reconnector {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: false,
        }
    }

    /// Arm the next attempt. `None` when one is already pending.
    fn arm(&mut self) -> Option<Duration> {
        if self.armed {
            return None;
        }
        self.armed = true;
        Some(self.delay)
    }

    /// The armed timer fired; a new one may be armed.
    fn fired(&mut self) {
        self.armed = false;
    }

    /// A connection succeeded; clear any pending state.
    fn reset(&mut self) {
        self.armed = false;
    }
}

/// Why the frame pump stopped.
enum PumpEnd {
    /// The session dropped its handle: tear the transport down.
    Shutdown,
    /// The peer closed or the stream ended: reconnect.
    Remote,
}

pub struct SessionTransport {
    url: String,
    reconnect_delay: Duration,
}

impl SessionTransport {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
        }
    }

    /// Spawn the connection task. Returns the sending handle and the
    /// stream of transport events for the session loop.
    pub fn start(self) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let handle = TransportHandle {
            tx: cmd_tx,
            connected: Arc::clone(&connected),
        };
        tokio::spawn(run(
            self.url,
            self.reconnect_delay,
            cmd_rx,
            evt_tx,
            connected,
        ));
        (handle, evt_rx)
    }
}

async fn run(
    url: String,
    reconnect_delay: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientEvent>,
    evt_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut reconnect = Reconnector::new(reconnect_delay);

    loop {
        if evt_tx.send(TransportEvent::Connecting).is_err() {
            break; // session gone
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                reconnect.reset();
                connected.store(true, Ordering::Relaxed);
                info!(%url, "connected");

                let end = pump(ws, &mut cmd_rx, &evt_tx).await;
                connected.store(false, Ordering::Relaxed);

                if evt_tx.send(TransportEvent::Closed).is_err() {
                    break;
                }
                match end {
                    Ok(PumpEnd::Shutdown) => break,
                    Ok(PumpEnd::Remote) => info!("connection closed by peer"),
                    Err(e) => warn!("connection lost: {e}"),
                }
            }
            Err(e) => {
                warn!(%url, "connect failed: {e}");
                if evt_tx.send(TransportEvent::Closed).is_err() {
                    break;
                }
            }
        }

        // Anything sent in the window around the disconnect is stale; it
        // must not carry over into the next connection.
        loop {
            match cmd_rx.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }

        if let Some(delay) = reconnect.arm() {
            tokio::time::sleep(delay).await;
            reconnect.fired();
        }
    }
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    evt_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<PumpEnd, TransportError> {
    let (mut sink, mut stream) = ws.split();

    // Announce the logical session before anything else goes out.
    sink.send(Message::text(serde_json::to_string(
        &ClientEvent::StartSession,
    )?))
    .await?;
    let _ = evt_tx.send(TransportEvent::Opened);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(event) => {
                    sink.send(Message::text(serde_json::to_string(&event)?)).await?;
                }
                None => return Ok(PumpEnd::Shutdown),
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), evt_tx),
                Some(Ok(Message::Close(_))) => return Ok(PumpEnd::Remote),
                Some(Ok(_)) => {} // ping/pong handled by tungstenite
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(PumpEnd::Remote),
            },
        }
    }
}

fn dispatch(text: &str, evt_tx: &mpsc::UnboundedSender<TransportEvent>) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => {
            let _ = evt_tx.send(TransportEvent::Server(event));
        }
        Err(e) => warn!("unparseable frame: {e}"),
    }
}
