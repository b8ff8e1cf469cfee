//! An in-process radio driver.
//!
//! [`loopback`] returns a connector and a [`LoopbackHandle`]. The handle plays
//! the radio's part: it pushes events into whichever link is currently open
//! and records everything the client sends. Used for dry runs without
//! hardware and by the client's tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use meshchat_shared::{Destination, LocalIdentity, RawNodeRecord, RawPacket};

use crate::error::{RadioError, Result};
use crate::transport::{RadioConnector, RadioEvent, RadioLink, RadioTransport, EVENT_CHANNEL_CAPACITY};

/// A text the client handed to the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub body: String,
    pub destination: Destination,
}

#[derive(Default)]
struct Shared {
    identity: Option<LocalIdentity>,
    nodes: Vec<RawNodeRecord>,
    events: Option<mpsc::Sender<RadioEvent>>,
    sent: Vec<SentText>,
    connected_paths: Vec<PathBuf>,
    closed: usize,
    fail_sends: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create a connector/handle pair for a radio reporting `identity`.
pub fn loopback(identity: Option<LocalIdentity>) -> (LoopbackConnector, LoopbackHandle) {
    let shared = Arc::new(Mutex::new(Shared {
        identity,
        ..Default::default()
    }));
    (
        LoopbackConnector {
            shared: Arc::clone(&shared),
        },
        LoopbackHandle { shared },
    )
}

pub struct LoopbackConnector {
    shared: Arc<Mutex<Shared>>,
}

impl RadioConnector for LoopbackConnector {
    type Transport = LoopbackTransport;

    fn connect(&mut self, path: &Path) -> Result<RadioLink<LoopbackTransport>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        {
            let mut shared = lock(&self.shared);
            shared.events = Some(tx);
            shared.connected_paths.push(path.to_path_buf());
        }
        debug!(path = %path.display(), "Loopback radio opened");

        Ok(RadioLink::new(
            LoopbackTransport {
                shared: Arc::clone(&self.shared),
            },
            rx,
        ))
    }
}

pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

impl RadioTransport for LoopbackTransport {
    fn local_identity(&self) -> Result<LocalIdentity> {
        lock(&self.shared).identity.clone().ok_or(RadioError::NoIdentity)
    }

    fn known_nodes(&self) -> Result<Vec<RawNodeRecord>> {
        Ok(lock(&self.shared).nodes.clone())
    }

    fn send_text(&mut self, body: &str, destination: &Destination) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.fail_sends {
            return Err(RadioError::Send("radio rejected the packet".into()));
        }
        shared.sent.push(SentText {
            body: body.to_string(),
            destination: destination.clone(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.events = None;
        shared.closed += 1;
        Ok(())
    }
}

/// The radio's side of a loopback link.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackHandle {
    /// Deliver an event to the open link. Fails when no link is open or the
    /// client dropped its receiver.
    pub async fn emit(&self, event: RadioEvent) -> Result<()> {
        let tx = lock(&self.shared)
            .events
            .clone()
            .ok_or(RadioError::Disconnected)?;
        tx.send(event).await.map_err(|_| RadioError::Disconnected)
    }

    pub async fn establish(&self) -> Result<()> {
        self.emit(RadioEvent::ConnectionEstablished).await
    }

    pub async fn packet(&self, packet: impl Into<RawPacket>) -> Result<()> {
        self.emit(RadioEvent::PacketReceived(packet.into())).await
    }

    pub async fn node_updated(&self, record: impl Into<RawNodeRecord>) -> Result<()> {
        self.emit(RadioEvent::NodeUpdated(record.into())).await
    }

    /// Report the link as lost and drop the event sender.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.emit(RadioEvent::ConnectionLost).await;
        lock(&self.shared).events = None;
        result
    }

    pub fn set_identity(&self, identity: Option<LocalIdentity>) {
        lock(&self.shared).identity = identity;
    }

    pub fn set_nodes(&self, nodes: Vec<RawNodeRecord>) {
        lock(&self.shared).nodes = nodes;
    }

    pub fn fail_sends(&self, fail: bool) {
        lock(&self.shared).fail_sends = fail;
    }

    pub fn sent(&self) -> Vec<SentText> {
        lock(&self.shared).sent.clone()
    }

    /// Paths the client opened, in order.
    pub fn connections(&self) -> Vec<PathBuf> {
        lock(&self.shared).connected_paths.clone()
    }

    /// How many times the transport was closed.
    pub fn close_count(&self) -> usize {
        lock(&self.shared).closed
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).events.is_some()
    }
}
