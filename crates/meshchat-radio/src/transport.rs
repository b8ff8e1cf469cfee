//! The boundary between the client core and a radio driver.
//!
//! A driver implements [`RadioConnector`] to open the device and hands back a
//! [`RadioLink`]: a [`RadioTransport`] for outbound calls plus a channel of
//! [`RadioEvent`]s for everything the radio reports asynchronously.

use std::path::Path;

use tokio::sync::mpsc;

use meshchat_shared::{Destination, LocalIdentity, RawNodeRecord, RawPacket};

use crate::error::Result;

/// Capacity of the event channel a driver should create.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications sent *from* the radio driver to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// A decoded packet arrived.
    PacketReceived(RawPacket),
    /// The radio finished its handshake and can be queried.
    ConnectionEstablished,
    /// The link dropped.
    ConnectionLost,
    /// The radio's node database changed for one node.
    NodeUpdated(RawNodeRecord),
}

/// Outbound side of an open radio.
pub trait RadioTransport: Send {
    /// Identity of the attached radio.
    fn local_identity(&self) -> Result<LocalIdentity>;

    /// Every node the radio currently knows about.
    fn known_nodes(&self) -> Result<Vec<RawNodeRecord>>;

    /// Queue a text message.
    fn send_text(&mut self, body: &str, destination: &Destination) -> Result<()>;

    /// Release the device. Further calls may fail.
    fn close(&mut self) -> Result<()>;
}

/// An open radio: the transport plus its event stream.
pub struct RadioLink<T> {
    pub transport: T,
    pub events: mpsc::Receiver<RadioEvent>,
}

impl<T: RadioTransport> RadioLink<T> {
    pub fn new(transport: T, events: mpsc::Receiver<RadioEvent>) -> Self {
        Self { transport, events }
    }
}

/// Opens a radio at a device path.
pub trait RadioConnector: Send + Sync {
    type Transport: RadioTransport;

    fn connect(&mut self, path: &Path) -> Result<RadioLink<Self::Transport>>;
}
