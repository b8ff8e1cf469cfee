//! Radio transport boundary: driver traits, event stream, device discovery.

pub mod discovery;
pub mod error;
pub mod loopback;
pub mod transport;

pub use discovery::{discover_ports, wait_for_radio};
pub use error::{RadioError, Result};
pub use loopback::{loopback, LoopbackConnector, LoopbackHandle, LoopbackTransport, SentText};
pub use transport::{RadioConnector, RadioEvent, RadioLink, RadioTransport, EVENT_CHANNEL_CAPACITY};
