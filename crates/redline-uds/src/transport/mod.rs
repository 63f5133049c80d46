//! Transport abstraction
//!
//! The diagnostic stack talks to the vehicle through `TransportLink`, an
//! opaque bidirectional addressed-frame channel. Concrete adapters for
//! physical hardware implement this trait out-of-tree.

mod error;
mod link;
mod mock;

pub use error::TransportError;
pub use link::{Frame, TransportLink};
pub use mock::{LoggedFrame, MockTransport, TrafficDirection};
