pub mod broker;
pub use broker::Broker;

pub mod bytes;

pub mod midi;
pub use midi::{Message, TaggedMessage};

use once_cell::sync::Lazy;
use std::sync::Arc;

pub const CLIENT_NAME: &str = "MidiPlex";

static SHARED: Lazy<Arc<Broker>> =
    Lazy::new(|| Broker::new(Arc::new(midi::MidirTransport::new(CLIENT_NAME))));

/// The process-wide [`Broker`] over the OS MIDI subsystem.
///
/// Created on first access, which also enables all the sources visible
/// at that time. Prefer creating a [`Broker`] explicitly and passing it
/// around where possible.
pub fn shared() -> Arc<Broker> {
    SHARED.clone()
}
