use crate::midi;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No MIDI destination at index {index} ({count} available)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("No MIDI destination named {}", .0)]
    DestinationNotFound(Arc<str>),

    #[error("Callback failed while handling {origin}: {reason}")]
    CallbackFault { origin: Arc<str>, reason: Arc<str> },

    #[error("MIDI error: {}", .0)]
    Midi(#[from] midi::Error),
}
