use crate::bytes;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI initialization failed")]
    Init(#[from] midir::InitError),

    #[error("MIDI transport unavailable: {}", .0)]
    TransportUnavailable(Arc<str>),

    #[error("Error connecting to MIDI port {}", .0)]
    Connection(Arc<str>),

    #[error("MIDI port {} not connected", .0)]
    NotConnected(Arc<str>),

    #[error("Couldn't retrieve a MIDI port name")]
    PortInfoError(#[from] midir::PortInfoError),

    #[error("Invalid status for MIDI msg: {}", .0)]
    InvalidStatus(bytes::Displayable<'static>),

    #[error("Unsupported MIDI msg kind: {:#04x}", .0)]
    UnsupportedKind(u8),

    #[error("Invalid two bytes value: {}", .0)]
    InvalidTwoBytesValue(bytes::Displayable<'static>),

    #[error("Invalid u14: {}", .0)]
    InvalidU14(u16),

    #[error("Couldn't send MIDI message: {}", .0)]
    Send(#[from] midir::SendError),
}
