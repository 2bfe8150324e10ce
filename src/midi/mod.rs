mod error;
pub use error::Error;

mod io;

pub mod memory;
pub use memory::MemoryTransport;

mod monitor;
pub use monitor::DeviceMonitor;

pub mod msg;
pub use msg::{Message, TaggedMessage};

pub mod port;
pub use port::MidirTransport;

pub mod transport;
pub use transport::{
    DelegateSlot, Destination, Direction, Endpoint, RawEvent, RawMidi, Transport,
    TransportDelegate,
};

/// Status byte values, as stored in [`Message::kind`].
pub mod kind {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xa0;
    pub const CONTROL_CHANGE: u8 = 0xb0;
    pub const PROGRAM_CHANGE: u8 = 0xc0;
    pub const CHANNEL_PRESSURE: u8 = 0xd0;
    pub const PITCH_BEND: u8 = 0xe0;

    pub const SYSEX: u8 = 0xf0;
    pub const MTC_QUARTER_FRAME: u8 = 0xf1;
    pub const SONG_POSITION: u8 = 0xf2;
    pub const SONG_SELECT: u8 = 0xf3;
    pub const TUNE_REQUEST: u8 = 0xf6;
    pub const SYSEX_END: u8 = 0xf7;
    pub const CLOCK: u8 = 0xf8;
    pub const START: u8 = 0xfa;
    pub const CONTINUE: u8 = 0xfb;
    pub const STOP: u8 = 0xfc;
    pub const ACTIVE_SENSING: u8 = 0xfe;
    pub const RESET: u8 = 0xff;

    /// Whether the kind is a channel voice kind, i.e. the status
    /// byte carries a channel in its low nibble.
    pub const fn is_channel(kind: u8) -> bool {
        kind >= NOTE_OFF && kind < SYSEX
    }

    pub fn name(kind: u8) -> &'static str {
        match kind {
            NOTE_OFF => "Note Off",
            NOTE_ON => "Note On",
            POLY_PRESSURE => "Poly Pressure",
            CONTROL_CHANGE => "Control Change",
            PROGRAM_CHANGE => "Program Change",
            CHANNEL_PRESSURE => "Channel Pressure",
            PITCH_BEND => "Pitch Bend",
            SYSEX => "SysEx",
            MTC_QUARTER_FRAME => "MTC Quarter Frame",
            SONG_POSITION => "Song Position",
            SONG_SELECT => "Song Select",
            TUNE_REQUEST => "Tune Request",
            CLOCK => "Clock",
            START => "Start",
            CONTINUE => "Continue",
            STOP => "Stop",
            ACTIVE_SENSING => "Active Sensing",
            RESET => "Reset",
            _ => "Unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tag(u8);

impl Tag {
    /// Extracts the kind from a status byte.
    ///
    /// Channel voice status bytes lose their channel nibble,
    /// system status bytes are kept whole.
    pub const fn from(byte: u8) -> Self {
        if kind::is_channel(byte & 0xf0) {
            Self(byte & 0xf0)
        } else {
            Self(byte)
        }
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        tag.0
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Channel(u8);

impl Channel {
    pub const fn from(byte: u8) -> Self {
        Self(byte & 0x0f)
    }
}

impl From<Channel> for u8 {
    fn from(chan: Channel) -> u8 {
        chan.0
    }
}

impl std::ops::BitOr<Channel> for Tag {
    type Output = u8;

    fn bitor(self, chan: Channel) -> Self::Output {
        self.0 | chan.0
    }
}

pub mod u14 {
    use super::Error;
    use crate::bytes;

    pub const MAX: u16 = 0x3fff;

    /// Decodes a 14 bits value sent LSB first.
    #[inline]
    pub fn from_le(lsb: u8, msb: u8) -> Result<u16, Error> {
        if lsb > 0x7f || msb > 0x7f {
            return Err(Error::InvalidTwoBytesValue(bytes::Displayable::from(vec![
                lsb, msb,
            ])));
        }

        Ok(lsb as u16 + ((msb as u16) << 7))
    }

    #[inline]
    pub fn to_le(val: u16) -> Result<[u8; 2], Error> {
        if val > MAX {
            return Err(Error::InvalidU14(val));
        }

        Ok([val as u8 & 0x7f, (val >> 7) as u8])
    }
}
