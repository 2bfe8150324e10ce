use once_cell::sync::Lazy;
use std::{fmt, sync::Arc, time::Instant};

use super::{kind, u14, Channel, Error, RawEvent, Tag};
use crate::bytes;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Microseconds elapsed on a monotonic clock since first use in the process.
pub fn now() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

/// A single MIDI event.
///
/// No range validation occurs at construction: `channel` is
/// conventionally 0..=15 and data bytes 0..=127, but callers
/// building messages by hand get exactly what they passed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Message {
    pub kind: u8,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    pub data3: Option<u8>,
    pub timestamp: u64,
}

impl Default for Message {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl Message {
    /// Builds a message timestamped with [`now`].
    pub fn new(kind: u8, channel: u8, data1: u8, data2: u8) -> Self {
        Self {
            kind,
            channel,
            data1,
            data2,
            data3: None,
            timestamp: now(),
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(kind::NOTE_ON, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(kind::NOTE_OFF, channel, note, velocity)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(kind::CONTROL_CHANGE, channel, controller, value)
    }

    /// Builds a pitch bend message from a 14 bits value, `0x2000` being center.
    pub fn pitch_bend_change(channel: u8, value: u16) -> Result<Self, Error> {
        let [lsb, msb] = u14::to_le(value)?;
        Ok(Self::new(kind::PITCH_BEND, channel, lsb, msb))
    }

    pub fn with_data3(mut self, data3: u8) -> Self {
        self.data3 = Some(data3);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn from_raw(raw: &dyn RawEvent) -> Self {
        Self {
            kind: raw.kind(),
            channel: raw.channel(),
            data1: raw.data1(),
            data2: raw.data2(),
            data3: raw.data3(),
            timestamp: raw.timestamp(),
        }
    }

    /// Parses a wire buffer.
    ///
    /// Missing data bytes read as 0, a 4th byte lands in `data3`.
    /// Running status is not supported.
    pub fn try_from_bytes(timestamp: u64, buf: &[u8]) -> Result<Self, Error> {
        match buf.first() {
            Some(status) if *status >= kind::NOTE_OFF => (),
            _ => return Err(Error::InvalidStatus(bytes::Displayable::from(buf).to_owned())),
        }

        let status = buf[0];
        let kind = u8::from(Tag::from(status));
        let channel = if kind::is_channel(kind) {
            u8::from(Channel::from(status))
        } else {
            0
        };

        Ok(Self {
            kind,
            channel,
            data1: buf.get(1).copied().unwrap_or(0),
            data2: buf.get(2).copied().unwrap_or(0),
            data3: buf.get(3).copied(),
            timestamp,
        })
    }

    pub fn status(&self) -> u8 {
        if kind::is_channel(self.kind) {
            Tag::from(self.kind) | Channel::from(self.channel)
        } else {
            self.kind
        }
    }

    /// Number of bytes the message occupies on the wire.
    pub fn wire_len(&self) -> Result<usize, Error> {
        use kind::*;

        let len = match self.kind {
            NOTE_OFF | NOTE_ON | POLY_PRESSURE | CONTROL_CHANGE | PITCH_BEND | SONG_POSITION => 3,
            PROGRAM_CHANGE | CHANNEL_PRESSURE | MTC_QUARTER_FRAME | SONG_SELECT => 2,
            TUNE_REQUEST | CLOCK | START | CONTINUE | STOP | ACTIVE_SENSING | RESET => 1,
            other => return Err(Error::UnsupportedKind(other)),
        };

        Ok(len)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let len = self.wire_len()?;

        let mut buf = Vec::with_capacity(len);
        buf.push(self.status());
        buf.extend([self.data1, self.data2].into_iter().take(len - 1));

        Ok(buf)
    }

    /// The 14 bits value of a pitch bend message.
    pub fn pitch_bend(&self) -> Option<u16> {
        match self.kind {
            kind::PITCH_BEND => u14::from_le(self.data1, self.data2).ok(),
            _ => None,
        }
    }
}

impl RawEvent for Message {
    fn kind(&self) -> u8 {
        self.kind
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn data1(&self) -> u8 {
        self.data1
    }

    fn data2(&self) -> u8 {
        self.data2
    }

    fn data3(&self) -> Option<u8> {
        self.data3
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", kind::name(self.kind))?;
        if kind::is_channel(self.kind) {
            write!(f, " ch {}", self.channel)?;
        }
        write!(f, " [{}, {}", self.data1, self.data2)?;
        if let Some(data3) = self.data3 {
            write!(f, ", {data3}")?;
        }

        write!(f, "] @{}µs", self.timestamp)
    }
}

/// A [`Message`] annotated with the name of the endpoint it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedMessage {
    pub midi: Message,
    pub origin: Arc<str>,
}

impl TaggedMessage {
    pub fn new(midi: Message, origin: Arc<str>) -> Self {
        Self { midi, origin }
    }
}

impl fmt::Display for TaggedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.midi, self.origin)
    }
}
