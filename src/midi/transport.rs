//! Abstraction over the subsystem which owns the MIDI endpoints.
//!
//! A [`Transport`] enumerates the endpoints currently visible, and reports
//! incoming events and topology changes to the [`TransportDelegate`] it is
//! bound to. Endpoint handles are owned by the transport: users are
//! expected to fetch them when they need them instead of keeping them
//! around across hot-plug events.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use super::{kind, Channel, Error, Tag};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Source,
    Destination,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &str {
        match self {
            Direction::Source => "Source",
            Direction::Destination => "Destination",
        }
    }
}

/// A named MIDI source or destination.
pub trait Endpoint: Send + Sync {
    /// The name of the endpoint. Not guaranteed to be unique.
    fn name(&self) -> Arc<str>;
    fn direction(&self) -> Direction;
    fn is_enabled(&self) -> bool;

    /// Enables or disables the endpoint.
    ///
    /// Setting the current state again is a no-op.
    fn set_enabled(&self, enabled: bool) -> Result<(), Error>;
}

pub trait Destination: Endpoint {
    fn send(&self, msg: &super::Message) -> Result<(), Error>;
}

/// Accessors for an event as delivered by a transport.
pub trait RawEvent {
    fn kind(&self) -> u8;
    fn channel(&self) -> u8;
    fn data1(&self) -> u8;
    fn data2(&self) -> u8;
    fn data3(&self) -> Option<u8>;
    fn timestamp(&self) -> u64;
}

/// A wire buffer as received from `midir`.
#[derive(Clone, Copy, Debug)]
pub struct RawMidi<'a> {
    timestamp: u64,
    buf: &'a [u8],
}

impl<'a> RawMidi<'a> {
    pub fn new(timestamp: u64, buf: &'a [u8]) -> Self {
        Self { timestamp, buf }
    }

    pub fn bytes(&self) -> &[u8] {
        self.buf
    }

    fn status(&self) -> u8 {
        self.buf.first().copied().unwrap_or(0)
    }
}

impl<'a> RawEvent for RawMidi<'a> {
    fn kind(&self) -> u8 {
        Tag::from(self.status()).into()
    }

    fn channel(&self) -> u8 {
        if kind::is_channel(self.kind()) {
            Channel::from(self.status()).into()
        } else {
            0
        }
    }

    fn data1(&self) -> u8 {
        self.buf.get(1).copied().unwrap_or(0)
    }

    fn data2(&self) -> u8 {
        self.buf.get(2).copied().unwrap_or(0)
    }

    fn data3(&self) -> Option<u8> {
        self.buf.get(3).copied()
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Hooks a [`Transport`] invokes on the party it is bound to.
pub trait TransportDelegate: Send + Sync {
    /// Called with a batch of events received from `origin`.
    fn received_midi(&self, events: &[&dyn RawEvent], origin: &dyn Endpoint);

    /// Called when endpoints appeared or disappeared.
    fn setup_changed(&self, reason: &str);
}

pub trait Transport: Send + Sync {
    /// The source endpoints currently visible, in enumeration order.
    fn sources(&self) -> Result<Vec<Arc<dyn Endpoint>>, Error>;

    /// The destination endpoints currently visible, in enumeration order.
    fn destinations(&self) -> Result<Vec<Arc<dyn Destination>>, Error>;

    /// Binds the delegate, replacing any previously bound one.
    fn bind(&self, delegate: Weak<dyn TransportDelegate>);

    /// Unbinds `delegate`, leaving any other bound delegate in place.
    fn unbind(&self, delegate: &Weak<dyn TransportDelegate>);

    fn is_bound_to(&self, delegate: &Weak<dyn TransportDelegate>) -> bool;
}

/// Weak reference to the bound delegate, shared by a transport and its endpoints.
#[derive(Default)]
pub struct DelegateSlot(RwLock<Option<Weak<dyn TransportDelegate>>>);

impl DelegateSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, delegate: Weak<dyn TransportDelegate>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(delegate);
    }

    /// Clears the slot if `delegate` is the one bound.
    ///
    /// Returns whether the slot was cleared.
    pub fn unbind(&self, delegate: &Weak<dyn TransportDelegate>) -> bool {
        let mut slot = self.0.write().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(bound) if Weak::ptr_eq(bound, delegate) => {
                slot.take();
                true
            }
            _ => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.get().is_some()
    }

    pub fn is_bound_to(&self, delegate: &Weak<dyn TransportDelegate>) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |bound| Weak::ptr_eq(bound, delegate))
    }

    fn get(&self) -> Option<Arc<dyn TransportDelegate>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn received_midi(&self, events: &[&dyn RawEvent], origin: &dyn Endpoint) {
        if let Some(delegate) = self.get() {
            delegate.received_midi(events, origin);
        }
    }

    pub fn setup_changed(&self, reason: &str) {
        if let Some(delegate) = self.get() {
            delegate.setup_changed(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_midi_accessors() {
        let buf = [0x9f, 60, 100];
        let raw = RawMidi::new(12, &buf);
        assert_eq!(raw.kind(), kind::NOTE_ON);
        assert_eq!(raw.channel(), 15);
        assert_eq!((raw.data1(), raw.data2(), raw.data3()), (60, 100, None));
        assert_eq!(raw.timestamp(), 12);
    }

    #[test]
    fn raw_midi_system_message_has_no_channel() {
        let buf = [0xfa];
        let raw = RawMidi::new(0, &buf);
        assert_eq!(raw.kind(), kind::START);
        assert_eq!(raw.channel(), 0);
        assert_eq!(raw.data1(), 0);
    }

    struct Counter(std::sync::atomic::AtomicUsize);

    impl TransportDelegate for Counter {
        fn received_midi(&self, _events: &[&dyn RawEvent], _origin: &dyn Endpoint) {}

        fn setup_changed(&self, _reason: &str) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn slot_delivers_only_while_bound_and_alive() {
        let slot = DelegateSlot::new();
        slot.setup_changed("ignored");

        let counter = Arc::new(Counter(Default::default()));
        let delegate: Arc<dyn TransportDelegate> = counter.clone();
        slot.bind(Arc::downgrade(&delegate));
        assert!(slot.is_bound());
        slot.setup_changed("counted");

        assert!(slot.unbind(&Arc::downgrade(&delegate)));
        slot.setup_changed("ignored");
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);

        slot.bind(Arc::downgrade(&delegate));
        drop(delegate);
        drop(counter);
        assert!(!slot.is_bound());
    }

    #[test]
    fn slot_only_unbinds_the_bound_delegate() {
        let slot = DelegateSlot::new();
        let stale: Arc<dyn TransportDelegate> = Arc::new(Counter(Default::default()));
        let live: Arc<dyn TransportDelegate> = Arc::new(Counter(Default::default()));

        slot.bind(Arc::downgrade(&stale));
        slot.bind(Arc::downgrade(&live));

        assert!(!slot.unbind(&Arc::downgrade(&stale)));
        assert!(slot.is_bound_to(&Arc::downgrade(&live)));
        assert!(!slot.is_bound_to(&Arc::downgrade(&stale)));

        assert!(slot.unbind(&Arc::downgrade(&live)));
        assert!(!slot.is_bound());
    }
}
