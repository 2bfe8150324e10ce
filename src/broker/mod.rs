//! Fan-out of incoming MIDI events and routing of outgoing messages.
//!
//! The [`Broker`] binds itself as the delegate of a [`Transport`]. Each
//! event the transport reports is turned into a [`TaggedMessage`] and handed
//! to every registered receive callback, in registration order, on the
//! thread which delivered it. Outgoing messages are routed to a destination
//! picked either by position or by name among the destinations currently
//! visible.

mod error;
pub use error::Error;

mod registry;
use registry::Registry;
pub use registry::SubscriptionId;

use crossbeam_channel as channel;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use crate::midi::{
    Destination, Endpoint, Message, RawEvent, TaggedMessage, Transport, TransportDelegate,
};

pub type ReceiveCallback = dyn Fn(&TaggedMessage) + Send + Sync;
pub type SetupChangeCallback = dyn Fn(&str) + Send + Sync;

const FAULT_CHANNEL_CAPACITY: usize = 64;

pub struct Broker {
    transport: Arc<dyn Transport>,
    receive_callbacks: Registry<ReceiveCallback>,
    setup_change_callbacks: Registry<SetupChangeCallback>,
    next_id: AtomicU64,
    delegate: Weak<dyn TransportDelegate>,
    fault_tx: channel::Sender<Error>,
    fault_rx: channel::Receiver<Error>,
}

impl Broker {
    /// Creates a broker bound to `transport` and enables all its sources.
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (fault_tx, fault_rx) = channel::bounded(FAULT_CHANNEL_CAPACITY);

        let this = Arc::new_cyclic(|me: &Weak<Self>| {
            let delegate: Weak<dyn TransportDelegate> = me.clone();
            Self {
                transport,
                receive_callbacks: Registry::default(),
                setup_change_callbacks: Registry::default(),
                next_id: AtomicU64::new(0),
                delegate,
                fault_tx,
                fault_rx,
            }
        });

        this.transport.bind(this.delegate.clone());
        this.enable_all_sources();

        log::info!("MIDI broker successfully created");

        this
    }

    /// Unbinds from the transport.
    ///
    /// Events reported by the transport afterwards are not delivered.
    /// A delegate bound to the transport since then is left in place.
    pub fn shutdown(&self) {
        if self.is_bound() {
            self.transport.unbind(&self.delegate);
            log::info!("MIDI broker shut down");
        }
    }

    /// Whether the transport still reports to this broker.
    pub fn is_bound(&self) -> bool {
        self.transport.is_bound_to(&self.delegate)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_receive_callback(
        &self,
        callback: impl Fn(&TaggedMessage) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.receive_callbacks.insert(id, Arc::new(callback));

        id
    }

    pub fn add_setup_change_callback(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.setup_change_callbacks.insert(id, Arc::new(callback));

        id
    }

    /// Removes a callback of either kind.
    ///
    /// Returns `false` if no callback is registered under `id`.
    pub fn remove_callback(&self, id: SubscriptionId) -> bool {
        self.receive_callbacks.remove(id) || self.setup_change_callbacks.remove(id)
    }

    /// Subscribes a channel to the received messages.
    ///
    /// Messages are dropped while the channel is full.
    pub fn subscribe(&self, capacity: usize) -> (SubscriptionId, channel::Receiver<TaggedMessage>) {
        let (msg_tx, msg_rx) = channel::bounded(capacity);

        let id = self.add_receive_callback(move |msg| {
            if let Err(channel::TrySendError::Full(msg)) = msg_tx.try_send(msg.clone()) {
                log::warn!("Subscriber channel full, dropping {msg}");
            }
        });

        (id, msg_rx)
    }

    /// Receives [`Error::CallbackFault`]s raised while dispatching.
    pub fn faults(&self) -> channel::Receiver<Error> {
        self.fault_rx.clone()
    }

    pub fn receive_callback_count(&self) -> usize {
        self.receive_callbacks.len()
    }

    pub fn setup_change_callback_count(&self) -> usize {
        self.setup_change_callbacks.len()
    }
}

/// Endpoint views.
///
/// Each call queries the transport again, so the result reflects
/// the endpoints visible at that time.
impl Broker {
    pub fn source_endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.transport.sources().unwrap_or_else(|err| {
            log::warn!("Couldn't access MIDI sources: {err}");
            Vec::new()
        })
    }

    pub fn destination_endpoints(&self) -> Vec<Arc<dyn Destination>> {
        self.transport.destinations().unwrap_or_else(|err| {
            log::warn!("Couldn't access MIDI destinations: {err}");
            Vec::new()
        })
    }

    pub fn source_names(&self) -> Vec<Arc<str>> {
        self.source_endpoints()
            .iter()
            .map(|source| source.name())
            .collect()
    }

    pub fn destination_names(&self) -> Vec<Arc<str>> {
        self.destination_endpoints()
            .iter()
            .map(|dest| dest.name())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.source_endpoints().len()
    }

    pub fn destination_count(&self) -> usize {
        self.destination_endpoints().len()
    }

    pub fn enable_all_sources(&self) {
        for source in self.source_endpoints() {
            if let Err(err) = source.set_enabled(true) {
                log::error!("Couldn't enable MIDI source {}: {err}", source.name());
            }
        }
    }

    pub fn enable_all_destinations(&self) {
        for dest in self.destination_endpoints() {
            if let Err(err) = dest.set_enabled(true) {
                log::error!("Couldn't enable MIDI destination {}: {err}", dest.name());
            }
        }
    }
}

/// Outbound routing.
impl Broker {
    pub fn send_to_index(&self, msg: &Message, index: usize) -> Result<(), Error> {
        let destinations = self.destination_endpoints();
        let count = destinations.len();
        let dest = destinations
            .get(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;

        log::trace!("Sending {msg} to {}", dest.name());
        dest.send(msg)?;

        Ok(())
    }

    /// Sends `msg` to the first destination named exactly `name`.
    pub fn send_to_name(&self, msg: &Message, name: &str) -> Result<(), Error> {
        let dest = self
            .destination_endpoints()
            .into_iter()
            .find(|dest| dest.name().as_ref() == name)
            .ok_or_else(|| Error::DestinationNotFound(name.into()))?;

        log::trace!("Sending {msg} to {name}");
        dest.send(msg)?;

        Ok(())
    }
}

/// Inbound dispatch.
impl Broker {
    /// Delivers the first event of `events` to every receive callback.
    ///
    /// Only one event per batch is delivered. Transports hand over
    /// batches of a single event.
    pub fn on_raw_event_received(&self, events: &[&dyn RawEvent], origin: &dyn Endpoint) {
        let Some(raw) = events.first() else {
            return;
        };

        if events.len() > 1 {
            log::debug!(
                "Dropping {} trailing events in batch from {}",
                events.len() - 1,
                origin.name()
            );
        }

        let msg = TaggedMessage::new(Message::from_raw(*raw), origin.name());
        log::trace!("Dispatching {msg}");

        for callback in self.receive_callbacks.snapshot() {
            self.isolate(&msg.origin, || callback(&msg));
        }
    }

    pub fn on_topology_changed(&self, reason: &str) {
        log::debug!("{reason}");

        for callback in self.setup_change_callbacks.snapshot() {
            self.isolate("setup change", || callback(reason));
        }
    }

    /// Runs `f`, reporting a panic as a [`Error::CallbackFault`].
    fn isolate(&self, origin: &str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let err = Error::CallbackFault {
                origin: origin.into(),
                reason: panic_reason(payload.as_ref()).into(),
            };
            log::error!("{err}");
            let _ = self.fault_tx.try_send(err);
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        *reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.as_str()
    } else {
        "unknown panic"
    }
}

impl TransportDelegate for Broker {
    fn received_midi(&self, events: &[&dyn RawEvent], origin: &dyn Endpoint) {
        self.on_raw_event_received(events, origin);
    }

    fn setup_changed(&self, reason: &str) {
        self.on_topology_changed(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{self, kind, MemoryTransport, RawMidi};
    use std::{
        sync::{atomic::AtomicUsize, Mutex},
        thread,
    };

    fn broker_with(sources: &[&str], destinations: &[&str]) -> (Arc<MemoryTransport>, Arc<Broker>) {
        let transport = MemoryTransport::new();
        for name in sources {
            transport.add_source(name);
        }
        for name in destinations {
            transport.add_destination(name);
        }

        let broker = Broker::new(transport.clone());

        (transport, broker)
    }

    fn source(transport: &MemoryTransport, name: &str) -> Arc<dyn Endpoint> {
        transport
            .sources()
            .unwrap()
            .into_iter()
            .find(|source| source.name().as_ref() == name)
            .unwrap()
    }

    #[test]
    fn note_on_is_delivered_with_origin() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = received.clone();
        broker.add_receive_callback(move |msg| {
            recorder.lock().unwrap().push((
                msg.midi.channel,
                msg.midi.data1,
                msg.midi.data2,
                msg.origin.clone(),
            ));
        });

        let buf = [0x90, 60, 100];
        let raw = RawMidi::new(0, &buf);
        broker.on_raw_event_received(&[&raw], source(&transport, "Keyboard-1").as_ref());

        assert_eq!(
            *received.lock().unwrap(),
            [(0, 60, 100, Arc::<str>::from("Keyboard-1"))]
        );
    }

    #[test]
    fn each_callback_is_invoked_once_in_registration_order() {
        for count in [0, 1, 5] {
            let transport = MemoryTransport::new();
            let keyboard = transport.add_source("Keyboard-1");
            let broker = Broker::new(transport.clone());

            let calls = Arc::new(Mutex::new(Vec::new()));
            for idx in 0..count {
                let calls = calls.clone();
                broker.add_receive_callback(move |_| calls.lock().unwrap().push(idx));
            }

            assert!(keyboard.emit_msg(Message::note_on(0, 60, 100)));

            assert_eq!(*calls.lock().unwrap(), (0..count).collect::<Vec<_>>());
        }
    }

    #[test]
    fn panicking_callback_does_not_prevent_later_ones() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = calls.clone();
        broker.add_receive_callback(move |_| first.lock().unwrap().push("first"));
        broker.add_receive_callback(|_| panic!("boom"));
        let last = calls.clone();
        broker.add_receive_callback(move |_| last.lock().unwrap().push("last"));

        let msg = Message::note_on(0, 60, 100);
        broker.on_raw_event_received(&[&msg], source(&transport, "Keyboard-1").as_ref());

        assert_eq!(*calls.lock().unwrap(), ["first", "last"]);
        match broker.faults().try_recv() {
            Ok(Error::CallbackFault { origin, reason }) => {
                assert_eq!(origin.as_ref(), "Keyboard-1");
                assert_eq!(reason.as_ref(), "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn only_first_event_of_a_batch_is_delivered() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);
        let (_, msg_rx) = broker.subscribe(8);

        let first = Message::note_on(0, 60, 100);
        let second = Message::note_off(0, 60, 0);
        broker.on_raw_event_received(&[&first, &second], source(&transport, "Keyboard-1").as_ref());
        broker.on_raw_event_received(&[], source(&transport, "Keyboard-1").as_ref());

        assert_eq!(msg_rx.try_recv().unwrap().midi, first);
        assert!(msg_rx.try_recv().is_err());
    }

    #[test]
    fn removed_callback_is_not_invoked() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);
        let calls = Arc::new(Mutex::new(0));

        let counter = calls.clone();
        let id = broker.add_receive_callback(move |_| *counter.lock().unwrap() += 1);
        assert_eq!(broker.receive_callback_count(), 1);
        assert!(broker.remove_callback(id));
        assert!(!broker.remove_callback(id));

        let msg = Message::note_on(0, 60, 100);
        broker.on_raw_event_received(&[&msg], source(&transport, "Keyboard-1").as_ref());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn callbacks_can_register_during_dispatch() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);

        let weak = Arc::downgrade(&broker);
        broker.add_receive_callback(move |_| {
            if let Some(broker) = weak.upgrade() {
                broker.add_receive_callback(|_| ());
            }
        });

        let msg = Message::note_on(0, 60, 100);
        broker.on_raw_event_received(&[&msg], source(&transport, "Keyboard-1").as_ref());
        assert_eq!(broker.receive_callback_count(), 2);
    }

    #[test]
    fn full_subscriber_channel_drops_messages() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &[]);
        let (_, msg_rx) = broker.subscribe(1);

        let keyboard = source(&transport, "Keyboard-1");
        for note in [60, 62] {
            let msg = Message::note_on(0, note, 100);
            broker.on_raw_event_received(&[&msg], keyboard.as_ref());
        }

        assert_eq!(msg_rx.try_recv().unwrap().midi.data1, 60);
        assert!(msg_rx.try_recv().is_err());
    }

    #[test]
    fn send_to_index_checks_bounds() {
        let (transport, broker) = broker_with(&[], &["Synth-A", "Synth-B"]);
        let msg = Message::note_on(0, 60, 100);

        broker.send_to_index(&msg, 1).unwrap();
        assert!(matches!(
            broker.send_to_index(&msg, 2),
            Err(Error::IndexOutOfRange { index: 2, count: 2 })
        ));

        let synth_b = transport.remove_destination("Synth-B").unwrap();
        assert_eq!(synth_b.sent(), [msg]);
        let synth_a = transport.remove_destination("Synth-A").unwrap();
        assert!(synth_a.sent().is_empty());
    }

    #[test]
    fn send_to_index_without_destinations() {
        let (_transport, broker) = broker_with(&[], &[]);

        assert!(matches!(
            broker.send_to_index(&Message::note_on(0, 60, 100), 0),
            Err(Error::IndexOutOfRange { index: 0, count: 0 })
        ));
    }

    #[test]
    fn send_to_name_routes_to_matching_destination_only() {
        let transport = MemoryTransport::new();
        let synth_a = transport.add_destination("Synth-A");
        let synth_b = transport.add_destination("Synth-B");
        let broker = Broker::new(transport.clone());

        let msg = Message::control_change(2, 74, 10);
        broker.send_to_name(&msg, "Synth-B").unwrap();

        assert_eq!(synth_b.sent(), [msg]);
        assert!(synth_a.sent().is_empty());
    }

    #[test]
    fn send_to_unknown_name_is_an_error() {
        let (_transport, broker) = broker_with(&[], &["Synth-A"]);

        match broker.send_to_name(&Message::note_on(0, 60, 100), "synth-a") {
            Err(Error::DestinationNotFound(name)) => assert_eq!(name.as_ref(), "synth-a"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn destination_errors_are_forwarded() {
        struct Failing;

        impl Endpoint for Failing {
            fn name(&self) -> Arc<str> {
                "Failing".into()
            }
            fn direction(&self) -> midi::Direction {
                midi::Direction::Destination
            }
            fn is_enabled(&self) -> bool {
                false
            }
            fn set_enabled(&self, _enabled: bool) -> Result<(), midi::Error> {
                Ok(())
            }
        }

        impl Destination for Failing {
            fn send(&self, msg: &Message) -> Result<(), midi::Error> {
                Err(midi::Error::UnsupportedKind(msg.kind))
            }
        }

        struct OneDestination;

        impl Transport for OneDestination {
            fn sources(&self) -> Result<Vec<Arc<dyn Endpoint>>, midi::Error> {
                Ok(Vec::new())
            }
            fn destinations(&self) -> Result<Vec<Arc<dyn Destination>>, midi::Error> {
                let dest: Arc<dyn Destination> = Arc::new(Failing);
                Ok(vec![dest])
            }
            fn bind(&self, _delegate: Weak<dyn TransportDelegate>) {}
            fn unbind(&self, _delegate: &Weak<dyn TransportDelegate>) {}
            fn is_bound_to(&self, _delegate: &Weak<dyn TransportDelegate>) -> bool {
                false
            }
        }

        let broker = Broker::new(Arc::new(OneDestination));
        let msg = Message::new(kind::SYSEX, 0, 0, 0);
        assert!(matches!(
            broker.send_to_index(&msg, 0),
            Err(Error::Midi(midi::Error::UnsupportedKind(0xf0)))
        ));
    }

    #[test]
    fn sources_are_enabled_at_creation_but_not_destinations() {
        let transport = MemoryTransport::new();
        let keyboard = transport.add_source("Keyboard-1");
        let synth = transport.add_destination("Synth-A");

        let broker = Broker::new(transport.clone());
        assert!(keyboard.is_enabled());
        assert!(!synth.is_enabled());

        broker.enable_all_destinations();
        assert!(synth.is_enabled());
    }

    #[test]
    fn enabling_all_sources_is_idempotent() {
        let (transport, broker) = broker_with(&["Keyboard-1", "Pads"], &[]);
        let late = transport.add_source("Late");
        assert!(!late.is_enabled());

        broker.enable_all_sources();
        broker.enable_all_sources();

        assert!(transport
            .sources()
            .unwrap()
            .iter()
            .all(|source| source.is_enabled()));
    }

    #[test]
    fn views_follow_transport_topology() {
        let (transport, broker) = broker_with(&[], &[]);
        assert!(broker.source_names().is_empty());
        assert!(broker.destination_names().is_empty());

        transport.add_source("Keyboard-1");
        transport.add_destination("Synth-A");
        transport.add_destination("Synth-B");
        assert_eq!(broker.source_names(), [Arc::<str>::from("Keyboard-1")]);
        assert_eq!(broker.destination_count(), 2);

        transport.remove_destination("Synth-A");
        assert_eq!(broker.destination_names(), [Arc::<str>::from("Synth-B")]);
    }

    #[test]
    fn unavailable_transport_yields_empty_views() {
        let (transport, broker) = broker_with(&["Keyboard-1"], &["Synth-A"]);
        transport.set_available(false);

        assert!(broker.source_names().is_empty());
        assert_eq!(broker.source_count(), 0);
        assert!(matches!(
            broker.send_to_name(&Message::note_on(0, 60, 100), "Synth-A"),
            Err(Error::DestinationNotFound(_))
        ));
    }

    #[test]
    fn setup_changes_are_forwarded_in_order() {
        let (transport, broker) = broker_with(&[], &[]);
        let reasons = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let reasons = reasons.clone();
            broker.add_setup_change_callback(move |reason| {
                reasons.lock().unwrap().push(format!("{tag}: {reason}"));
            });
        }
        broker.add_setup_change_callback(|_| panic!("setup callback failure"));
        assert_eq!(broker.setup_change_callback_count(), 3);

        transport.add_source("Keyboard-1");

        assert_eq!(
            *reasons.lock().unwrap(),
            [
                "first: MIDI setup changed: source added: Keyboard-1",
                "second: MIDI setup changed: source added: Keyboard-1",
            ]
        );
        assert!(matches!(
            broker.faults().try_recv(),
            Ok(Error::CallbackFault { .. })
        ));
    }

    #[test]
    fn shutdown_unbinds_from_transport() {
        let transport = MemoryTransport::new();
        let keyboard = transport.add_source("Keyboard-1");
        let broker = Broker::new(transport.clone());
        let (_, msg_rx) = broker.subscribe(8);
        assert!(transport.is_bound());

        broker.shutdown();
        broker.shutdown();
        assert!(!broker.is_bound());
        assert!(!transport.is_bound());

        keyboard.emit_msg(Message::note_on(0, 60, 100));
        assert!(msg_rx.try_recv().is_err());
    }

    #[test]
    fn registration_concurrent_with_dispatch() {
        let transport = MemoryTransport::new();
        let keyboard = transport.add_source("Keyboard-1");
        let broker = Broker::new(transport.clone());

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        broker.add_receive_callback(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let registrar = {
            let broker = broker.clone();
            thread::spawn(move || {
                for i in 0..2000 {
                    let id = broker.add_receive_callback(|_| ());
                    if i % 10 != 0 {
                        assert!(broker.remove_callback(id));
                    }
                }
            })
        };
        let emitter = thread::spawn(move || {
            for _ in 0..2000 {
                assert!(keyboard.emit_msg(Message::note_on(0, 60, 100)));
            }
        });

        registrar.join().unwrap();
        emitter.join().unwrap();

        assert_eq!(broker.receive_callback_count(), 201);
        assert_eq!(delivered.load(Ordering::Relaxed), 2000);
        assert!(broker.faults().try_recv().is_err());
    }

    #[test]
    fn shutdown_leaves_newer_broker_bound() {
        let transport = MemoryTransport::new();
        let keyboard = transport.add_source("Keyboard-1");
        let first = Broker::new(transport.clone());
        let second = Broker::new(transport.clone());
        let (_, msg_rx) = second.subscribe(8);
        assert!(!first.is_bound());
        assert!(second.is_bound());

        first.shutdown();
        assert!(second.is_bound());
        assert!(transport.is_bound());

        assert!(keyboard.emit_msg(Message::note_on(0, 60, 100)));
        assert_eq!(msg_rx.try_recv().unwrap().midi.data1, 60);

        second.shutdown();
        assert!(!transport.is_bound());
    }

    #[test]
    fn dropped_broker_is_no_longer_notified() {
        let transport = MemoryTransport::new();
        let keyboard = transport.add_source("Keyboard-1");
        let broker = Broker::new(transport.clone());
        drop(broker);

        assert!(!transport.is_bound());
        assert!(keyboard.emit_msg(Message::note_on(0, 60, 100)));
    }
}
